use std::path::PathBuf;

use clap::Parser;
use internvl_config::{AppConfig, ConfigOverride, ConfigOverrides};
use internvl_core::runtime::{DeviceKind, Precision};

#[derive(Parser, Debug)]
#[command(author, version, about = "InternVL multimodal inference CLI", long_about = None)]
pub struct Args {
    /// Optional path to a configuration file (defaults to ./internvl.toml).
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub config: Option<PathBuf>,

    /// Prompt text. Use `<image>` markers to denote image slots.
    #[arg(long, conflicts_with = "prompt_file")]
    pub prompt: Option<String>,

    /// Prompt file path (UTF-8). Overrides `--prompt` when provided.
    #[arg(long, value_name = "PATH", conflicts_with = "prompt")]
    pub prompt_file: Option<PathBuf>,

    /// System prompt prepended to the conversation.
    #[arg(long, default_value = "")]
    pub system: String,

    /// Image files corresponding to `<image>` markers, in order.
    #[arg(long = "image", value_name = "PATH")]
    pub images: Vec<PathBuf>,

    /// Hugging Face repository to fetch missing model files from.
    #[arg(long, value_name = "REPO", help_heading = "Model")]
    pub repo: Option<String>,

    /// Override the model configuration JSON path.
    #[arg(long, value_name = "PATH", help_heading = "Model")]
    pub model_config: Option<PathBuf>,

    /// Override the tokenizer JSON path.
    #[arg(long, value_name = "PATH", help_heading = "Model")]
    pub tokenizer: Option<PathBuf>,

    /// Override the safetensors weights path (file or directory).
    #[arg(long, value_name = "PATH", help_heading = "Model")]
    pub weights: Option<PathBuf>,

    /// Compute device.
    #[arg(long, value_enum, help_heading = "Inference")]
    pub device: Option<DeviceKind>,

    /// Weight precision (defaults per device).
    #[arg(long, value_enum, help_heading = "Inference")]
    pub precision: Option<Precision>,

    /// Minimum number of tiles per image.
    #[arg(long, help_heading = "Inference")]
    pub min_patches: Option<u32>,

    /// Maximum number of tiles per image.
    #[arg(long, help_heading = "Inference")]
    pub max_patches: Option<u32>,

    /// Append a whole-image thumbnail tile after the grid tiles.
    #[arg(long, help_heading = "Inference")]
    pub use_thumbnail: Option<bool>,

    /// Maximum number of generated tokens.
    #[arg(long, help_heading = "Inference")]
    pub max_new_tokens: Option<usize>,

    /// Sample instead of greedy decoding.
    #[arg(long, help_heading = "Sampling")]
    pub do_sample: Option<bool>,

    #[arg(long, help_heading = "Sampling")]
    pub temperature: Option<f64>,

    #[arg(long, help_heading = "Sampling")]
    pub top_p: Option<f64>,

    #[arg(long, help_heading = "Sampling")]
    pub top_k: Option<usize>,

    #[arg(long, help_heading = "Sampling")]
    pub repetition_penalty: Option<f32>,

    /// RNG seed for reproducible sampling.
    #[arg(long, help_heading = "Sampling")]
    pub seed: Option<u64>,

    /// Suppress streaming output; print only the final text.
    #[arg(long)]
    pub quiet: bool,
}

impl From<&Args> for ConfigOverrides {
    fn from(args: &Args) -> Self {
        ConfigOverrides {
            repo: args.repo.clone(),
            model_config: args.model_config.clone(),
            tokenizer: args.tokenizer.clone(),
            weights: args.weights.clone(),
            device: args.device,
            precision: args.precision,
            min_patches: args.min_patches,
            max_patches: args.max_patches,
            use_thumbnail: args.use_thumbnail,
            max_new_tokens: args.max_new_tokens,
            do_sample: args.do_sample,
            temperature: args.temperature,
            top_p: args.top_p,
            top_k: args.top_k,
            repetition_penalty: args.repetition_penalty,
            seed: args.seed,
        }
    }
}

impl ConfigOverride for &Args {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(&ConfigOverrides::from(self));
    }
}
