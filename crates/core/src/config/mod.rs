use std::{fs, path::Path};

use anyhow::{Context, Result};
use candle_nn::Activation;
use serde::Deserialize;

/// Attention backend for the vision tower, fixed at model construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttnImplementation {
    #[default]
    Eager,
    FlashAttention,
}

/// Hyper-parameters of the InternVL vision transformer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InternVLVisionConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: Activation,
    pub layer_norm_eps: f64,
    pub image_size: usize,
    pub patch_size: usize,
    pub num_channels: usize,
    pub use_absolute_position_embeddings: bool,
    pub use_qk_norm: bool,
    pub layer_scale_init_value: f64,
    pub attn_implementation: AttnImplementation,
}

impl Default for InternVLVisionConfig {
    fn default() -> Self {
        Self {
            hidden_size: 1024,
            num_hidden_layers: 24,
            num_attention_heads: 16,
            intermediate_size: 4096,
            hidden_act: Activation::Gelu,
            layer_norm_eps: 1e-6,
            image_size: 448,
            patch_size: 14,
            num_channels: 3,
            use_absolute_position_embeddings: true,
            use_qk_norm: false,
            layer_scale_init_value: 0.1,
            attn_implementation: AttnImplementation::Eager,
        }
    }
}

impl InternVLVisionConfig {
    /// Number of patch tokens per image side.
    pub fn patches_per_side(&self) -> usize {
        self.image_size / self.patch_size
    }

    /// Sequence length produced by the embeddings, class token included.
    pub fn seq_len(&self) -> usize {
        self.patches_per_side() * self.patches_per_side() + 1
    }
}

/// Qwen2-flavoured text backbone configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub max_position_embeddings: usize,
    pub rope_theta: f64,
    pub rms_norm_eps: f64,
    pub tie_word_embeddings: bool,
    pub hidden_act: Activation,
    pub bos_token_id: i64,
    pub eos_token_id: i64,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            vocab_size: 151674,
            hidden_size: 896,
            intermediate_size: 4864,
            num_hidden_layers: 24,
            num_attention_heads: 14,
            num_key_value_heads: 2,
            max_position_embeddings: 32768,
            rope_theta: 1_000_000.0,
            rms_norm_eps: 1e-6,
            tie_word_embeddings: false,
            hidden_act: Activation::Silu,
            bos_token_id: 151643,
            eos_token_id: 151645,
        }
    }
}

impl TextConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

/// Top-level configuration tying the vision tower, projector, and language
/// model together.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InternVLConfig {
    pub vision_config: InternVLVisionConfig,
    pub text_config: TextConfig,
    /// Token id reserved in the vocabulary for image-feature positions.
    #[serde(alias = "image_token_index")]
    pub image_token_id: i64,
    /// Number of language-model positions one image tile expands to.
    pub image_seq_length: usize,
    /// Spatial scale applied by the pixel-shuffle downsampler.
    pub downsample_ratio: f64,
    pub projector_hidden_act: Activation,
    /// Vision encoder layer to read features from; negative counts from the
    /// end, `-1` meaning the final hidden state.
    pub vision_feature_layer: i64,
}

impl Default for InternVLConfig {
    fn default() -> Self {
        Self {
            vision_config: InternVLVisionConfig::default(),
            text_config: TextConfig::default(),
            image_token_id: 151667,
            image_seq_length: 256,
            downsample_ratio: 0.5,
            projector_hidden_act: Activation::Gelu,
            vision_feature_layer: -1,
        }
    }
}

impl InternVLConfig {
    /// Hidden width of one flattened vision token after pixel shuffle, i.e.
    /// the input dimension of the multimodal projector.
    pub fn projector_input_dim(&self) -> usize {
        let ratio = (1.0 / self.downsample_ratio) as usize;
        self.vision_config.hidden_size * ratio * ratio
    }
}

/// Read an HF-style `config.json` from disk.
pub fn load_model_config(path: &Path) -> Result<InternVLConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read model config at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse model config at {}", path.display()))
}
