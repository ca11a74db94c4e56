//! Application configuration: model file locations plus inference settings,
//! stored as TOML and layered with command-line overrides.

use std::{
    fs,
    ops::AddAssign,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use internvl_core::runtime::{DeviceKind, Precision};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "internvl.toml";
pub const DEFAULT_MODEL_REPO: &str = "OpenGVLab/InternVL2_5-1B-MPO";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub inference: InferenceSettings,
}

/// Where the model artefacts live. Unset paths fall back to a Hugging Face
/// download from `repo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub repo: String,
    pub config: Option<PathBuf>,
    pub tokenizer: Option<PathBuf>,
    pub weights: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            repo: DEFAULT_MODEL_REPO.to_string(),
            config: None,
            tokenizer: None,
            weights: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub device: DeviceKind,
    pub precision: Option<Precision>,
    pub min_patches: u32,
    pub max_patches: u32,
    pub use_thumbnail: bool,
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: Option<usize>,
    pub repetition_penalty: f32,
    pub seed: Option<u64>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            device: DeviceKind::Cpu,
            precision: None,
            min_patches: 1,
            max_patches: 12,
            use_thumbnail: true,
            max_new_tokens: 512,
            do_sample: false,
            temperature: 0.0,
            top_p: 1.0,
            top_k: None,
            repetition_penalty: 1.0,
            seed: None,
        }
    }
}

impl AppConfig {
    /// Load the configuration, writing the defaults back to disk when no
    /// file exists yet. Returns the config and the path it came from.
    pub fn load_or_init(override_path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = override_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if !path.exists() {
            let config = AppConfig::default();
            config.save(&path)?;
            return Ok((config, path));
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse configuration at {}", path.display()))?;
        Ok((config, path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory {}", parent.display())
                })?;
            }
        }
        let serialized = toml::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write configuration to {}", path.display()))
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(path) = overrides.model_config.as_ref() {
            self.model.config = Some(path.clone());
        }
        if let Some(path) = overrides.tokenizer.as_ref() {
            self.model.tokenizer = Some(path.clone());
        }
        if let Some(path) = overrides.weights.as_ref() {
            self.model.weights = Some(path.clone());
        }
        if let Some(repo) = overrides.repo.as_ref() {
            self.model.repo = repo.clone();
        }
        if let Some(device) = overrides.device {
            self.inference.device = device;
        }
        if overrides.precision.is_some() {
            self.inference.precision = overrides.precision;
        }
        if let Some(min_patches) = overrides.min_patches {
            self.inference.min_patches = min_patches;
        }
        if let Some(max_patches) = overrides.max_patches {
            self.inference.max_patches = max_patches;
        }
        if let Some(use_thumbnail) = overrides.use_thumbnail {
            self.inference.use_thumbnail = use_thumbnail;
        }
        if let Some(max_new_tokens) = overrides.max_new_tokens {
            self.inference.max_new_tokens = max_new_tokens;
        }
        if let Some(do_sample) = overrides.do_sample {
            self.inference.do_sample = do_sample;
        }
        if let Some(temperature) = overrides.temperature {
            self.inference.temperature = temperature;
        }
        if let Some(top_p) = overrides.top_p {
            self.inference.top_p = top_p;
        }
        if let Some(top_k) = overrides.top_k {
            self.inference.top_k = Some(top_k);
        }
        if let Some(penalty) = overrides.repetition_penalty {
            self.inference.repetition_penalty = penalty;
        }
        if overrides.seed.is_some() {
            self.inference.seed = overrides.seed;
        }
    }
}

/// Optional layer applied on top of a loaded [`AppConfig`].
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub repo: Option<String>,
    pub model_config: Option<PathBuf>,
    pub tokenizer: Option<PathBuf>,
    pub weights: Option<PathBuf>,
    pub device: Option<DeviceKind>,
    pub precision: Option<Precision>,
    pub min_patches: Option<u32>,
    pub max_patches: Option<u32>,
    pub use_thumbnail: Option<bool>,
    pub max_new_tokens: Option<usize>,
    pub do_sample: Option<bool>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub repetition_penalty: Option<f32>,
    pub seed: Option<u64>,
}

pub trait ConfigOverride {
    fn apply(self, config: &mut AppConfig);
}

impl ConfigOverride for ConfigOverrides {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(&self);
    }
}

impl ConfigOverride for &ConfigOverrides {
    fn apply(self, config: &mut AppConfig) {
        config.apply_overrides(self);
    }
}

impl<O: ConfigOverride> AddAssign<O> for AppConfig {
    fn add_assign(&mut self, rhs: O) {
        rhs.apply(self);
    }
}
