use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hf_hub::api::sync::Api;
use tracing::info;

/// Resolve a model file: an explicit local path wins, otherwise the file is
/// fetched from the Hugging Face hub (cached across runs).
pub fn ensure_file(local: Option<&Path>, repo: &str, filename: &str) -> Result<PathBuf> {
    if let Some(path) = local {
        if !path.exists() {
            bail!("configured path {} does not exist", path.display());
        }
        return Ok(path.to_path_buf());
    }
    info!("fetching {filename} from {repo}");
    let api = Api::new().context("failed to initialise Hugging Face API")?;
    api.model(repo.to_string())
        .get(filename)
        .with_context(|| format!("failed to fetch {filename} from {repo}"))
}

/// Collect safetensors shards. A directory is scanned for `*.safetensors`;
/// a file is used as-is; unset falls back to the single-shard hub layout.
pub fn ensure_weight_files(local: Option<&Path>, repo: &str) -> Result<Vec<PathBuf>> {
    match local {
        Some(path) if path.is_dir() => {
            let mut shards: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("failed to read {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
                .collect();
            shards.sort();
            if shards.is_empty() {
                bail!("no .safetensors files found in {}", path.display());
            }
            Ok(shards)
        }
        Some(path) => {
            if !path.exists() {
                bail!("configured weights path {} does not exist", path.display());
            }
            Ok(vec![path.to_path_buf()])
        }
        None => Ok(vec![ensure_file(None, repo, "model.safetensors")?]),
    }
}
