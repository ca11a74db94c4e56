//! Prompt rendering and image-placeholder expansion.

use anyhow::{anyhow, ensure, Result};
use candle_core::{DType, Device, Tensor};
use tokenizers::Tokenizer;

use crate::config::InternVLConfig;

/// Marker users place in prompts where an image should be attended.
pub const IMAGE_PLACEHOLDER: &str = "<image>";

/// Render a chat-style prompt around the user message.
pub fn render_chat_prompt(system_prompt: &str, user_prompt: &str) -> String {
    let mut prompt = String::new();
    if !system_prompt.is_empty() {
        prompt.push_str("<|im_start|>system\n");
        prompt.push_str(system_prompt);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>user\n");
    prompt.push_str(user_prompt);
    prompt.push_str("<|im_end|>\n<|im_start|>assistant\n");
    prompt
}

/// Tokenize a prompt, splicing a run of image-placeholder ids into every
/// `<image>` slot.
///
/// Each image expands to `tiles * image_seq_length` copies of the configured
/// image token id, where `tiles_per_image[i]` is the tile count the image
/// processor produced for the i-th image. The text around the markers is
/// tokenized segment by segment so the marker itself never reaches the
/// tokenizer.
pub fn build_input_ids(
    tokenizer: &Tokenizer,
    prompt: &str,
    tiles_per_image: &[usize],
    cfg: &InternVLConfig,
    device: &Device,
) -> Result<Tensor> {
    let segments: Vec<&str> = prompt.split(IMAGE_PLACEHOLDER).collect();
    ensure!(
        segments.len() - 1 == tiles_per_image.len(),
        "prompt contains {} image placeholders but {} images were provided",
        segments.len() - 1,
        tiles_per_image.len()
    );

    let mut ids: Vec<i64> = Vec::new();
    for (index, segment) in segments.iter().enumerate() {
        if !segment.is_empty() {
            let encoding = tokenizer
                .encode(*segment, false)
                .map_err(|err| anyhow!("failed to tokenize prompt segment: {err}"))?;
            ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
        }
        if index < tiles_per_image.len() {
            let count = tiles_per_image[index] * cfg.image_seq_length;
            ids.extend(std::iter::repeat(cfg.image_token_id).take(count));
        }
    }

    let len = ids.len();
    Ok(Tensor::from_vec(ids, (1, len), device)?.to_dtype(DType::I64)?)
}
