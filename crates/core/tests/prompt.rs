use ahash::AHashMap;

use anyhow::{anyhow, Result};
use candle_core::Device;
use internvl_core::config::InternVLConfig;
use internvl_core::prompt::{build_input_ids, render_chat_prompt};
use tokenizers::{models::wordlevel::WordLevel, Tokenizer};

fn word_tokenizer(entries: &[(&str, u32)]) -> Result<Tokenizer> {
    let mut vocab: AHashMap<String, u32> = AHashMap::new();
    vocab.insert("<unk>".to_string(), 0);
    for (word, id) in entries {
        vocab.insert((*word).to_string(), *id);
    }
    let model = WordLevel::builder()
        .vocab(vocab)
        .unk_token("<unk>".to_string())
        .build()
        .map_err(|err| anyhow!("failed to build tokenizer: {err}"))?;
    Ok(Tokenizer::new(model))
}

fn test_config() -> InternVLConfig {
    InternVLConfig {
        image_token_id: 99,
        image_seq_length: 3,
        ..InternVLConfig::default()
    }
}

#[test]
fn placeholders_expand_to_tile_scaled_runs() -> Result<()> {
    let tokenizer = word_tokenizer(&[("hi", 5), ("bye", 6)])?;
    let cfg = test_config();
    let ids = build_input_ids(&tokenizer, "hi<image>bye", &[2], &cfg, &Device::Cpu)?;
    let row = ids.to_vec2::<i64>()?.remove(0);
    // Two tiles at three positions each between the text tokens.
    assert_eq!(row, vec![5, 99, 99, 99, 99, 99, 99, 6]);
    Ok(())
}

#[test]
fn placeholder_count_must_match_image_count() -> Result<()> {
    let tokenizer = word_tokenizer(&[("hi", 5)])?;
    let cfg = test_config();
    assert!(build_input_ids(&tokenizer, "hi", &[1], &cfg, &Device::Cpu).is_err());
    assert!(build_input_ids(&tokenizer, "hi<image>", &[], &cfg, &Device::Cpu).is_err());
    Ok(())
}

#[test]
fn chat_prompt_wraps_roles() {
    let prompt = render_chat_prompt("be brief", "what is this?");
    assert!(prompt.starts_with("<|im_start|>system\nbe brief<|im_end|>\n"));
    assert!(prompt.contains("<|im_start|>user\nwhat is this?<|im_end|>"));
    assert!(prompt.ends_with("<|im_start|>assistant\n"));
}
