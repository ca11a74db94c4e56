use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use internvl_core::config::{InternVLConfig, InternVLVisionConfig, TextConfig};
use internvl_core::{GenerateOptions, InternVLModel, VisionError};

const IMG: i64 = 10;

fn tiny_config() -> InternVLConfig {
    InternVLConfig {
        vision_config: InternVLVisionConfig {
            hidden_size: 32,
            num_hidden_layers: 1,
            num_attention_heads: 4,
            intermediate_size: 64,
            image_size: 28,
            patch_size: 14,
            ..InternVLVisionConfig::default()
        },
        text_config: TextConfig {
            vocab_size: 64,
            hidden_size: 16,
            intermediate_size: 32,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            num_key_value_heads: 2,
            max_position_embeddings: 128,
            tie_word_embeddings: true,
            ..TextConfig::default()
        },
        image_token_id: IMG,
        image_seq_length: 1,
        downsample_ratio: 0.5,
        ..InternVLConfig::default()
    }
}

fn tiny_model() -> Result<InternVLModel> {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    InternVLModel::load(tiny_config(), vb)
}

#[test]
fn image_features_have_downsampled_token_count() -> Result<()> {
    let model = tiny_model()?;
    // 2x2 patch grid, downsampled by 0.5 -> a single token per tile whose
    // width is the text hidden size after projection.
    let pixels = Tensor::zeros((3, 3, 28, 28), DType::F32, &Device::Cpu)?;
    let features = model.get_image_features(&pixels)?;
    assert_eq!(features.dims3()?, (3, 1, 16));
    Ok(())
}

#[test]
fn forward_fuses_matching_placeholders() -> Result<()> {
    let mut model = tiny_model()?;
    // Two tiles, one fused token each -> two placeholder positions.
    let pixels = Tensor::zeros((2, 3, 28, 28), DType::F32, &Device::Cpu)?;
    let ids = Tensor::from_vec(vec![1i64, IMG, IMG, 2], (1, 4), &Device::Cpu)?;
    let logits = model.forward(Some(&ids), None, Some(&pixels), None, 0, 0)?;
    assert_eq!(logits.dims3()?, (1, 4, 64));
    Ok(())
}

#[test]
fn forward_rejects_placeholder_feature_imbalance() -> Result<()> {
    let mut model = tiny_model()?;
    let pixels = Tensor::zeros((2, 3, 28, 28), DType::F32, &Device::Cpu)?;
    let ids = Tensor::from_vec(vec![1i64, IMG, 3, 2], (1, 4), &Device::Cpu)?;
    let err = model
        .forward(Some(&ids), None, Some(&pixels), None, 0, 0)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VisionError>(),
        Some(VisionError::ShapeMismatch(_))
    ));
    Ok(())
}

#[test]
fn logits_to_keep_trims_the_output() -> Result<()> {
    let mut model = tiny_model()?;
    let ids = Tensor::from_vec(vec![1i64, 2, 3], (1, 3), &Device::Cpu)?;
    let logits = model.forward(Some(&ids), None, None, None, 0, 1)?;
    assert_eq!(logits.dims3()?, (1, 1, 64));
    Ok(())
}

#[test]
fn generate_emits_the_requested_number_of_tokens() -> Result<()> {
    let mut model = tiny_model()?;
    let ids = Tensor::from_vec(vec![1i64, 2], (1, 2), &Device::Cpu)?;
    let out = model.generate(&ids, None, GenerateOptions::new(3))?;
    assert_eq!(out.dims2()?, (1, 3));
    Ok(())
}

#[test]
fn generate_with_zero_budget_is_empty() -> Result<()> {
    let mut model = tiny_model()?;
    let ids = Tensor::from_vec(vec![1i64], (1, 1), &Device::Cpu)?;
    let out = model.generate(&ids, None, GenerateOptions::new(0))?;
    assert_eq!(out.dims2()?, (1, 0));
    Ok(())
}

#[test]
fn generate_stops_at_eos() -> Result<()> {
    let mut model = tiny_model()?;
    let ids = Tensor::from_vec(vec![1i64, 2], (1, 2), &Device::Cpu)?;
    // With deterministic greedy decoding the first sampled token repeats;
    // marking it as EOS must stop generation before anything is emitted.
    let first = model.generate(&ids, None, GenerateOptions::new(1))?;
    let first_token = first.get(0)?.get(0)?.to_scalar::<i64>()?;

    let mut options = GenerateOptions::new(5);
    options.eos_token_id = Some(first_token);
    let out = model.generate(&ids, None, options)?;
    assert_eq!(out.dims2()?, (1, 0));
    Ok(())
}
