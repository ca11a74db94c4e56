use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use internvl_core::config::InternVLVisionConfig;
use internvl_core::vision::InternVLVisionModel;

fn tiny_vision_config() -> InternVLVisionConfig {
    InternVLVisionConfig {
        hidden_size: 32,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        intermediate_size: 64,
        image_size: 28,
        patch_size: 14,
        ..InternVLVisionConfig::default()
    }
}

#[test]
fn forward_emits_class_token_plus_patches() -> Result<()> {
    let device = Device::Cpu;
    let cfg = tiny_vision_config();
    let vb = VarBuilder::zeros(DType::F32, &device);
    let model = InternVLVisionModel::new(&cfg, vb)?;

    let pixels = Tensor::zeros((2, 3, 28, 28), DType::F32, &device)?;
    let out = model.forward(&pixels)?;
    // 2x2 patch grid plus the class token.
    assert_eq!(out.dims3()?, (2, 5, 32));
    Ok(())
}

#[test]
fn hidden_states_cover_embeddings_and_every_layer() -> Result<()> {
    let device = Device::Cpu;
    let cfg = tiny_vision_config();
    let vb = VarBuilder::zeros(DType::F32, &device);
    let model = InternVLVisionModel::new(&cfg, vb)?;

    let pixels = Tensor::zeros((1, 3, 28, 28), DType::F32, &device)?;
    let states = model.forward_hidden_states(&pixels)?;
    assert_eq!(states.len(), cfg.num_hidden_layers + 1);
    for state in &states {
        assert_eq!(state.dims3()?, (1, 5, 32));
    }
    Ok(())
}

#[test]
fn qk_norm_variant_loads_and_runs() -> Result<()> {
    let device = Device::Cpu;
    let cfg = InternVLVisionConfig {
        use_qk_norm: true,
        ..tiny_vision_config()
    };
    let vb = VarBuilder::zeros(DType::F32, &device);
    let model = InternVLVisionModel::new(&cfg, vb)?;
    let pixels = Tensor::zeros((1, 3, 28, 28), DType::F32, &device)?;
    assert_eq!(model.forward(&pixels)?.dims3()?, (1, 5, 32));
    Ok(())
}
