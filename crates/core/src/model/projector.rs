use anyhow::{Context, Result};
use candle_nn::{layer_norm, linear, Activation, LayerNorm, Linear, Module, VarBuilder};
use candle_core::Tensor;

use crate::config::InternVLConfig;

/// Projects pixel-shuffled vision tokens into the language embedding space:
/// LayerNorm -> Linear -> activation -> Linear.
pub struct MultiModalProjector {
    layer_norm: LayerNorm,
    linear_1: Linear,
    act: Activation,
    linear_2: Linear,
}

impl MultiModalProjector {
    pub fn new(cfg: &InternVLConfig, vb: VarBuilder) -> Result<Self> {
        let input_dim = cfg.projector_input_dim();
        let text_hidden = cfg.text_config.hidden_size;
        Ok(Self {
            layer_norm: layer_norm(input_dim, 1e-5, vb.pp("layer_norm"))
                .context("failed to load projector layer norm")?,
            linear_1: linear(input_dim, text_hidden, vb.pp("linear_1"))?,
            act: cfg.projector_hidden_act,
            linear_2: linear(text_hidden, text_hidden, vb.pp("linear_2"))?,
        })
    }

    pub fn forward(&self, image_features: &Tensor) -> Result<Tensor> {
        let hidden = self.layer_norm.forward(image_features)?;
        let hidden = self.act.forward(&self.linear_1.forward(&hidden)?)?;
        Ok(self.linear_2.forward(&hidden)?)
    }
}
