//! InternVL vision transformer.
//!
//! A plain pre-norm ViT with a class token, absolute position embeddings,
//! and per-branch layer scaling. Attention, embeddings, and blocks are owned
//! components wired from [`InternVLVisionConfig`]; the attention backend is
//! picked once at construction.

use anyhow::{bail, Context, Result};
use candle_core::Tensor;
use candle_nn::{
    conv2d, layer_norm, linear, ops::softmax_last_dim, rms_norm, Activation, Conv2d, Conv2dConfig,
    LayerNorm, Linear, Module, RmsNorm, VarBuilder,
};

use crate::config::{AttnImplementation, InternVLVisionConfig};

#[derive(Debug, Clone, Copy)]
enum AttentionBackend {
    Eager,
    #[cfg(feature = "flash-attn")]
    Flash,
}

impl AttentionBackend {
    fn from_config(cfg: &InternVLVisionConfig) -> Result<Self> {
        match cfg.attn_implementation {
            AttnImplementation::Eager => Ok(Self::Eager),
            #[cfg(feature = "flash-attn")]
            AttnImplementation::FlashAttention => Ok(Self::Flash),
            #[cfg(not(feature = "flash-attn"))]
            AttnImplementation::FlashAttention => {
                bail!("flash attention requested but the `flash-attn` feature is not enabled")
            }
        }
    }
}

struct PatchEmbeddings {
    projection: Conv2d,
}

impl PatchEmbeddings {
    fn new(cfg: &InternVLVisionConfig, vb: VarBuilder) -> Result<Self> {
        let conv_cfg = Conv2dConfig {
            stride: cfg.patch_size,
            ..Default::default()
        };
        let projection = conv2d(
            cfg.num_channels,
            cfg.hidden_size,
            cfg.patch_size,
            conv_cfg,
            vb.pp("projection"),
        )?;
        Ok(Self { projection })
    }

    fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let embeddings = self.projection.forward(pixel_values)?;
        let (batch, channels, height, width) = embeddings.dims4()?;
        Ok(embeddings
            .reshape((batch, channels, height * width))?
            .transpose(1, 2)?)
    }
}

struct VisionEmbeddings {
    cls_token: Tensor,
    position_embeddings: Option<Tensor>,
    patch_embeddings: PatchEmbeddings,
}

impl VisionEmbeddings {
    fn new(cfg: &InternVLVisionConfig, vb: VarBuilder) -> Result<Self> {
        let cls_token = vb.get((1, 1, cfg.hidden_size), "cls_token")?;
        let patch_embeddings = PatchEmbeddings::new(cfg, vb.pp("patch_embeddings"))?;
        let position_embeddings = if cfg.use_absolute_position_embeddings {
            Some(vb.get((1, cfg.seq_len(), cfg.hidden_size), "position_embeddings")?)
        } else {
            None
        };
        Ok(Self {
            cls_token,
            position_embeddings,
            patch_embeddings,
        })
    }

    fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let patches = self.patch_embeddings.forward(pixel_values)?;
        let (batch, _tokens, hidden) = patches.dims3()?;
        let cls = self.cls_token.expand((batch, 1, hidden))?;
        let mut embeddings = Tensor::cat(&[&cls, &patches], 1)?;
        if let Some(positions) = &self.position_embeddings {
            embeddings = embeddings.broadcast_add(positions)?;
        }
        Ok(embeddings)
    }
}

struct VisionAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    projection_layer: Linear,
    q_norm: Option<RmsNorm>,
    k_norm: Option<RmsNorm>,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
    backend: AttentionBackend,
}

impl VisionAttention {
    fn new(cfg: &InternVLVisionConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let num_heads = cfg.num_attention_heads;
        if hidden % num_heads != 0 {
            bail!("hidden size {hidden} is not a multiple of {num_heads} attention heads");
        }
        let head_dim = hidden / num_heads;
        let q_proj = linear(hidden, hidden, vb.pp("q_proj"))?;
        let k_proj = linear(hidden, hidden, vb.pp("k_proj"))?;
        let v_proj = linear(hidden, hidden, vb.pp("v_proj"))?;
        let projection_layer = linear(hidden, hidden, vb.pp("projection_layer"))?;
        let (q_norm, k_norm) = if cfg.use_qk_norm {
            (
                Some(rms_norm(hidden, cfg.layer_norm_eps, vb.pp("q_norm"))?),
                Some(rms_norm(hidden, cfg.layer_norm_eps, vb.pp("k_norm"))?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            projection_layer,
            q_norm,
            k_norm,
            num_heads,
            head_dim,
            scale: 1.0 / (head_dim as f64).sqrt(),
            backend: AttentionBackend::from_config(cfg)?,
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let (batch, seq, hidden) = hidden_states.dims3()?;
        let mut q = self.q_proj.forward(hidden_states)?;
        let mut k = self.k_proj.forward(hidden_states)?;
        let v = self.v_proj.forward(hidden_states)?;
        if let Some(norm) = &self.q_norm {
            q = norm.forward(&q)?;
        }
        if let Some(norm) = &self.k_norm {
            k = norm.forward(&k)?;
        }

        let shape = (batch, seq, self.num_heads, self.head_dim);
        let context = match self.backend {
            AttentionBackend::Eager => {
                let q = q.reshape(shape)?.transpose(1, 2)?.contiguous()?;
                let k = k.reshape(shape)?.transpose(1, 2)?.contiguous()?;
                let v = v.reshape(shape)?.transpose(1, 2)?.contiguous()?;
                let weights = (q.matmul(&k.transpose(2, 3)?)? * self.scale)?;
                let weights = softmax_last_dim(&weights)?;
                weights.matmul(&v)?.transpose(1, 2)?
            }
            #[cfg(feature = "flash-attn")]
            AttentionBackend::Flash => {
                let q = q.reshape(shape)?.contiguous()?;
                let k = k.reshape(shape)?.contiguous()?;
                let v = v.reshape(shape)?.contiguous()?;
                candle_flash_attn::flash_attn(&q, &k, &v, self.scale as f32, false)?
            }
        };
        let context = context.reshape((batch, seq, hidden))?;
        Ok(self.projection_layer.forward(&context)?)
    }
}

struct VisionMlp {
    fc1: Linear,
    fc2: Linear,
    act: Activation,
}

impl VisionMlp {
    fn new(cfg: &InternVLVisionConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(cfg.hidden_size, cfg.intermediate_size, vb.pp("fc1"))?,
            fc2: linear(cfg.intermediate_size, cfg.hidden_size, vb.pp("fc2"))?,
            act: cfg.hidden_act,
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        Ok(self
            .fc2
            .forward(&self.act.forward(&self.fc1.forward(hidden_states)?)?)?)
    }
}

struct VisionLayer {
    layernorm_before: LayerNorm,
    attention: VisionAttention,
    lambda_1: Tensor,
    layernorm_after: LayerNorm,
    mlp: VisionMlp,
    lambda_2: Tensor,
}

impl VisionLayer {
    fn new(cfg: &InternVLVisionConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            layernorm_before: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("layernorm_before"),
            )?,
            attention: VisionAttention::new(cfg, vb.pp("attention"))?,
            lambda_1: vb.get(cfg.hidden_size, "lambda_1")?,
            layernorm_after: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("layernorm_after"),
            )?,
            mlp: VisionMlp::new(cfg, vb.pp("mlp"))?,
            lambda_2: vb.get(cfg.hidden_size, "lambda_2")?,
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let attn = self
            .attention
            .forward(&self.layernorm_before.forward(hidden_states)?)?
            .broadcast_mul(&self.lambda_1)?;
        let hidden_states = (hidden_states + attn)?;
        let mlp = self
            .mlp
            .forward(&self.layernorm_after.forward(&hidden_states)?)?
            .broadcast_mul(&self.lambda_2)?;
        Ok((hidden_states + mlp)?)
    }
}

/// The InternVL vision tower.
pub struct InternVLVisionModel {
    embeddings: VisionEmbeddings,
    layers: Vec<VisionLayer>,
}

impl InternVLVisionModel {
    pub fn new(cfg: &InternVLVisionConfig, vb: VarBuilder) -> Result<Self> {
        let embeddings = VisionEmbeddings::new(cfg, vb.pp("embeddings"))
            .context("failed to load vision embeddings")?;
        let vb_layers = vb.pp("encoder").pp("layer");
        let mut layers = Vec::with_capacity(cfg.num_hidden_layers);
        for index in 0..cfg.num_hidden_layers {
            layers.push(
                VisionLayer::new(cfg, vb_layers.pp(index))
                    .with_context(|| format!("failed to load vision layer {index}"))?,
            );
        }
        Ok(Self { embeddings, layers })
    }

    /// Last hidden state, `[batch, tokens + 1, hidden]` with the class token
    /// in front.
    pub fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let mut hidden_states = self.embeddings.forward(pixel_values)?;
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states)?;
        }
        Ok(hidden_states)
    }

    /// Hidden states of every stage: the embedding output followed by each
    /// encoder layer's output.
    pub fn forward_hidden_states(&self, pixel_values: &Tensor) -> Result<Vec<Tensor>> {
        let mut hidden_states = self.embeddings.forward(pixel_values)?;
        let mut collected = Vec::with_capacity(self.layers.len() + 1);
        collected.push(hidden_states.clone());
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states)?;
            collected.push(hidden_states.clone());
        }
        Ok(collected)
    }
}
