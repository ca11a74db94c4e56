//! Qwen2-style causal language model backing the multimodal stack.
//!
//! Grouped-query attention with rotary embeddings, RMSNorm, SwiGLU MLP, and
//! a per-layer KV cache keyed by the running sequence offset.

use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{
    embedding, linear, linear_no_bias, ops::softmax_last_dim, rms_norm, Activation, Embedding,
    Linear, Module, RmsNorm, VarBuilder,
};

use crate::config::TextConfig;

#[derive(Debug, Clone)]
struct RotaryEmbedding {
    sin: Tensor,
    cos: Tensor,
}

impl RotaryEmbedding {
    fn new(cfg: &TextConfig, dtype: DType, device: &Device) -> Result<Self> {
        let dim = cfg.head_dim();
        let max_seq_len = cfg.max_position_embeddings;
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| 1f32 / (cfg.rope_theta as f32).powf(i as f32 / dim as f32))
            .collect();
        let inv_freq_len = inv_freq.len();
        let inv_freq = Tensor::from_vec(inv_freq, (1, inv_freq_len), device)?;
        let positions = Tensor::arange(0u32, max_seq_len as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((max_seq_len, 1))?;
        let freqs = positions.matmul(&inv_freq)?;
        Ok(Self {
            sin: freqs.sin()?.to_dtype(dtype)?,
            cos: freqs.cos()?.to_dtype(dtype)?,
        })
    }

    fn apply(&self, q: &Tensor, k: &Tensor, seqlen_offset: usize) -> Result<(Tensor, Tensor)> {
        let (_batch, _heads, seq_len, _head_dim) = q.dims4()?;
        let cos = self.cos.narrow(0, seqlen_offset, seq_len)?;
        let sin = self.sin.narrow(0, seqlen_offset, seq_len)?;
        let q = candle_nn::rotary_emb::rope(&q.contiguous()?, &cos, &sin)?;
        let k = candle_nn::rotary_emb::rope(&k.contiguous()?, &cos, &sin)?;
        Ok((q, k))
    }
}

fn repeat_kv(xs: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(xs);
    }
    let (batch, kv_heads, seq_len, head_dim) = xs.dims4()?;
    Ok(xs
        .unsqueeze(2)?
        .expand((batch, kv_heads, n_rep, seq_len, head_dim))?
        .reshape((batch, kv_heads * n_rep, seq_len, head_dim))?)
}

struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    act: Activation,
}

impl Mlp {
    fn new(cfg: &TextConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gate_proj: linear_no_bias(cfg.hidden_size, cfg.intermediate_size, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(cfg.hidden_size, cfg.intermediate_size, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(cfg.intermediate_size, cfg.hidden_size, vb.pp("down_proj"))?,
            act: cfg.hidden_act,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let gate = self.act.forward(&self.gate_proj.forward(xs)?)?;
        let up = self.up_proj.forward(xs)?;
        Ok(self.down_proj.forward(&(gate * up)?)?)
    }
}

struct CausalAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    num_kv_groups: usize,
    head_dim: usize,
    hidden_size: usize,
    rotary: Arc<RotaryEmbedding>,
    kv_cache: Option<(Tensor, Tensor)>,
}

impl CausalAttention {
    fn new(cfg: &TextConfig, rotary: Arc<RotaryEmbedding>, vb: VarBuilder) -> Result<Self> {
        let head_dim = cfg.head_dim();
        let num_heads = cfg.num_attention_heads;
        let num_kv_heads = cfg.num_key_value_heads;
        Ok(Self {
            q_proj: linear(cfg.hidden_size, num_heads * head_dim, vb.pp("q_proj"))?,
            k_proj: linear(cfg.hidden_size, num_kv_heads * head_dim, vb.pp("k_proj"))?,
            v_proj: linear(cfg.hidden_size, num_kv_heads * head_dim, vb.pp("v_proj"))?,
            o_proj: linear_no_bias(num_heads * head_dim, cfg.hidden_size, vb.pp("o_proj"))?,
            num_heads,
            num_kv_heads,
            num_kv_groups: num_heads / num_kv_heads,
            head_dim,
            hidden_size: cfg.hidden_size,
            rotary,
            kv_cache: None,
        })
    }

    fn forward(
        &mut self,
        xs: &Tensor,
        attention_mask: Option<&Tensor>,
        seqlen_offset: usize,
    ) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;

        let q = self
            .q_proj
            .forward(xs)?
            .reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .k_proj
            .forward(xs)?
            .reshape((batch, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .v_proj
            .forward(xs)?
            .reshape((batch, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;

        let (q, k) = self.rotary.apply(&q, &k, seqlen_offset)?;

        let (k, v) = match &self.kv_cache {
            None => (k, v),
            Some((prev_k, prev_v)) => (
                Tensor::cat(&[prev_k, &k], 2)?,
                Tensor::cat(&[prev_v, &v], 2)?,
            ),
        };
        self.kv_cache = Some((k.clone(), v.clone()));

        let k = repeat_kv(k, self.num_kv_groups)?.contiguous()?;
        let v = repeat_kv(v, self.num_kv_groups)?.contiguous()?;

        let scale = 1f64 / (self.head_dim as f64).sqrt();
        let mut weights = (q.contiguous()?.matmul(&k.transpose(2, 3)?)? * scale)?;
        if let Some(mask) = attention_mask {
            weights = weights.broadcast_add(mask)?;
        }
        let weights = softmax_last_dim(&weights)?;
        let context = weights.matmul(&v)?;
        Ok(self
            .o_proj
            .forward(&context.transpose(1, 2)?.reshape((
                batch,
                seq_len,
                self.hidden_size,
            ))?)?)
    }

    fn clear_kv_cache(&mut self) {
        self.kv_cache = None;
    }
}

struct DecoderLayer {
    self_attn: CausalAttention,
    mlp: Mlp,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn new(cfg: &TextConfig, rotary: Arc<RotaryEmbedding>, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: CausalAttention::new(cfg, rotary, vb.pp("self_attn"))?,
            mlp: Mlp::new(cfg, vb.pp("mlp"))?,
            input_layernorm: rms_norm(cfg.hidden_size, cfg.rms_norm_eps, vb.pp("input_layernorm"))?,
            post_attention_layernorm: rms_norm(
                cfg.hidden_size,
                cfg.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    fn forward(
        &mut self,
        xs: &Tensor,
        attention_mask: Option<&Tensor>,
        seqlen_offset: usize,
    ) -> Result<Tensor> {
        let residual = xs;
        let xs = self.input_layernorm.forward(xs)?;
        let xs = self.self_attn.forward(&xs, attention_mask, seqlen_offset)?;
        let xs = (xs + residual)?;
        let residual = &xs;
        let out = self
            .mlp
            .forward(&self.post_attention_layernorm.forward(&xs)?)?;
        Ok((out + residual)?)
    }

    fn clear_kv_cache(&mut self) {
        self.self_attn.clear_kv_cache();
    }
}

/// Decoder stack plus the LM head.
pub struct LanguageModel {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
    device: Device,
    dtype: DType,
    hidden_size: usize,
}

impl LanguageModel {
    /// Load from a `VarBuilder` rooted at the language model
    /// (`model.embed_tokens...`, `lm_head...`).
    pub fn new(cfg: &TextConfig, vb: VarBuilder) -> Result<Self> {
        let vb_m = vb.pp("model");
        let embed_tokens = embedding(cfg.vocab_size, cfg.hidden_size, vb_m.pp("embed_tokens"))
            .context("failed to load token embeddings")?;
        let rotary = Arc::new(RotaryEmbedding::new(cfg, vb.dtype(), vb.device())?);
        let vb_layers = vb_m.pp("layers");
        let mut layers = Vec::with_capacity(cfg.num_hidden_layers);
        for index in 0..cfg.num_hidden_layers {
            layers.push(
                DecoderLayer::new(cfg, rotary.clone(), vb_layers.pp(index))
                    .with_context(|| format!("failed to load decoder layer {index}"))?,
            );
        }
        let norm = rms_norm(cfg.hidden_size, cfg.rms_norm_eps, vb_m.pp("norm"))?;
        let lm_head = if cfg.tie_word_embeddings || !vb.contains_tensor("lm_head.weight") {
            Linear::new(embed_tokens.embeddings().clone(), None)
        } else {
            linear_no_bias(cfg.hidden_size, cfg.vocab_size, vb.pp("lm_head"))?
        };
        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            device: vb.device().clone(),
            dtype: vb.dtype(),
            hidden_size: cfg.hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Look up embeddings for a `[batch, seq]` id tensor.
    pub fn embed_tokens(&self, input_ids: &Tensor) -> Result<Tensor> {
        let input_ids = if input_ids.dtype() == DType::U32 {
            input_ids.clone()
        } else {
            input_ids.to_dtype(DType::U32)?
        };
        Ok(self.embed_tokens.forward(&input_ids)?)
    }

    /// Run the decoder over precomputed embeddings and return logits.
    ///
    /// `attention_mask` is an optional `[batch, total_len]` 0/1 mask over
    /// cached plus current positions. `logits_to_keep` trims the output to
    /// the last N positions before the LM head; 0 keeps every position.
    pub fn forward_embeds(
        &mut self,
        inputs_embeds: &Tensor,
        attention_mask: Option<&Tensor>,
        seqlen_offset: usize,
        logits_to_keep: usize,
    ) -> Result<Tensor> {
        let (batch, seq_len, _hidden) = inputs_embeds.dims3()?;
        let mask = self.build_mask(batch, seq_len, seqlen_offset, attention_mask)?;

        let mut xs = inputs_embeds.clone();
        for layer in self.layers.iter_mut() {
            xs = layer.forward(&xs, mask.as_ref(), seqlen_offset)?;
        }
        let mut hidden = self.norm.forward(&xs)?;
        if logits_to_keep > 0 && logits_to_keep < seq_len {
            hidden = hidden.narrow(1, seq_len - logits_to_keep, logits_to_keep)?;
        }
        Ok(self.lm_head.forward(&hidden)?)
    }

    /// Drop all cached key/value state.
    pub fn clear_kv_cache(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.clear_kv_cache();
        }
    }

    /// Additive `[batch, 1, seq, total]` mask combining causality with an
    /// optional caller-provided padding mask.
    fn build_mask(
        &self,
        batch: usize,
        seq_len: usize,
        seqlen_offset: usize,
        attention_mask: Option<&Tensor>,
    ) -> Result<Option<Tensor>> {
        let total_len = seqlen_offset + seq_len;
        if seq_len <= 1 && attention_mask.is_none() {
            return Ok(None);
        }

        let causal: Vec<f32> = (0..seq_len)
            .flat_map(|query| {
                (0..total_len).map(move |key| {
                    if key > seqlen_offset + query {
                        f32::MIN
                    } else {
                        0.0
                    }
                })
            })
            .collect();
        let causal = Tensor::from_vec(causal, (seq_len, total_len), &self.device)?
            .unsqueeze(0)?
            .unsqueeze(0)?;

        let mask = match attention_mask {
            None => causal.expand((batch, 1, seq_len, total_len))?,
            Some(padding) => {
                let (mask_batch, mask_len) = padding.dims2()?;
                ensure!(
                    mask_batch == batch && mask_len == total_len,
                    "attention mask shape ({mask_batch}, {mask_len}) does not match \
                     batch {batch} with total length {total_len}"
                );
                // 1 -> keep (0.0), 0 -> mask (f32::MIN), then fold into the
                // causal component.
                let padding = padding.to_dtype(DType::F32)?;
                let blocked = ((padding.ones_like()? - &padding)? * f64::from(f32::MIN))?;
                let blocked = blocked.unsqueeze(1)?.unsqueeze(2)?;
                causal
                    .broadcast_add(&blocked)?
                    .expand((batch, 1, seq_len, total_len))?
            }
        };
        Ok(Some(mask.to_dtype(self.dtype)?))
    }
}
