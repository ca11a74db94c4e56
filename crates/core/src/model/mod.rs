//! Conditional-generation wrapper fusing vision features into the language
//! model's input embeddings.

use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::{
    config::InternVLConfig,
    error::VisionError,
    language::LanguageModel,
    sampling::{self, DecodeParameters},
    vision::InternVLVisionModel,
};

pub mod fusion;
mod projector;

pub use fusion::{pixel_shuffle, scatter_image_features};
pub use projector::MultiModalProjector;

/// Options controlling autoregressive generation.
pub struct GenerateOptions<'a> {
    pub max_new_tokens: usize,
    pub eos_token_id: Option<i64>,
    pub decode: DecodeParameters,
    pub progress_callback: Option<&'a dyn Fn(usize, &[i64])>,
}

impl<'a> GenerateOptions<'a> {
    pub fn new(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            eos_token_id: None,
            decode: DecodeParameters::default(),
            progress_callback: None,
        }
    }
}

/// Vision tower + projector + causal language model.
pub struct InternVLModel {
    cfg: Arc<InternVLConfig>,
    vision_tower: InternVLVisionModel,
    multi_modal_projector: MultiModalProjector,
    language_model: LanguageModel,
    device: Device,
    dtype: DType,
}

impl InternVLModel {
    /// Wire the three submodels from a weight store rooted at the top level
    /// (`vision_tower.*`, `multi_modal_projector.*`, `language_model.*`).
    pub fn load(cfg: InternVLConfig, vb: VarBuilder) -> Result<Self> {
        let cfg = Arc::new(cfg);
        let vision_tower = InternVLVisionModel::new(&cfg.vision_config, vb.pp("vision_tower"))
            .context("failed to load vision tower")?;
        let multi_modal_projector =
            MultiModalProjector::new(cfg.as_ref(), vb.pp("multi_modal_projector"))
                .context("failed to load multimodal projector")?;
        let language_model = LanguageModel::new(&cfg.text_config, vb.pp("language_model"))
            .context("failed to load language model")?;
        Ok(Self {
            cfg,
            vision_tower,
            multi_modal_projector,
            language_model,
            device: vb.device().clone(),
            dtype: vb.dtype(),
        })
    }

    pub fn config(&self) -> &InternVLConfig {
        self.cfg.as_ref()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Encode tiles and project them into the language embedding space.
    ///
    /// `pixel_values` is `[tiles, channels, height, width]`; the result is
    /// `[tiles, tokens_per_tile, text_hidden]` where the class token has
    /// been dropped and the spatial grid pixel-shuffled by the configured
    /// downsample ratio.
    pub fn get_image_features(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let hidden = self.vision_hidden_state(pixel_values)?;
        let (tiles, tokens, hidden_size) = hidden.dims3()?;
        ensure!(
            tokens > 1,
            "vision encoder returned {tokens} tokens, expected a class token plus patches"
        );

        let patches = hidden.narrow(1, 1, tokens - 1)?;
        let grid_tokens = tokens - 1;
        let side = (grid_tokens as f64).sqrt() as usize;
        if side * side != grid_tokens {
            return Err(VisionError::ShapeMismatch(format!(
                "vision token count {grid_tokens} is not a perfect square"
            ))
            .into());
        }

        let spatial = patches.reshape((tiles, side, side, hidden_size))?;
        let shuffled = fusion::pixel_shuffle(&spatial, self.cfg.downsample_ratio)?;
        let (_, out_w, out_h, out_c) = shuffled.dims4()?;
        let flat = shuffled.reshape((tiles, out_w * out_h, out_c))?;
        self.multi_modal_projector.forward(&flat)
    }

    /// Forward pass returning logits.
    ///
    /// Exactly one of `input_ids` / `inputs_embeds` must be provided. When
    /// `pixel_values` is present, the placeholder positions in `input_ids`
    /// are replaced with projected image features before the decoder runs.
    /// `attention_mask`, `seqlen_offset` (cache state), and
    /// `logits_to_keep` are handed to the language model unmodified.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &mut self,
        input_ids: Option<&Tensor>,
        inputs_embeds: Option<Tensor>,
        pixel_values: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        seqlen_offset: usize,
        logits_to_keep: usize,
    ) -> Result<Tensor> {
        ensure!(
            input_ids.is_some() ^ inputs_embeds.is_some(),
            "provide exactly one of input_ids or inputs_embeds"
        );
        ensure!(
            !(pixel_values.is_some() && inputs_embeds.is_some()),
            "pixel_values cannot be combined with precomputed inputs_embeds"
        );

        let mut embeds = match inputs_embeds {
            Some(embeds) => embeds,
            None => self
                .language_model
                .embed_tokens(input_ids.expect("validated above"))?,
        };

        if let Some(pixels) = pixel_values {
            let ids = input_ids.expect("input_ids accompany pixel_values");
            let features = self.get_image_features(pixels)?;
            let (tiles, tokens_per_tile, hidden) = features.dims3()?;
            debug!(tiles, tokens_per_tile, "fusing image features");
            let flat = features.reshape((tiles * tokens_per_tile, hidden))?;
            embeds = fusion::scatter_image_features(&embeds, ids, &flat, self.cfg.image_token_id)?;
        }

        self.language_model
            .forward_embeds(&embeds, attention_mask, seqlen_offset, logits_to_keep)
    }

    /// Greedy/sampled autoregressive generation for a single sequence.
    pub fn generate(
        &mut self,
        input_ids: &Tensor,
        pixel_values: Option<&Tensor>,
        options: GenerateOptions<'_>,
    ) -> Result<Tensor> {
        let (batch, prompt_len) = input_ids.dims2()?;
        ensure!(batch == 1, "generate supports batch size 1, got {batch}");
        if options.max_new_tokens == 0 {
            return self.empty_generation();
        }

        self.language_model.clear_kv_cache();
        let mut rng = sampling::init_rng(options.decode.seed);
        let mut context: Vec<i64> = input_ids
            .to_dtype(DType::I64)?
            .flatten_all()?
            .to_vec1::<i64>()?;

        let prefill = self.forward(Some(input_ids), None, pixel_values, None, 0, 1)?;
        let logits = prefill.get(0)?.get(0)?;
        let mut current = sampling::select_token_id(&logits, &options.decode, &context, &mut rng)?;

        let mut generated: Vec<i64> = Vec::with_capacity(options.max_new_tokens);
        loop {
            if options.eos_token_id == Some(current) {
                break;
            }
            generated.push(current);
            context.push(current);
            if let Some(callback) = options.progress_callback {
                callback(generated.len(), &generated);
            }
            if generated.len() == options.max_new_tokens {
                break;
            }

            let step_input = Tensor::from_vec(vec![current], (1, 1), &self.device)?
                .to_dtype(DType::I64)?;
            let offset = prompt_len + generated.len() - 1;
            let step = self.forward(Some(&step_input), None, None, None, offset, 1)?;
            let logits = step.get(0)?.get(0)?;
            current = sampling::select_token_id(&logits, &options.decode, &context, &mut rng)?;
        }

        let len = generated.len();
        Ok(Tensor::from_vec(generated, (1, len), &self.device)?.to_dtype(DType::I64)?)
    }

    /// Drop cached decoder state between independent prompts.
    pub fn clear_kv_cache(&mut self) {
        self.language_model.clear_kv_cache();
    }

    fn vision_hidden_state(&self, pixel_values: &Tensor) -> Result<Tensor> {
        if self.cfg.vision_feature_layer == -1 {
            return self.vision_tower.forward(pixel_values);
        }
        let states = self.vision_tower.forward_hidden_states(pixel_values)?;
        let count = states.len() as i64;
        let index = if self.cfg.vision_feature_layer < 0 {
            count + self.cfg.vision_feature_layer
        } else {
            self.cfg.vision_feature_layer
        };
        ensure!(
            (0..count).contains(&index),
            "vision_feature_layer {} is out of range for {count} hidden states",
            self.cfg.vision_feature_layer
        );
        Ok(states[index as usize].clone())
    }

    fn empty_generation(&self) -> Result<Tensor> {
        Ok(Tensor::from_vec(Vec::<i64>::new(), (1, 0), &self.device)?.to_dtype(DType::I64)?)
    }
}
