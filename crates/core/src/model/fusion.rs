//! Feature downsampling and image-token fusion.

use anyhow::Result;
use candle_core::{DType, Tensor};

use crate::error::VisionError;

/// Pixel-shuffle downsampling over `[batch, width, height, channels]`
/// feature maps.
///
/// Trades spatial resolution for channel depth: the result has shape
/// `[batch, width * scale, height * scale, channels / scale^2]`, conserving
/// the total element count. Pure reshape/permute arithmetic, no parameters.
pub fn pixel_shuffle(features: &Tensor, scale_factor: f64) -> Result<Tensor> {
    if scale_factor <= 0.0 {
        return Err(VisionError::InvalidArgument(format!(
            "pixel shuffle scale factor must be positive, got {scale_factor}"
        ))
        .into());
    }
    let (batch, width, height, channels) = features.dims4()?;

    let scaled_h = height as f64 * scale_factor;
    let scaled_w = width as f64 * scale_factor;
    let folded_c = channels as f64 / scale_factor;
    let final_c = channels as f64 / (scale_factor * scale_factor);
    if scaled_h.fract() != 0.0
        || scaled_w.fract() != 0.0
        || folded_c.fract() != 0.0
        || final_c.fract() != 0.0
    {
        return Err(VisionError::ShapeMismatch(format!(
            "feature dimensions {width}x{height}x{channels} are not divisible \
             by scale factor {scale_factor}"
        ))
        .into());
    }

    // Fold rows into channels, swap the spatial axes, fold columns into
    // channels, then swap back.
    let out = features
        .reshape((batch, width, scaled_h as usize, folded_c as usize))?
        .permute((0, 2, 1, 3))?
        .contiguous()?
        .reshape((
            batch,
            scaled_h as usize,
            scaled_w as usize,
            final_c as usize,
        ))?
        .permute((0, 2, 1, 3))?
        .contiguous()?;
    Ok(out)
}

/// Replace every image-placeholder position in `inputs_embeds` with a row of
/// `image_features`, walking both in left-to-right order.
///
/// `inputs_embeds` is `[batch, seq, hidden]`, `input_ids` `[batch, seq]`,
/// and `image_features` `[num_feature_rows, hidden]` (image tiles flattened
/// in batch order). The number of placeholder positions across the batch
/// must equal the number of feature rows exactly. `input_ids` is only read.
pub fn scatter_image_features(
    inputs_embeds: &Tensor,
    input_ids: &Tensor,
    image_features: &Tensor,
    image_token_id: i64,
) -> Result<Tensor> {
    let (batch, seq_len, hidden) = inputs_embeds.dims3()?;
    let (feature_rows, feature_hidden) = image_features.dims2()?;
    if feature_hidden != hidden {
        return Err(VisionError::ShapeMismatch(format!(
            "image feature width {feature_hidden} does not match embedding width {hidden}"
        ))
        .into());
    }

    let ids = input_ids.to_dtype(DType::I64)?.to_vec2::<i64>()?;
    let placeholder_count: usize = ids
        .iter()
        .flatten()
        .filter(|&&id| id == image_token_id)
        .count();
    if placeholder_count != feature_rows {
        return Err(VisionError::ShapeMismatch(format!(
            "image features and image tokens do not match: \
             tokens {placeholder_count}, features {feature_rows}"
        ))
        .into());
    }
    if placeholder_count == 0 {
        return Ok(inputs_embeds.clone());
    }

    let features = if image_features.dtype() == inputs_embeds.dtype() {
        image_features.clone()
    } else {
        image_features.to_dtype(inputs_embeds.dtype())?
    };

    // Each fused row is gathered out of [text row; feature rows]: position i
    // selects either its own embedding (index i) or the next unconsumed
    // feature row (index seq_len + cursor).
    let mut cursor = 0u32;
    let mut fused_rows = Vec::with_capacity(batch);
    for (row_index, row_ids) in ids.iter().enumerate() {
        let mut sources = Vec::with_capacity(seq_len);
        for (position, &id) in row_ids.iter().enumerate() {
            if id == image_token_id {
                sources.push(seq_len as u32 + cursor);
                cursor += 1;
            } else {
                sources.push(position as u32);
            }
        }
        let row = inputs_embeds.get(row_index)?;
        let pool = Tensor::cat(&[&row, &features], 0)?;
        let index = Tensor::from_vec(sources, (seq_len,), inputs_embeds.device())?;
        fused_rows.push(pool.index_select(&index, 0)?);
    }
    Ok(Tensor::stack(&fused_rows, 0)?)
}
