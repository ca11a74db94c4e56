use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use internvl_core::model::scatter_image_features;
use internvl_core::VisionError;

const IMG: i64 = 151667;

fn embeds_from(rows: &[[f32; 4]]) -> Result<Tensor> {
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (1, rows.len(), 4), &Device::Cpu)?)
}

#[test]
fn placeholders_are_replaced_in_order() -> Result<()> {
    let embeds = embeds_from(&[
        [0.0; 4],
        [1.0; 4],
        [2.0; 4],
        [3.0; 4],
        [4.0; 4],
        [5.0; 4],
    ])?;
    let ids = Tensor::from_vec(vec![5i64, IMG, IMG, 7, IMG, 9], (1, 6), &Device::Cpu)?;
    let features = Tensor::from_vec(
        vec![
            100.0f32, 100.0, 100.0, 100.0, //
            200.0, 200.0, 200.0, 200.0, //
            300.0, 300.0, 300.0, 300.0,
        ],
        (3, 4),
        &Device::Cpu,
    )?;

    let fused = scatter_image_features(&embeds, &ids, &features, IMG)?;
    let rows = fused.get(0)?.to_vec2::<f32>()?;
    assert_eq!(rows[0], [0.0; 4]);
    assert_eq!(rows[1], [100.0; 4]);
    assert_eq!(rows[2], [200.0; 4]);
    assert_eq!(rows[3], [3.0; 4]);
    assert_eq!(rows[4], [300.0; 4]);
    assert_eq!(rows[5], [5.0; 4]);

    // The id tensor is read-only for the fusion step.
    assert_eq!(
        ids.to_vec2::<i64>()?,
        vec![vec![5, IMG, IMG, 7, IMG, 9]]
    );
    Ok(())
}

#[test]
fn feature_rows_are_consumed_across_the_batch_row_major() -> Result<()> {
    let flat: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let embeds = Tensor::from_vec(flat, (2, 3, 2), &Device::Cpu)?;
    let ids = Tensor::from_vec(vec![IMG, 1, IMG, 2, IMG, 3], (2, 3), &Device::Cpu)?;
    let features = Tensor::from_vec(
        vec![10.0f32, 10.0, 20.0, 20.0, 30.0, 30.0],
        (3, 2),
        &Device::Cpu,
    )?;

    let fused = scatter_image_features(&embeds, &ids, &features, IMG)?;
    let batch = fused.to_vec3::<f32>()?;
    assert_eq!(batch[0][0], [10.0, 10.0]);
    assert_eq!(batch[0][1], [2.0, 3.0]);
    assert_eq!(batch[0][2], [20.0, 20.0]);
    assert_eq!(batch[1][0], [6.0, 7.0]);
    assert_eq!(batch[1][1], [30.0, 30.0]);
    assert_eq!(batch[1][2], [10.0, 11.0]);
    Ok(())
}

#[test]
fn mismatched_counts_are_rejected() -> Result<()> {
    let embeds = Tensor::zeros((1, 5, 4), DType::F32, &Device::Cpu)?;
    let ids = Tensor::from_vec(vec![IMG, IMG, IMG, IMG, IMG], (1, 5), &Device::Cpu)?;
    let features = Tensor::zeros((4, 4), DType::F32, &Device::Cpu)?;

    let err = scatter_image_features(&embeds, &ids, &features, IMG).unwrap_err();
    assert!(err.to_string().contains("do not match"));
    assert!(matches!(
        err.downcast_ref::<VisionError>(),
        Some(VisionError::ShapeMismatch(_))
    ));
    Ok(())
}

#[test]
fn mismatched_hidden_width_is_rejected() -> Result<()> {
    let embeds = Tensor::zeros((1, 2, 4), DType::F32, &Device::Cpu)?;
    let ids = Tensor::from_vec(vec![IMG, 1], (1, 2), &Device::Cpu)?;
    let features = Tensor::zeros((1, 8), DType::F32, &Device::Cpu)?;
    let err = scatter_image_features(&embeds, &ids, &features, IMG).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VisionError>(),
        Some(VisionError::ShapeMismatch(_))
    ));
    Ok(())
}

#[test]
fn no_placeholders_with_no_features_is_a_passthrough() -> Result<()> {
    let embeds = embeds_from(&[[1.0; 4], [2.0; 4]])?;
    let ids = Tensor::from_vec(vec![3i64, 4], (1, 2), &Device::Cpu)?;
    let features = Tensor::zeros((0, 4), DType::F32, &Device::Cpu)?;
    let fused = scatter_image_features(&embeds, &ids, &features, IMG)?;
    assert_eq!(
        fused.flatten_all()?.to_vec1::<f32>()?,
        embeds.flatten_all()?.to_vec1::<f32>()?
    );
    Ok(())
}
