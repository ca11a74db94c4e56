use anyhow::Result;
use candle_core::{DType, Device, IndexOp};
use image::{DynamicImage, Rgb, RgbImage};
use internvl_core::vision::{ImageProcessor, ImageProcessorConfig};
use internvl_core::VisionError;

fn solid_image(width: u32, height: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value; 3])))
}

#[test]
fn wide_image_tiles_plus_thumbnail() -> Result<()> {
    let processor = ImageProcessor::new(ImageProcessorConfig::default());
    let batch = processor.crop_to_tiles(&solid_image(800, 400, 128))?;
    assert_eq!(batch.grid, (2, 1));
    // Two grid tiles and the whole-image thumbnail.
    assert_eq!(batch.len(), 3);
    for tile in &batch.tiles {
        assert_eq!((tile.width(), tile.height()), (448, 448));
    }
    Ok(())
}

#[test]
fn single_tile_images_get_no_thumbnail() -> Result<()> {
    let processor = ImageProcessor::new(ImageProcessorConfig::default());
    let batch = processor.crop_to_tiles(&solid_image(500, 500, 128))?;
    assert_eq!(batch.grid, (1, 1));
    assert_eq!(batch.len(), 1);
    Ok(())
}

#[test]
fn thumbnail_can_be_disabled() -> Result<()> {
    let cfg = ImageProcessorConfig {
        use_thumbnail: false,
        ..ImageProcessorConfig::default()
    };
    let processor = ImageProcessor::new(cfg);
    let batch = processor.crop_to_tiles(&solid_image(800, 400, 128))?;
    assert_eq!(batch.len(), 2);
    Ok(())
}

#[test]
fn tiles_are_emitted_row_major() -> Result<()> {
    // Left half red, right half green; the (2, 1) grid must keep that order.
    let mut img = RgbImage::new(800, 400);
    for (x, _y, pixel) in img.enumerate_pixels_mut() {
        *pixel = if x < 400 {
            Rgb([250, 0, 0])
        } else {
            Rgb([0, 250, 0])
        };
    }
    let cfg = ImageProcessorConfig {
        use_thumbnail: false,
        ..ImageProcessorConfig::default()
    };
    let processor = ImageProcessor::new(cfg);
    let batch = processor.crop_to_tiles(&DynamicImage::ImageRgb8(img))?;
    assert_eq!(batch.len(), 2);
    let left = batch.tiles[0].get_pixel(224, 224);
    let right = batch.tiles[1].get_pixel(224, 224);
    assert!(left[0] > 200 && left[1] < 50);
    assert!(right[1] > 200 && right[0] < 50);
    Ok(())
}

#[test]
fn zero_tile_size_is_rejected() {
    let mut cfg = ImageProcessorConfig::default();
    cfg.size.height = 0;
    let processor = ImageProcessor::new(cfg);
    let err = processor
        .crop_to_tiles(&solid_image(100, 100, 1))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VisionError>(),
        Some(VisionError::InvalidArgument(_))
    ));
}

#[test]
fn preprocess_stacks_all_tiles_channels_first() -> Result<()> {
    let processor = ImageProcessor::new(ImageProcessorConfig::default());
    let images = [solid_image(800, 400, 128), solid_image(500, 500, 10)];
    let out = processor.preprocess(&images, &Device::Cpu, DType::F32)?;
    assert_eq!(out.tiles_per_image, vec![3, 1]);
    assert_eq!(out.pixel_values.dims4()?, (4, 3, 448, 448));
    Ok(())
}

#[test]
fn preprocess_applies_rescale_and_clip_normalization() -> Result<()> {
    let processor = ImageProcessor::new(ImageProcessorConfig::default());
    let images = [solid_image(448, 448, 255)];
    let out = processor.preprocess(&images, &Device::Cpu, DType::F32)?;
    let cfg = processor.config();
    for channel in 0..3 {
        let value: f32 = out
            .pixel_values
            .i((0, channel, 0, 0))?
            .to_scalar::<f32>()?;
        let expected = (1.0 - cfg.image_mean[channel]) / cfg.image_std[channel];
        assert!((value - expected).abs() < 1e-5, "channel {channel}");
    }
    Ok(())
}

#[test]
fn empty_batch_is_rejected() {
    let processor = ImageProcessor::new(ImageProcessorConfig::default());
    let err = processor
        .preprocess(&[], &Device::Cpu, DType::F32)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VisionError>(),
        Some(VisionError::InvalidArgument(_))
    ));
}
