use std::sync::Once;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use image::{imageops, DynamicImage, GenericImageView, RgbImage};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::warn;

use crate::error::VisionError;

use super::{resample::resize_bicubic, tiling};

/// Normalization constants of the CLIP image distribution.
pub const CLIP_IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

static RESCALE_WARNING: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    #[default]
    Bicubic,
    Bilinear,
    Nearest,
}

/// Knobs of the tiling image processor, HF `preprocessor_config.json`
/// compatible.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageProcessorConfig {
    pub do_resize: bool,
    pub size: ImageSize,
    pub resample: ResampleFilter,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    pub do_convert_rgb: bool,
    pub min_patches: u32,
    pub max_patches: u32,
    pub use_thumbnail: bool,
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: ImageSize {
                height: 448,
                width: 448,
            },
            resample: ResampleFilter::Bicubic,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: CLIP_IMAGE_MEAN,
            image_std: CLIP_IMAGE_STD,
            do_convert_rgb: true,
            min_patches: 1,
            max_patches: 12,
            use_thumbnail: true,
        }
    }
}

/// Row-major tiles cut from one image, thumbnail last when present.
#[derive(Debug, Clone)]
pub struct TileBatch {
    pub tiles: Vec<RgbImage>,
    pub grid: tiling::TileGrid,
}

impl TileBatch {
    /// Tile count including the optional trailing thumbnail.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Stacked pixel data for a batch of images.
#[derive(Debug)]
pub struct PixelValues {
    /// `[total_tiles, 3, tile_height, tile_width]`, channels first.
    pub pixel_values: Tensor,
    /// Tiles contributed by each input image, in input order.
    pub tiles_per_image: Vec<usize>,
}

/// Tiling image processor: dynamic grid selection, fixed-size crops,
/// rescale + normalize into a channels-first tensor.
#[derive(Debug, Clone, Default)]
pub struct ImageProcessor {
    cfg: ImageProcessorConfig,
}

impl ImageProcessor {
    pub fn new(cfg: ImageProcessorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ImageProcessorConfig {
        &self.cfg
    }

    /// Cut `image` into grid tiles of `size`, appending a whole-image
    /// thumbnail when more than one tile was produced.
    pub fn crop_to_tiles(&self, image: &DynamicImage) -> Result<TileBatch> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidArgument(format!(
                "image has non-positive dimensions {width}x{height}"
            ))
            .into());
        }
        let (tile_height, tile_width) = (self.cfg.size.height, self.cfg.size.width);
        if tile_height == 0 || tile_width == 0 {
            return Err(VisionError::InvalidArgument(
                "tile size must have positive height and width".to_string(),
            )
            .into());
        }

        let base = self.to_rgb(image)?;
        let grid = tiling::select_tile_grid(
            (height, width),
            (tile_height, tile_width),
            self.cfg.min_patches,
            self.cfg.max_patches,
        );
        let (columns, rows) = grid;

        let canvas = self.resize(&base, columns * tile_width, rows * tile_height);
        let mut tiles = Vec::with_capacity((columns * rows) as usize + 1);
        for index in 0..columns * rows {
            let column = index % columns;
            let row = index / columns;
            let tile = imageops::crop_imm(
                &canvas,
                column * tile_width,
                row * tile_height,
                tile_width,
                tile_height,
            )
            .to_image();
            tiles.push(tile);
        }

        // The thumbnail comes from the original image, not the tiling canvas.
        if self.cfg.use_thumbnail && tiles.len() > 1 {
            tiles.push(self.resize(&base, tile_width, tile_height));
        }

        Ok(TileBatch { tiles, grid })
    }

    /// Run the full pipeline over a batch of images and stack the result
    /// into a `[total_tiles, 3, H, W]` tensor.
    pub fn preprocess(
        &self,
        images: &[DynamicImage],
        device: &Device,
        dtype: DType,
    ) -> Result<PixelValues> {
        if images.is_empty() {
            return Err(
                VisionError::InvalidArgument("no images provided to preprocess".to_string()).into(),
            );
        }

        let mut tiles = Vec::new();
        let mut tiles_per_image = Vec::with_capacity(images.len());
        for image in images {
            let already_rescaled = is_rescaled_input(image);
            if already_rescaled && self.cfg.do_rescale {
                RESCALE_WARNING.call_once(|| {
                    warn!(
                        "input pixel values already look rescaled to [0, 1]; \
                         set do_rescale=false to avoid rescaling them again"
                    );
                });
            }
            let batch = if self.cfg.do_resize {
                self.crop_to_tiles(image)?
            } else {
                TileBatch {
                    tiles: vec![self.to_rgb(image)?],
                    grid: (1, 1),
                }
            };
            tiles_per_image.push(batch.len());
            for tile in batch.tiles {
                tiles.push((tile, already_rescaled));
            }
        }

        let buffers: Vec<Vec<f32>> = tiles
            .par_iter()
            .map(|(tile, restore_range)| self.tile_pixels(tile, *restore_range))
            .collect();

        let mut stacked = Vec::with_capacity(buffers.len());
        for ((tile, _), data) in tiles.iter().zip(buffers) {
            let (w, h) = (tile.width() as usize, tile.height() as usize);
            stacked.push(Tensor::from_vec(data, (3, h, w), device)?);
        }
        let mut pixel_values = Tensor::stack(&stacked, 0)?;
        if pixel_values.dtype() != dtype {
            pixel_values = pixel_values.to_dtype(dtype)?;
        }

        Ok(PixelValues {
            pixel_values,
            tiles_per_image,
        })
    }

    fn to_rgb(&self, image: &DynamicImage) -> Result<RgbImage> {
        if !self.cfg.do_convert_rgb && !matches!(image, DynamicImage::ImageRgb8(_)) {
            return Err(VisionError::UnsupportedInput(
                "non-RGB image provided while do_convert_rgb is disabled".to_string(),
            )
            .into());
        }
        Ok(image.to_rgb8())
    }

    fn resize(&self, image: &RgbImage, width: u32, height: u32) -> RgbImage {
        match self.cfg.resample {
            ResampleFilter::Bicubic => resize_bicubic(image, width, height),
            ResampleFilter::Bilinear => {
                imageops::resize(image, width, height, imageops::FilterType::Triangle)
            }
            ResampleFilter::Nearest => {
                imageops::resize(image, width, height, imageops::FilterType::Nearest)
            }
        }
    }

    /// Channels-first f32 buffer for one tile.
    ///
    /// `restore_range` undoes the implicit [0, 255] expansion applied when a
    /// float image was converted through the 8-bit representation, so the
    /// rescale/normalize math sees the caller's original value range.
    fn tile_pixels(&self, tile: &RgbImage, restore_range: bool) -> Vec<f32> {
        let (width, height) = (tile.width(), tile.height());
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for channel in 0..3usize {
            for y in 0..height {
                for x in 0..width {
                    let mut value = tile.get_pixel(x, y)[channel] as f32;
                    if restore_range {
                        value /= 255.0;
                    }
                    if self.cfg.do_rescale {
                        value *= self.cfg.rescale_factor;
                    }
                    if self.cfg.do_normalize {
                        value =
                            (value - self.cfg.image_mean[channel]) / self.cfg.image_std[channel];
                    }
                    data.push(value);
                }
            }
        }
        data
    }
}

fn is_rescaled_input(image: &DynamicImage) -> bool {
    matches!(
        image,
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)
    )
}
