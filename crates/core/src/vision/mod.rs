pub mod encoder;
pub mod processor;
pub mod resample;
pub mod tiling;

pub use encoder::InternVLVisionModel;
pub use processor::{ImageProcessor, ImageProcessorConfig, ImageSize, PixelValues, TileBatch};
pub use tiling::{select_tile_grid, supported_tile_grids, TileGrid};
