pub mod config;
pub mod error;
pub mod language;
pub mod model;
pub mod prompt;
pub mod runtime;
pub mod sampling;
pub mod streaming;
pub mod vision;

pub use config::{load_model_config, InternVLConfig, InternVLVisionConfig, TextConfig};
pub use error::VisionError;
pub use model::{GenerateOptions, InternVLModel};
pub use sampling::DecodeParameters;
pub use vision::{ImageProcessor, ImageProcessorConfig, PixelValues};
