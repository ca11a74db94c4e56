use anyhow::{Context, Result};
use candle_core::{DType, Device};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
    Bf16,
}

impl From<Precision> for DType {
    fn from(p: Precision) -> DType {
        match p {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

/// Materialize the requested device.
pub fn select_device(kind: DeviceKind) -> Result<Device> {
    match kind {
        DeviceKind::Cpu => Ok(Device::Cpu),
        DeviceKind::Cuda => Device::new_cuda(0).context("failed to initialise CUDA device"),
        DeviceKind::Metal => Device::new_metal(0).context("failed to initialise Metal device"),
    }
}

/// Pick a dtype: an explicit precision wins, otherwise accelerators default
/// to f16 and the CPU to f32.
pub fn resolve_dtype(device: &Device, precision: Option<Precision>) -> DType {
    match precision {
        Some(p) => p.into(),
        None if device.is_cuda() || device.is_metal() => DType::F16,
        None => DType::F32,
    }
}
