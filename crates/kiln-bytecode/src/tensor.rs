//! Dense tensor values and device tags
//!
//! Tensors are stored as row-major `f64` data with an explicit shape. The
//! device is a placement tag only; data always lives in host memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placement tag for tensor data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    /// Host CPU
    #[default]
    Cpu,
    /// CUDA accelerator with ordinal
    Cuda(u8),
    /// Apple Metal
    Mps,
}

impl Device {
    /// Tag byte used in the binary encoding
    pub(crate) fn tag(self) -> (u8, u8) {
        match self {
            Device::Cpu => (0, 0),
            Device::Cuda(index) => (1, index),
            Device::Mps => (2, 0),
        }
    }

    pub(crate) fn from_tag(tag: u8, index: u8) -> Option<Self> {
        match tag {
            0 => Some(Device::Cpu),
            1 => Some(Device::Cuda(index)),
            2 => Some(Device::Mps),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
            Device::Mps => f.write_str("mps"),
        }
    }
}

/// Error parsing a device string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid device string: {0:?}")]
pub struct ParseDeviceError(pub String);

impl FromStr for Device {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDeviceError(s.to_string());
        match s.split_once(':') {
            None => match s {
                "cpu" => Ok(Device::Cpu),
                "cuda" => Ok(Device::Cuda(0)),
                "mps" => Ok(Device::Mps),
                _ => Err(err()),
            },
            Some(("cuda", index)) => index.parse().map(Device::Cuda).map_err(|_| err()),
            Some(_) => Err(err()),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = ParseDeviceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

/// Dense row-major tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Dimension sizes
    pub shape: Vec<usize>,
    /// Row-major element data
    pub data: Vec<f64>,
    /// Placement tag
    #[serde(default)]
    pub device: Device,
}

impl Tensor {
    /// Create a 1-D CPU tensor from data
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
            device: Device::Cpu,
        }
    }

    /// Create a tensor with an explicit shape
    ///
    /// Returns `None` when the shape's element count doesn't match `data`.
    pub fn with_shape(shape: Vec<usize>, data: Vec<f64>) -> Option<Self> {
        (element_count(&shape) == Some(data.len())).then_some(Self {
            shape,
            data,
            device: Device::Cpu,
        })
    }

    /// Zero-filled 1-D tensor
    pub fn zeros(len: usize) -> Self {
        Self::from_vec(vec![0.0; len])
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Copy of this tensor placed on `device`
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.clone(),
            device,
        }
    }

    /// Apply `f` to each element, keeping shape and device
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
            device: self.device,
        }
    }
}

/// Product of dimension sizes, `None` on overflow
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}
