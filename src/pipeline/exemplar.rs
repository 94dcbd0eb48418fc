//! Type descriptors ("exemplars") carried by pads.
//!
//! An exemplar describes the shape of every buffer that flows through a pad.
//! Linking two pads requires identical exemplars; after a link the sink pad
//! shares the producer's exemplar so downstream stages always see the
//! authoritative shape.

use crate::types::{Dimensions, PixelFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage width of one raw sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawContainer {
    Bits8,
    Bits16,
    Bits32,
}

impl RawContainer {
    pub fn bytes(&self) -> usize {
        match self {
            RawContainer::Bits8 => 1,
            RawContainer::Bits16 => 2,
            RawContainer::Bits32 => 4,
        }
    }
}

/// Which end of the container holds the significant bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Justification {
    Msb,
    Lsb,
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorType {
    #[default]
    U8,
    I8,
    U16,
    I16,
    F32,
}

impl TensorType {
    pub fn size_bytes(&self) -> usize {
        match self {
            TensorType::U8 | TensorType::I8 => 1,
            TensorType::U16 | TensorType::I16 => 2,
            TensorType::F32 => 4,
        }
    }
}

/// Shape descriptor of a pad's buffers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Exemplar {
    /// Raster image.
    Image {
        format: PixelFormat,
        dims: Dimensions,
    },
    /// Raw (bayer) sensor frame.
    Raw {
        dims: Dimensions,
        bit_depth: u8,
        container: RawContainer,
        justification: Justification,
    },
    /// N-dimensional tensor.
    Tensor { data_type: TensorType, shape: Vec<usize> },
    /// Opaque record of fixed size (statistics, parameters).
    UserData { name: String, size: usize },
}

impl Exemplar {
    pub fn image(format: PixelFormat, width: u32, height: u32) -> Self {
        Exemplar::Image {
            format,
            dims: Dimensions::new(width, height),
        }
    }

    pub fn tensor(data_type: TensorType, shape: impl Into<Vec<usize>>) -> Self {
        Exemplar::Tensor {
            data_type,
            shape: shape.into(),
        }
    }

    pub fn user_data(name: impl Into<String>, size: usize) -> Self {
        Exemplar::UserData {
            name: name.into(),
            size,
        }
    }

    /// Bytes of backing storage for one channel, `None` on overflow or an
    /// empty shape.
    pub fn byte_size(&self) -> Option<usize> {
        let size = match self {
            Exemplar::Image { format, dims } => format.frame_size(*dims)?,
            Exemplar::Raw {
                dims, container, ..
            } => usize::try_from(dims.area())
                .ok()?
                .checked_mul(container.bytes())?,
            Exemplar::Tensor { data_type, shape } => {
                if shape.is_empty() {
                    return None;
                }
                shape
                    .iter()
                    .try_fold(data_type.size_bytes(), |acc, &d| acc.checked_mul(d))?
            }
            Exemplar::UserData { size, .. } => *size,
        };
        (size > 0).then_some(size)
    }

    /// Image dimensions, if this exemplar is a raster or raw frame.
    pub fn dimensions(&self) -> Option<Dimensions> {
        match self {
            Exemplar::Image { dims, .. } | Exemplar::Raw { dims, .. } => Some(*dims),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Exemplar::Image { .. } => "image",
            Exemplar::Raw { .. } => "raw",
            Exemplar::Tensor { .. } => "tensor",
            Exemplar::UserData { .. } => "user_data",
        }
    }
}

impl fmt::Display for Exemplar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exemplar::Image { format, dims } => write!(f, "image {} {}", format, dims),
            Exemplar::Raw {
                dims,
                bit_depth,
                container,
                justification,
            } => write!(
                f,
                "raw {} {}bit in {}B {:?}",
                dims,
                bit_depth,
                container.bytes(),
                justification
            ),
            Exemplar::Tensor { data_type, shape } => {
                write!(f, "tensor {:?} {:?}", data_type, shape)
            }
            Exemplar::UserData { name, size } => write!(f, "user_data {} ({}B)", name, size),
        }
    }
}
