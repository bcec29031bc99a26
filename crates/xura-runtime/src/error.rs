use thiserror::Error;

use crate::DType;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to allocate {bytes} bytes of tensor data")]
    AllocationFailed { bytes: usize },

    #[error("Failed to allocate shape/strides metadata for a tensor of rank {rank}")]
    MetadataAllocation { rank: usize },

    #[error("Failed to allocate {size} tensor list slots")]
    ListAllocation { size: usize },

    #[error("Negative extent {extent} for axis {axis}")]
    NegativeDimension { axis: usize, extent: i64 },

    #[error("Buffer size overflows for shape {shape:?} of {dtype}")]
    SizeOverflow { shape: Vec<i64>, dtype: DType },

    #[error("Shape {shape:?} holds {expected} elements, got {got}")]
    DataLength {
        shape: Vec<i64>,
        expected: usize,
        got: usize,
    },

    #[error("Unknown data type code {0}")]
    UnknownDType(i32),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
