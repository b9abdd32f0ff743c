//! Errors produced by the batching system

use crate::foundation::collections::{DrawHandle, DrawKey, GeometryKey};
use crate::render::device::DeviceError;

/// Result type for batching operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Which fixed-capacity region an allocation targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Vertex region
    Vertex,
    /// Index region
    Index,
}

impl std::fmt::Display for RegionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vertex => write!(f, "vertex"),
            Self::Index => write!(f, "index"),
        }
    }
}

/// A handle that did not resolve to a live record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownHandle {
    /// Pool index out of range
    Pool(usize),
    /// Pool-local geometry key
    Geometry(GeometryKey),
    /// Pool-local draw key
    Draw(DrawKey),
    /// Caller-facing draw handle
    Handle(DrawHandle),
}

/// Errors that can occur while packing, editing or drawing batched objects
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    /// No free run in the target region is large enough
    #[error("No room in {region} region: requested {requested}, capacity {capacity}")]
    CapacityExceeded {
        /// Region that ran out
        region: RegionKind,
        /// Elements requested
        requested: u32,
        /// Capacity of the region
        capacity: u32,
    },

    /// The handle is stale or was never issued
    #[error("Unknown handle: {0:?}")]
    UnknownHandle(UnknownHandle),

    /// Geometry is still referenced by live draws
    #[error("Geometry {geometry:?} is still referenced by {live_draws} draw(s)")]
    ReferentialIntegrityViolation {
        /// Geometry that was to be freed
        geometry: GeometryKey,
        /// Number of draws still referencing it
        live_draws: usize,
    },

    /// A single request can never fit in an empty pool
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Byte length is not a whole number of elements
    #[error("{len} bytes is not a multiple of the {stride}-byte {region} stride")]
    MisalignedData {
        /// Region the data was meant for
        region: RegionKind,
        /// Byte length supplied
        len: usize,
        /// Element stride
        stride: u32,
    },

    /// Instance payload does not match the pool stride
    #[error("Instance payload is {actual} bytes, pool stride is {expected}")]
    PayloadSize {
        /// Pool instance stride
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// Index sub-range falls outside the geometry's index data
    #[error("Index range {offset}+{count} exceeds geometry index count {available}")]
    InvalidSubrange {
        /// Requested offset
        offset: u32,
        /// Requested count
        count: u32,
        /// Indices in the geometry
        available: u32,
    },

    /// Model has no animation frame with this name
    #[error("Unknown animation frame '{0}'")]
    UnknownFrame(String),

    /// Device call failed
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

impl BatchError {
    /// Errors that indicate a usage or configuration bug and must not be retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReferentialIntegrityViolation { .. } | Self::Configuration(_)
        )
    }

    /// Errors the pool manager recovers from by trying another pool
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
