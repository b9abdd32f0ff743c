//! # Rendering
//!
//! Device abstraction, batch storage and the model layer built on top of it.
//!
//! The surrounding engine owns windows, shaders and the frame loop. This module
//! only needs a [`device::GraphicsDevice`] to create buffers, upload byte
//! ranges, run the indirect fill pass and submit indirect draws.

pub mod batching;
pub mod device;
pub mod model;

pub use batching::{
    BatchError, BatchProducer, BatchRenderer, BatchResult, BatchStats, GeometryHandle, IndexRange, InstanceData,
    PoolManager,
};
pub use device::{GraphicsDevice, HeadlessDevice, ProgramHandle};
pub use model::{FrameTable, MeshData, Model, ModelKind, Vertex};
