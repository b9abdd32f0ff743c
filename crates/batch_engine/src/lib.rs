//! # Batch Engine
//!
//! GPU batch storage for many independently editable draw objects.
//!
//! ## Features
//!
//! - **Pooled Geometry**: Vertices and indices packed first-fit into fixed-capacity pools
//! - **Indirect Drawing**: One indirect draw call per pool, regenerated by a compute pass
//! - **Deferred Mutation**: Any thread can enqueue edits; the frame owner applies them in order
//! - **Minimal Uploads**: Only dirty slot spans of the per-draw tables reach the device
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batch_engine::prelude::*;
//!
//! fn main() -> Result<(), BatchError> {
//!     let mut device = HeadlessDevice::new();
//!     let mut renderer = BatchRenderer::new(PoolConfig::default(), ProgramHandle(1))?;
//!
//!     let cube = MeshData::cube();
//!     let geometry = renderer.upload_geometry(&mut device, cube.vertex_bytes(), cube.index_bytes())?;
//!
//!     let producer = renderer.producer();
//!     let payload = InstanceData::new(&Mat4::identity(), 0);
//!     producer.add_draw(geometry, None, payload.as_bytes());
//!
//!     renderer.frame(&mut device, ProgramHandle(2))?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for batch engine users
pub mod prelude {
    pub use crate::{
        config::{BatchConfig, Config, ConfigError, LoggingConfig, PoolConfig},
        foundation::{
            collections::DrawHandle,
            math::{Mat4, Vec3},
            time::{FrameTimer, Stopwatch},
        },
        render::{
            batching::{
                BatchError, BatchProducer, BatchRenderer, BatchResult, BatchStats, GeometryHandle, IndexRange,
                InstanceData, PoolManager,
            },
            device::{GraphicsDevice, HeadlessDevice, ProgramHandle},
            model::{FrameTable, MeshData, Model, ModelKind},
        },
    };
}
