//! # Batch Storage
//!
//! Packs many independently editable draws into a few shared, device-resident
//! geometry pools and keeps one indirect draw command per draw consistent with
//! the pool's object table.
//!
//! ## Layers
//!
//! - **range_allocator**: first-fit placement inside a fixed-capacity region
//! - **geometry_pool**: one pool's regions, per-draw tables and dirty state
//! - **pool_manager**: routes uploads across pools, creating pools on demand
//! - **command_queue**: mutex-guarded FIFO of deferred mutations
//! - **renderer**: frame-owner facade tying the queue to the manager
//!
//! Only the thread that owns the graphics device touches pools or device
//! buffers. Every other thread talks to the system through a
//! [`BatchProducer`].

pub mod command_queue;
pub mod dirty;
pub mod error;
pub mod geometry_pool;
pub mod pool_manager;
pub mod range_allocator;
pub mod records;
pub mod renderer;

#[cfg(test)]
mod tests;

pub use command_queue::{BatchCommand, CommandQueue, CommandSink, FlushOutcome, FlushReport};
pub use dirty::DirtyState;
pub use error::{BatchError, BatchResult, RegionKind, UnknownHandle};
pub use geometry_pool::{GeometryPool, GeometryRecord, PoolBuffers};
pub use pool_manager::{DrawRef, DrawSummary, GeometryHandle, PoolId, PoolManager, PoolManagerStats};
pub use range_allocator::{find_range, AllocationRange};
pub use records::{DrawIndexedIndirect, IndexRange, InstanceData, ObjectRecord};
pub use renderer::{BatchProducer, BatchRenderer, BatchStats};
