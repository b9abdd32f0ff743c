//! Graphics device abstraction
//!
//! This module defines the narrow set of device services the batching system
//! consumes: buffer creation and ranged updates, an indirect command region,
//! one compute dispatch per regeneration and one indirect submission per pool.
//! Shader loading, windows and swapchains belong to the surrounding engine.
//!
//! The device is never global. Whoever owns the frame loop owns the device and
//! passes it by `&mut` into every call that touches GPU state.

pub mod headless;

pub use headless::{HeadlessDevice, UploadRecord};

use bitflags::bitflags;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Opaque handle to a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Opaque handle to a compiled shader program, created by the engine's shader loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

bitflags! {
    /// How a buffer is bound by the pipeline
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Bound as a vertex stream
        const VERTEX = 1 << 0;
        /// Bound as an index stream
        const INDEX = 1 << 1;
        /// Bound as per-instance data
        const INSTANCE = 1 << 2;
        /// Readable from compute shaders
        const COMPUTE_READ = 1 << 3;
        /// Writable from compute shaders
        const COMPUTE_WRITE = 1 << 4;
        /// Consumed as indirect draw arguments
        const INDIRECT = 1 << 5;
    }
}

/// Creation parameters for a device buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Debug label
    pub label: &'static str,
    /// Number of elements
    pub capacity: u32,
    /// Size of one element in bytes
    pub stride: u32,
    /// Binding usage
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor
    pub fn new(label: &'static str, capacity: u32, stride: u32, usage: BufferUsage) -> Self {
        Self { label, capacity, stride, usage }
    }

    /// Total size in bytes
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.capacity) * u64::from(self.stride)
    }
}

/// One run of the indirect fill compute pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeDispatch {
    /// Compute program that writes indirect commands
    pub program: ProgramHandle,
    /// Object record table
    pub input: BufferHandle,
    /// Indirect command region
    pub output: BufferHandle,
    /// Number of workgroups
    pub group_count: u32,
    /// Number of object records to process (passed as a uniform)
    pub draw_count: u32,
}

/// One indirect draw call covering a whole pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectSubmission {
    /// Rendering program
    pub program: ProgramHandle,
    /// Vertex region
    pub vertex_buffer: BufferHandle,
    /// Index region
    pub index_buffer: BufferHandle,
    /// Instance payload table
    pub instance_buffer: BufferHandle,
    /// Indirect command region
    pub indirect_buffer: BufferHandle,
    /// Number of indirect commands to execute
    pub draw_count: u32,
}

/// Device-level errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The buffer handle is not live on this device
    #[error("Unknown buffer handle: {0:?}")]
    UnknownBuffer(BufferHandle),

    /// A write would run past the end of the buffer
    #[error("Write of {len} bytes at offset {offset} overflows buffer {buffer:?} of {size} bytes")]
    OutOfBounds {
        /// Target buffer
        buffer: BufferHandle,
        /// Byte offset of the write
        offset: u64,
        /// Length of the write
        len: usize,
        /// Buffer size in bytes
        size: u64,
    },

    /// Buffer creation parameters were rejected
    #[error("Invalid buffer descriptor: {0}")]
    InvalidDescriptor(String),

    /// A dispatch or submission could not be recorded
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

/// Device services consumed by the batching system
///
/// Implementations own the actual GPU objects. All offsets are in bytes.
pub trait GraphicsDevice {
    /// Create a buffer of `capacity * stride` bytes
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> DeviceResult<BufferHandle>;

    /// Overwrite `bytes.len()` bytes starting at `offset`
    fn update_buffer_range(&mut self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> DeviceResult<()>;

    /// Create a region holding `capacity` indexed indirect draw commands
    fn create_indirect_command_region(&mut self, capacity: u32) -> DeviceResult<BufferHandle>;

    /// Run the indirect fill compute pass
    fn dispatch_compute(&mut self, dispatch: &ComputeDispatch) -> DeviceResult<()>;

    /// Issue one indirect draw call
    fn submit_indirect(&mut self, submission: &IndirectSubmission) -> DeviceResult<()>;

    /// Release a buffer; unknown handles are ignored
    fn destroy_buffer(&mut self, buffer: BufferHandle);
}
