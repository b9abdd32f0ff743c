//! GPU-side record layouts
//!
//! These structures are written byte-for-byte into device buffers, so they
//! are `#[repr(C)]` and `Pod`. The compute pass reads `ObjectRecord`s and writes
//! one `DrawIndexedIndirect` per record.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_cols_array, Mat4};

/// Size of one object record in bytes
pub const OBJECT_RECORD_SIZE: usize = std::mem::size_of::<ObjectRecord>();

/// Size of one indexed indirect draw command in bytes
pub const INDIRECT_COMMAND_SIZE: usize = std::mem::size_of::<DrawIndexedIndirect>();

/// Per-draw record consumed by the indirect fill pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct ObjectRecord {
    /// First vertex of the geometry in the vertex region
    pub vertex_start: u32,
    /// Number of vertices in the geometry
    pub vertex_count: u32,
    /// First index to draw in the index region
    pub index_start: u32,
    /// Number of indices to draw
    pub index_count: u32,
}

/// Indexed indirect draw arguments, in the layout every major API expects
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    /// Number of indices to draw
    pub index_count: u32,
    /// Number of instances (always one; each draw is its own record)
    pub instance_count: u32,
    /// First index in the index region
    pub first_index: u32,
    /// Value added to each index before fetching a vertex
    pub base_vertex: i32,
    /// Instance id, used to fetch the matching payload slot
    pub first_instance: u32,
}

impl DrawIndexedIndirect {
    /// Build the command the fill pass writes for the record at `slot`
    pub fn from_record(record: &ObjectRecord, slot: u32) -> Self {
        Self {
            index_count: record.index_count,
            instance_count: 1,
            first_index: record.index_start,
            // Vertex capacity is validated to fit in an i32
            base_vertex: i32::try_from(record.vertex_start).unwrap_or(i32::MAX),
            first_instance: slot,
        }
    }
}

/// Sub-range of a geometry's index data, relative to the geometry's first index
///
/// Used to select an animation frame out of a mesh whose frames are stored
/// back to back in one index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexRange {
    /// Offset from the geometry's first index
    pub offset: u32,
    /// Number of indices
    pub count: u32,
}

impl IndexRange {
    /// Create a new index range
    pub fn new(offset: u32, count: u32) -> Self {
        Self { offset, count }
    }

    /// One past the last index covered
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.count)
    }
}

/// Default instance payload: model matrix plus texture/material vector
///
/// 80 bytes, matching the default `instance_stride`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    /// Model matrix, column-major
    pub model: [[f32; 4]; 4],
    /// `x` holds the texture layer; `yzw` are free for material parameters
    pub texture: [f32; 4],
}

impl InstanceData {
    /// Build a payload from a transform and texture layer
    #[allow(clippy::cast_precision_loss)]
    pub fn new(transform: &Mat4, texture_id: u32) -> Self {
        Self {
            model: to_cols_array(transform),
            texture: [texture_id as f32, 0.0, 0.0, 0.0],
        }
    }

    /// Raw bytes as uploaded to the instance table
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode a payload from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != std::mem::size_of::<Self>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(bytes))
    }
}
