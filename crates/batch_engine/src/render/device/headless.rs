//! Headless in-memory device
//!
//! Backs every buffer with a `Vec<u8>`, runs the indirect fill pass on the CPU
//! and keeps a log of every upload, dispatch and submission. Used by tests and
//! by tools that need the batching system without a GPU.

use std::collections::HashMap;

use super::{
    BufferDescriptor, BufferHandle, BufferUsage, ComputeDispatch, DeviceError, DeviceResult,
    GraphicsDevice, IndirectSubmission,
};
use crate::render::batching::records::{
    DrawIndexedIndirect, ObjectRecord, INDIRECT_COMMAND_SIZE, OBJECT_RECORD_SIZE,
};

/// One `update_buffer_range` call as seen by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRecord {
    /// Target buffer
    pub buffer: BufferHandle,
    /// Byte offset of the write
    pub offset: u64,
    /// Number of bytes written
    pub len: usize,
}

struct HeadlessBuffer {
    descriptor: BufferDescriptor,
    data: Vec<u8>,
}

/// CPU-only implementation of [`GraphicsDevice`]
#[derive(Default)]
pub struct HeadlessDevice {
    next_id: u64,
    buffers: HashMap<BufferHandle, HeadlessBuffer>,
    uploads: Vec<UploadRecord>,
    dispatches: Vec<ComputeDispatch>,
    submissions: Vec<IndirectSubmission>,
}

impl HeadlessDevice {
    /// Create an empty device
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of a live buffer
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    /// Creation parameters of a live buffer
    pub fn descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer).map(|b| &b.descriptor)
    }

    /// Number of buffers not yet destroyed
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Every upload since creation or the last `take_uploads`
    pub fn uploads(&self) -> &[UploadRecord] {
        &self.uploads
    }

    /// Drain the upload log
    pub fn take_uploads(&mut self) -> Vec<UploadRecord> {
        std::mem::take(&mut self.uploads)
    }

    /// Every compute dispatch since creation
    pub fn dispatches(&self) -> &[ComputeDispatch] {
        &self.dispatches
    }

    /// Every indirect submission since creation
    pub fn submissions(&self) -> &[IndirectSubmission] {
        &self.submissions
    }

    /// Decode the first `count` commands of an indirect region
    pub fn read_indirect(&self, buffer: BufferHandle, count: usize) -> Vec<DrawIndexedIndirect> {
        self.buffer_contents(buffer)
            .map(|bytes| {
                bytes
                    .chunks_exact(INDIRECT_COMMAND_SIZE)
                    .take(count)
                    .map(bytemuck::pod_read_unaligned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Decode the first `count` records of an object table
    pub fn read_objects(&self, buffer: BufferHandle, count: usize) -> Vec<ObjectRecord> {
        self.buffer_contents(buffer)
            .map(|bytes| {
                bytes
                    .chunks_exact(OBJECT_RECORD_SIZE)
                    .take(count)
                    .map(bytemuck::pod_read_unaligned)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> DeviceResult<&mut HeadlessBuffer> {
        self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownBuffer(buffer))
    }

    fn write(&mut self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> DeviceResult<()> {
        let target = self.buffer_mut(buffer)?;
        let size = target.data.len() as u64;
        let end = offset + bytes.len() as u64;
        if end > size {
            return Err(DeviceError::OutOfBounds { buffer, offset, len: bytes.len(), size });
        }
        // end <= size, and size came from a Vec length
        #[allow(clippy::cast_possible_truncation)]
        let start = offset as usize;
        target.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> DeviceResult<BufferHandle> {
        if descriptor.capacity == 0 || descriptor.stride == 0 {
            return Err(DeviceError::InvalidDescriptor(format!(
                "buffer '{}' has zero capacity or stride",
                descriptor.label
            )));
        }
        let size = usize::try_from(descriptor.size_bytes()).map_err(|_| {
            DeviceError::InvalidDescriptor(format!("buffer '{}' is too large", descriptor.label))
        })?;

        self.next_id += 1;
        let handle = BufferHandle(self.next_id);
        self.buffers.insert(
            handle,
            HeadlessBuffer { descriptor: descriptor.clone(), data: vec![0; size] },
        );
        log::trace!("Created headless buffer '{}' ({} bytes) as {:?}", descriptor.label, size, handle);
        Ok(handle)
    }

    fn update_buffer_range(&mut self, buffer: BufferHandle, offset: u64, bytes: &[u8]) -> DeviceResult<()> {
        self.write(buffer, offset, bytes)?;
        self.uploads.push(UploadRecord { buffer, offset, len: bytes.len() });
        Ok(())
    }

    fn create_indirect_command_region(&mut self, capacity: u32) -> DeviceResult<BufferHandle> {
        #[allow(clippy::cast_possible_truncation)]
        let stride = INDIRECT_COMMAND_SIZE as u32;
        self.create_buffer(&BufferDescriptor::new(
            "indirect commands",
            capacity,
            stride,
            BufferUsage::INDIRECT | BufferUsage::COMPUTE_WRITE,
        ))
    }

    fn dispatch_compute(&mut self, dispatch: &ComputeDispatch) -> DeviceResult<()> {
        let count = dispatch.draw_count as usize;
        let records = self
            .buffers
            .get(&dispatch.input)
            .ok_or(DeviceError::UnknownBuffer(dispatch.input))?
            .data
            .chunks_exact(OBJECT_RECORD_SIZE)
            .take(count)
            .map(bytemuck::pod_read_unaligned::<ObjectRecord>)
            .collect::<Vec<_>>();
        if records.len() < count {
            return Err(DeviceError::CommandFailed(format!(
                "object table holds {} records, dispatch asked for {}",
                records.len(),
                count
            )));
        }

        let mut commands = Vec::with_capacity(count * INDIRECT_COMMAND_SIZE);
        for (slot, record) in (0u32..).zip(&records) {
            commands.extend_from_slice(bytemuck::bytes_of(&DrawIndexedIndirect::from_record(record, slot)));
        }
        self.write(dispatch.output, 0, &commands)?;
        self.dispatches.push(*dispatch);
        Ok(())
    }

    fn submit_indirect(&mut self, submission: &IndirectSubmission) -> DeviceResult<()> {
        for buffer in [
            submission.vertex_buffer,
            submission.index_buffer,
            submission.instance_buffer,
            submission.indirect_buffer,
        ] {
            if !self.buffers.contains_key(&buffer) {
                return Err(DeviceError::UnknownBuffer(buffer));
            }
        }
        self.submissions.push(*submission);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_none() {
            log::warn!("Destroy requested for unknown buffer {:?}", buffer);
        }
    }
}
