//! Batch Renderer
//!
//! Frame-owner facade over the pool manager and the command queue. The thread
//! that owns the graphics device owns the `BatchRenderer`; every other thread
//! holds a cloned [`BatchProducer`] and only enqueues.
//!
//! # Frame flow
//!
//! ```text
//! producers ──enqueue──► CommandQueue
//!                             │ flush (owner thread, once per frame)
//!                             ▼
//!                        PoolManager tables ──upload dirty spans──► device
//!                             │
//!                             ▼
//!                        indirect rebuild (if needed) ──► one draw per pool
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::batch_config::PoolConfig;
use crate::foundation::collections::{DrawHandle, SecondaryMap};
use crate::foundation::time::Stopwatch;
use crate::render::device::{GraphicsDevice, ProgramHandle};

use super::command_queue::{BatchCommand, CommandQueue, CommandSink, FlushReport};
use super::error::{BatchError, BatchResult, UnknownHandle};
use super::pool_manager::{DrawRef, GeometryHandle, PoolManager};
use super::records::IndexRange;

/// Frame statistics for the batching system
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Frames run since creation
    pub frames: u64,
    /// Pools created so far
    pub pools: usize,
    /// Live geometries
    pub geometries: usize,
    /// Live draws
    pub draws: usize,
    /// Commands applied since creation
    pub commands_applied: u64,
    /// Commands rejected with a non-fatal error since creation
    pub commands_rejected: u64,
    /// Fatal errors surfaced by flushes
    pub fatal_errors: u64,
    /// Indirect command rebuilds since creation
    pub indirect_rebuilds: u64,
    /// Time spent applying the last flush
    pub last_flush: Duration,
}

/// Cloneable enqueue-only access to the batching system
///
/// Safe to share across threads. Nothing happens to the draw set until the
/// owner's next [`BatchRenderer::frame`].
#[derive(Clone)]
pub struct BatchProducer {
    queue: Arc<CommandQueue>,
    instance_stride: usize,
}

impl BatchProducer {
    /// Queue a draw of uploaded geometry; the handle is usable immediately
    pub fn add_draw(&self, geometry: GeometryHandle, frame: Option<IndexRange>, payload: &[u8]) -> DrawHandle {
        self.queue.add_draw(geometry, frame, payload.to_vec())
    }

    /// Queue a payload overwrite
    pub fn edit_payload(&self, handle: DrawHandle, payload: &[u8]) {
        self.queue.edit_payload(handle, payload.to_vec());
    }

    /// Queue an index sub-range change
    pub fn edit_object(&self, handle: DrawHandle, frame: IndexRange) {
        self.queue.edit_object(handle, frame);
    }

    /// Queue a draw removal
    pub fn remove_draw(&self, handle: DrawHandle) {
        self.queue.remove_draw(handle);
    }

    /// Queue a geometry free
    pub fn free_geometry(&self, geometry: GeometryHandle) {
        self.queue.free_geometry(geometry);
    }

    /// Commands waiting for the next frame
    pub fn pending(&self) -> usize {
        self.queue.pending_len()
    }

    /// Payload size every draw must carry, in bytes
    pub fn instance_stride(&self) -> usize {
        self.instance_stride
    }
}

/// Owner of every pool, binding and queued command
pub struct BatchRenderer {
    manager: PoolManager,
    bindings: SecondaryMap<DrawHandle, DrawRef>,
    queue: Arc<CommandQueue>,
    stats: BatchStats,
}

impl BatchRenderer {
    /// Create a renderer with no pools yet
    pub fn new(config: PoolConfig, compute_program: ProgramHandle) -> BatchResult<Self> {
        Ok(Self {
            manager: PoolManager::new(config, compute_program)?,
            bindings: SecondaryMap::new(),
            queue: Arc::new(CommandQueue::new()),
            stats: BatchStats::default(),
        })
    }

    /// Enqueue-only handle for other threads
    pub fn producer(&self) -> BatchProducer {
        BatchProducer {
            queue: Arc::clone(&self.queue),
            instance_stride: self.manager.config().instance_stride as usize,
        }
    }

    /// Upload geometry immediately
    ///
    /// Raw geometry bytes bypass the queue so the returned handle can be used
    /// in queued draws right away.
    pub fn upload_geometry(
        &mut self,
        device: &mut dyn GraphicsDevice,
        vertex_bytes: &[u8],
        index_bytes: &[u8],
    ) -> BatchResult<GeometryHandle> {
        self.manager.upload_geometry(device, vertex_bytes, index_bytes)
    }

    /// Apply queued commands, then draw every pool
    ///
    /// A fatal error from the flush is returned after the rest of the drained
    /// commands were applied, and nothing is drawn that frame.
    pub fn frame(&mut self, device: &mut dyn GraphicsDevice, program: ProgramHandle) -> BatchResult<FlushReport> {
        let report = self.flush()?;
        let summary = self.manager.draw_all(device, program)?;

        self.stats.frames += 1;
        self.stats.indirect_rebuilds += summary.rebuilds as u64;
        self.refresh_counts();
        Ok(report)
    }

    /// Apply queued commands without drawing
    pub fn flush(&mut self) -> BatchResult<FlushReport> {
        let queue = Arc::clone(&self.queue);
        let stopwatch = Stopwatch::start_new();
        let mut applier = Applier { manager: &mut self.manager, bindings: &mut self.bindings };
        let outcome = queue.flush(&mut applier);
        self.stats.last_flush = stopwatch.elapsed();

        self.stats.commands_applied += outcome.report.applied as u64;
        self.stats.commands_rejected += outcome.report.rejected as u64;
        if outcome.fatal.is_some() {
            self.stats.fatal_errors += 1;
        }
        self.refresh_counts();
        outcome.into_result()
    }

    fn refresh_counts(&mut self) {
        let pools = self.manager.stats();
        self.stats.pools = pools.pool_count;
        self.stats.geometries = pools.geometry_count;
        self.stats.draws = pools.draw_count;
    }

    /// Pool location of a draw handle, once its add has been applied
    pub fn resolve(&self, handle: DrawHandle) -> Option<DrawRef> {
        self.bindings.get(handle).copied()
    }

    /// Underlying pool manager
    pub fn manager(&self) -> &PoolManager {
        &self.manager
    }

    /// Current statistics
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Release every device buffer; queued commands are dropped
    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        let dropped = self.queue.pending_len();
        if dropped > 0 {
            log::warn!("Dropping {} queued batch command(s) on shutdown", dropped);
        }
        self.manager.destroy(device);
    }
}

/// Applies drained commands against the manager and the handle bindings
struct Applier<'a> {
    manager: &'a mut PoolManager,
    bindings: &'a mut SecondaryMap<DrawHandle, DrawRef>,
}

impl Applier<'_> {
    fn bound(&self, handle: DrawHandle) -> BatchResult<DrawRef> {
        self.bindings
            .get(handle)
            .copied()
            .ok_or(BatchError::UnknownHandle(UnknownHandle::Handle(handle)))
    }
}

impl CommandSink for Applier<'_> {
    fn apply(&mut self, command: BatchCommand) -> BatchResult<()> {
        match command {
            BatchCommand::AddDraw { handle, geometry, frame, payload } => {
                let draw = self.manager.add_draw(geometry, frame, &payload)?;
                self.bindings.insert(handle, draw);
                Ok(())
            }
            BatchCommand::EditPayload { handle, payload } => {
                let draw = self.bound(handle)?;
                self.manager.edit_payload(draw, &payload)
            }
            BatchCommand::EditObject { handle, frame } => {
                let draw = self.bound(handle)?;
                self.manager.edit_object(draw, frame)
            }
            BatchCommand::RemoveDraw { handle } => {
                if let Some(draw) = self.bindings.remove(handle) {
                    self.manager.remove_draw(draw);
                }
                Ok(())
            }
            BatchCommand::FreeGeometry { geometry } => self.manager.free_geometry(geometry).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::batch_config::INDEX_SIZE;
    use crate::foundation::math::{translation, Vec3};
    use crate::render::batching::records::InstanceData;
    use crate::render::device::HeadlessDevice;
    use approx::assert_relative_eq;
    use std::thread;

    fn renderer() -> BatchRenderer {
        BatchRenderer::new(PoolConfig::with_capacity(1000), ProgramHandle(1)).expect("renderer")
    }

    fn upload_cube(renderer: &mut BatchRenderer, device: &mut HeadlessDevice) -> GeometryHandle {
        renderer
            .upload_geometry(device, &[0u8; 24 * 32], &[0u8; 36 * INDEX_SIZE])
            .expect("upload")
    }

    #[test]
    fn test_queued_draw_is_bound_after_frame() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        let cube = upload_cube(&mut renderer, &mut device);
        let producer = renderer.producer();

        let handle = producer.add_draw(cube, None, InstanceData::new(&translation(Vec3::x()), 0).as_bytes());
        assert!(renderer.resolve(handle).is_none());

        let report = renderer.frame(&mut device, ProgramHandle(2)).expect("frame");
        assert_eq!(report.applied, 1);
        assert!(renderer.resolve(handle).is_some());
        assert_eq!(renderer.stats().draws, 1);
        assert_eq!(renderer.stats().indirect_rebuilds, 1);
        assert_eq!(device.submissions().len(), 1);
    }

    #[test]
    fn test_edits_from_worker_threads_land_in_payload_table() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        let cube = upload_cube(&mut renderer, &mut device);
        let producer = renderer.producer();
        let handle = producer.add_draw(cube, None, InstanceData::new(&translation(Vec3::zeros()), 0).as_bytes());

        let worker = {
            let producer = producer.clone();
            thread::spawn(move || {
                for step in 1..=10u8 {
                    let offset = Vec3::new(f32::from(step), 0.0, 0.0);
                    producer.edit_payload(handle, InstanceData::new(&translation(offset), 3).as_bytes());
                }
            })
        };
        worker.join().expect("worker");
        renderer.frame(&mut device, ProgramHandle(2)).expect("frame");

        let draw = renderer.resolve(handle).expect("bound");
        let pool = renderer.manager().pool(draw.pool).expect("pool");
        let payload = InstanceData::from_bytes(pool.payload(draw.key).expect("payload")).expect("decode");
        assert_relative_eq!(payload.model[3][0], 10.0);
        assert_relative_eq!(payload.texture[0], 3.0);
    }

    #[test]
    fn test_edit_after_remove_is_rejected_not_fatal() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        let cube = upload_cube(&mut renderer, &mut device);
        let producer = renderer.producer();
        let payload = [0u8; 80];

        let handle = producer.add_draw(cube, None, &payload);
        producer.remove_draw(handle);
        producer.edit_payload(handle, &payload);
        producer.remove_draw(handle);

        let report = renderer.frame(&mut device, ProgramHandle(2)).expect("frame");
        assert_eq!(report.applied, 3);
        assert_eq!(report.rejected, 1);
        assert!(matches!(report.errors[0], BatchError::UnknownHandle(UnknownHandle::Handle(_))));
        assert_eq!(renderer.stats().draws, 0);
    }

    #[test]
    fn test_freeing_drawn_geometry_surfaces_fatal_error() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        let cube = upload_cube(&mut renderer, &mut device);
        let producer = renderer.producer();

        let handle = producer.add_draw(cube, None, &[0u8; 80]);
        producer.free_geometry(cube);
        let err = renderer.frame(&mut device, ProgramHandle(2)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(renderer.stats().fatal_errors, 1);
        assert_eq!(renderer.stats().commands_applied, 1);
        assert!(device.submissions().is_empty());

        producer.remove_draw(handle);
        producer.free_geometry(cube);
        renderer.frame(&mut device, ProgramHandle(2)).expect("frame");
        assert_eq!(renderer.stats().geometries, 0);
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        upload_cube(&mut renderer, &mut device);
        renderer.destroy(&mut device);
        assert_eq!(device.live_buffer_count(), 0);
    }
}
