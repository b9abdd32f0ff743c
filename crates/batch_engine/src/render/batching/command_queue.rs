//! Deferred Batch Commands
//!
//! Producer threads enqueue mutations; the thread that owns the device drains
//! and applies them once per frame. Enqueue and flush contend on one mutex,
//! held only long enough to push a command or to swap out the pending list,
//! so producers never wait for a whole apply pass.
//!
//! Draw handles are minted when an `AddDraw` is enqueued, which lets a
//! producer queue edits of a draw in the same frame it asked for it. Commands
//! are applied in global enqueue order, so the add always lands first.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::foundation::collections::{DrawHandle, SlotMap};

use super::error::{BatchError, BatchResult};
use super::pool_manager::GeometryHandle;
use super::records::IndexRange;

/// A deferred mutation of the batched draw set
#[derive(Debug, Clone, PartialEq)]
pub enum BatchCommand {
    /// Add a draw of existing geometry under a pre-minted handle
    AddDraw {
        /// Handle returned to the producer at enqueue time
        handle: DrawHandle,
        /// Geometry to draw
        geometry: GeometryHandle,
        /// Index sub-range, or the whole geometry
        frame: Option<IndexRange>,
        /// Initial instance payload
        payload: Vec<u8>,
    },
    /// Overwrite a draw's instance payload
    EditPayload {
        /// Draw to edit
        handle: DrawHandle,
        /// New payload
        payload: Vec<u8>,
    },
    /// Select a different index sub-range
    EditObject {
        /// Draw to edit
        handle: DrawHandle,
        /// New sub-range
        frame: IndexRange,
    },
    /// Remove a draw
    RemoveDraw {
        /// Draw to remove
        handle: DrawHandle,
    },
    /// Free geometry once no draw references it
    FreeGeometry {
        /// Geometry to free
        geometry: GeometryHandle,
    },
}

impl BatchCommand {
    /// Short name used in log messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddDraw { .. } => "add_draw",
            Self::EditPayload { .. } => "edit_payload",
            Self::EditObject { .. } => "edit_object",
            Self::RemoveDraw { .. } => "remove_draw",
            Self::FreeGeometry { .. } => "free_geometry",
        }
    }
}

/// Applies drained commands on the owner thread
pub trait CommandSink {
    /// Apply one command, fully or not at all
    fn apply(&mut self, command: BatchCommand) -> BatchResult<()>;
}

/// Outcome of one flush
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Commands applied successfully
    pub applied: usize,
    /// Commands rejected with a non-fatal error
    pub rejected: usize,
    /// Errors of the rejected commands, in apply order
    pub errors: Vec<BatchError>,
}

/// Report of a drained batch plus the first fatal error it hit
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Counts and non-fatal errors of every drained command
    pub report: FlushReport,
    /// First fatal error, if any
    pub fatal: Option<BatchError>,
}

impl FlushOutcome {
    /// The report, or the fatal error if one occurred
    pub fn into_result(self) -> BatchResult<FlushReport> {
        match self.fatal {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<BatchCommand>,
    handles: SlotMap<DrawHandle, ()>,
}

/// Mutex-guarded FIFO of batch commands
#[derive(Default)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("Command queue lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Queue a new draw and return its handle immediately
    pub fn add_draw(&self, geometry: GeometryHandle, frame: Option<IndexRange>, payload: Vec<u8>) -> DrawHandle {
        let mut state = self.lock();
        let handle = state.handles.insert(());
        state.pending.push_back(BatchCommand::AddDraw { handle, geometry, frame, payload });
        handle
    }

    /// Queue a payload overwrite
    pub fn edit_payload(&self, handle: DrawHandle, payload: Vec<u8>) {
        self.push(BatchCommand::EditPayload { handle, payload });
    }

    /// Queue an index sub-range change
    pub fn edit_object(&self, handle: DrawHandle, frame: IndexRange) {
        self.push(BatchCommand::EditObject { handle, frame });
    }

    /// Queue a draw removal
    pub fn remove_draw(&self, handle: DrawHandle) {
        self.push(BatchCommand::RemoveDraw { handle });
    }

    /// Queue a geometry free
    pub fn free_geometry(&self, geometry: GeometryHandle) {
        self.push(BatchCommand::FreeGeometry { geometry });
    }

    fn push(&self, command: BatchCommand) {
        self.lock().pending.push_back(command);
    }

    /// Commands waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether a handle was minted and not yet released
    pub fn is_live(&self, handle: DrawHandle) -> bool {
        self.lock().handles.contains_key(handle)
    }

    /// Number of minted handles not yet released
    pub fn live_handles(&self) -> usize {
        self.lock().handles.len()
    }

    /// Drain every pending command and apply it in FIFO order
    ///
    /// Commands enqueued while the flush runs wait for the next one. Rejected
    /// commands are logged and counted. A fatal error does not stop the
    /// remaining commands from being applied; the first one is reported
    /// alongside the counts once the drained batch is done.
    pub fn flush(&self, sink: &mut dyn CommandSink) -> FlushOutcome {
        let drained = std::mem::take(&mut self.lock().pending);
        if drained.is_empty() {
            return FlushOutcome::default();
        }

        let mut report = FlushReport::default();
        let mut released = Vec::new();
        let mut fatal = None;

        for command in drained {
            let name = command.name();
            let removed = match &command {
                BatchCommand::RemoveDraw { handle } => Some(*handle),
                _ => None,
            };
            let added = match &command {
                BatchCommand::AddDraw { handle, .. } => Some(*handle),
                _ => None,
            };

            match sink.apply(command) {
                Ok(()) => {
                    log::trace!("Applied {}", name);
                    report.applied += 1;
                    released.extend(removed);
                }
                Err(err) if err.is_fatal() => {
                    log::error!("Fatal error applying {}: {}", name, err);
                    released.extend(added);
                    fatal.get_or_insert(err);
                }
                Err(err) => {
                    log::warn!("Rejected {}: {}", name, err);
                    report.rejected += 1;
                    report.errors.push(err);
                    released.extend(added);
                }
            }
        }

        if !released.is_empty() {
            let mut state = self.lock();
            for handle in released {
                state.handles.remove(handle);
            }
        }

        FlushOutcome { report, fatal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::GeometryKey;
    use crate::render::batching::error::UnknownHandle;
    use crate::render::batching::pool_manager::PoolId;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[derive(Default)]
    struct RecordingSink {
        applied: Vec<BatchCommand>,
        reject_adds: bool,
    }

    impl CommandSink for RecordingSink {
        fn apply(&mut self, command: BatchCommand) -> BatchResult<()> {
            if self.reject_adds && matches!(command, BatchCommand::AddDraw { .. }) {
                return Err(BatchError::UnknownHandle(UnknownHandle::Pool(0)));
            }
            if let BatchCommand::FreeGeometry { .. } = command {
                return Err(BatchError::ReferentialIntegrityViolation {
                    geometry: GeometryKey::default(),
                    live_draws: 1,
                });
            }
            self.applied.push(command);
            Ok(())
        }
    }

    fn geometry() -> GeometryHandle {
        GeometryHandle { pool: PoolId(0), key: GeometryKey::default() }
    }

    #[test]
    fn test_flush_applies_in_enqueue_order() {
        let queue = CommandQueue::new();
        let handle = queue.add_draw(geometry(), None, vec![1]);
        queue.edit_payload(handle, vec![2]);
        queue.edit_object(handle, IndexRange::new(0, 3));
        queue.remove_draw(handle);

        let mut sink = RecordingSink::default();
        let report = queue.flush(&mut sink).into_result().expect("flush");

        assert_eq!(report.applied, 4);
        let names: Vec<_> = sink.applied.iter().map(BatchCommand::name).collect();
        assert_eq!(names, ["add_draw", "edit_payload", "edit_object", "remove_draw"]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_handles_are_released_after_removal() {
        let queue = CommandQueue::new();
        let handle = queue.add_draw(geometry(), None, vec![]);
        assert!(queue.is_live(handle));

        queue.flush(&mut RecordingSink::default()).into_result().expect("flush");
        assert!(queue.is_live(handle));

        queue.remove_draw(handle);
        queue.flush(&mut RecordingSink::default()).into_result().expect("flush");
        assert!(!queue.is_live(handle));
        assert_eq!(queue.live_handles(), 0);
    }

    #[test]
    fn test_rejected_add_releases_handle_and_is_counted() {
        let queue = CommandQueue::new();
        let handle = queue.add_draw(geometry(), None, vec![]);

        let mut sink = RecordingSink { reject_adds: true, ..RecordingSink::default() };
        let report = queue.flush(&mut sink).into_result().expect("non-fatal errors do not fail the flush");

        assert_eq!(report.rejected, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(!queue.is_live(handle));
    }

    #[test]
    fn test_fatal_error_is_returned_after_remaining_commands() {
        let queue = CommandQueue::new();
        queue.free_geometry(geometry());
        let handle = queue.add_draw(geometry(), None, vec![]);

        let mut sink = RecordingSink::default();
        let outcome = queue.flush(&mut sink);

        assert!(outcome.fatal.as_ref().is_some_and(BatchError::is_fatal));
        assert_eq!(outcome.report.applied, 1);
        assert_eq!(outcome.report.rejected, 0);
        assert_eq!(sink.applied.len(), 1);
        assert!(queue.is_live(handle));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_concurrent_producers_keep_per_thread_order() {
        const THREADS: usize = 4;
        const PER_THREAD: u8 = 50;

        let queue = Arc::new(CommandQueue::new());
        let barrier = Arc::new(Barrier::new(THREADS));
        let producers: Vec<_> = (0..THREADS)
            .map(|thread_id| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let handle = queue.add_draw(geometry(), None, vec![]);
                    barrier.wait();
                    for sequence in 0..PER_THREAD {
                        queue.edit_payload(handle, vec![thread_id as u8, sequence]);
                    }
                    handle
                })
            })
            .collect();
        let handles: Vec<_> = producers.into_iter().map(|p| p.join().expect("producer")).collect();

        let mut sink = RecordingSink::default();
        queue.flush(&mut sink).into_result().expect("flush");
        assert_eq!(sink.applied.len(), THREADS * (1 + PER_THREAD as usize));

        for (thread_id, handle) in handles.iter().enumerate() {
            let mut seen = Vec::new();
            let mut added_at = None;
            for (position, command) in sink.applied.iter().enumerate() {
                match command {
                    BatchCommand::AddDraw { handle: h, .. } if h == handle => added_at = Some(position),
                    BatchCommand::EditPayload { handle: h, payload } if h == handle => {
                        assert!(added_at.is_some(), "edit applied before its add");
                        assert_eq!(payload[0] as usize, thread_id);
                        seen.push(payload[1]);
                    }
                    _ => {}
                }
            }
            assert_eq!(seen, (0..PER_THREAD).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_commands_enqueued_during_flush_wait_for_next_flush() {
        struct ReentrantSink<'a> {
            queue: &'a CommandQueue,
            applied: usize,
        }

        impl CommandSink for ReentrantSink<'_> {
            fn apply(&mut self, _command: BatchCommand) -> BatchResult<()> {
                // Producers may enqueue while the owner is applying
                self.queue.free_geometry(geometry());
                self.applied += 1;
                Ok(())
            }
        }

        let queue = CommandQueue::new();
        queue.add_draw(geometry(), None, vec![]);
        queue.add_draw(geometry(), None, vec![]);

        let mut sink = ReentrantSink { queue: &queue, applied: 0 };
        queue.flush(&mut sink).into_result().expect("flush");
        assert_eq!(sink.applied, 2);
        assert_eq!(queue.pending_len(), 2);
    }
}
