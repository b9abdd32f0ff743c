//! Geometry Pool
//!
//! One pool owns a fixed-capacity vertex region, a fixed-capacity index region,
//! and two per-draw tables kept in lockstep: object records (what to draw) and
//! instance payloads (per-draw shader data). A draw's slot in both tables is
//! always the same index, so removal erases one slot from each and shifts every
//! later draw down by one.
//!
//! # Architecture
//!
//! ```text
//! GeometryPool
//!     ├── vertex region    (packed with the first-fit range allocator)
//!     ├── index region     (packed with the first-fit range allocator)
//!     ├── object table     ──┐
//!     ├── payload table      ├── dirty spans uploaded on flush
//!     └── indirect region  ◄─┘  rebuilt by one compute dispatch
//! ```
//!
//! Table edits only touch CPU memory. `flush_to_device` uploads the dirty span
//! of each table (or the whole table after a removal), and
//! `rebuild_indirect_commands` regenerates every indirect command from the
//! object table whenever membership or index ranges changed.

use crate::config::batch_config::{PoolConfig, INDEX_SIZE};
use crate::foundation::collections::{DrawKey, GeometryKey, SlotMap};
use crate::render::device::{
    BufferDescriptor, BufferHandle, BufferUsage, ComputeDispatch, GraphicsDevice, IndirectSubmission,
    ProgramHandle,
};

use super::dirty::DirtyState;
use super::error::{BatchError, BatchResult, RegionKind, UnknownHandle};
use super::range_allocator::{find_range, AllocationRange};
use super::records::{IndexRange, ObjectRecord, OBJECT_RECORD_SIZE};

/// Vertex and index ranges of one uploaded geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryRecord {
    /// Vertices occupied in the vertex region
    pub vertex_range: AllocationRange,
    /// Indices occupied in the index region
    pub index_range: AllocationRange,
    live_draws: usize,
}

impl GeometryRecord {
    /// Number of live draws referencing this geometry
    pub fn live_draws(&self) -> usize {
        self.live_draws
    }

    fn object_record(&self, frame: Option<IndexRange>) -> BatchResult<ObjectRecord> {
        let frame = frame.unwrap_or(IndexRange::new(0, self.index_range.count));
        if frame.end() > u64::from(self.index_range.count) {
            return Err(BatchError::InvalidSubrange {
                offset: frame.offset,
                count: frame.count,
                available: self.index_range.count,
            });
        }
        Ok(ObjectRecord {
            vertex_start: self.vertex_range.start,
            vertex_count: self.vertex_range.count,
            index_start: self.index_range.start + frame.offset,
            index_count: frame.count,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct DrawEntry {
    slot: usize,
    geometry: GeometryKey,
}

/// Device buffers owned by one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBuffers {
    /// Vertex region
    pub vertices: BufferHandle,
    /// Index region
    pub indices: BufferHandle,
    /// Object record table
    pub objects: BufferHandle,
    /// Instance payload table
    pub instances: BufferHandle,
    /// Indirect command region, created on first regeneration
    pub indirect: Option<BufferHandle>,
}

/// A fixed-capacity batch of geometries and draws
pub struct GeometryPool {
    config: PoolConfig,
    compute_program: ProgramHandle,
    buffers: PoolBuffers,
    draw_capacity: u32,
    indirect_capacity: u32,

    geometries: SlotMap<GeometryKey, GeometryRecord>,
    draws: SlotMap<DrawKey, DrawEntry>,

    objects: Vec<ObjectRecord>,
    payloads: Vec<u8>,

    objects_dirty: DirtyState,
    payloads_dirty: DirtyState,
    needs_indirect_regen: bool,
}

impl GeometryPool {
    /// Create a pool and its device buffers
    ///
    /// `compute_program` is the indirect fill pass used on every regeneration.
    /// An invalid configuration fails with `Configuration` before any buffer
    /// is created.
    pub fn new(
        device: &mut dyn GraphicsDevice,
        config: &PoolConfig,
        compute_program: ProgramHandle,
    ) -> BatchResult<Self> {
        config
            .validate()
            .map_err(|err| BatchError::Configuration(err.to_string()))?;

        let descriptors = [
            BufferDescriptor::new("pool vertices", config.vertex_capacity, config.vertex_stride, BufferUsage::VERTEX),
            BufferDescriptor::new("pool indices", config.index_capacity, INDEX_SIZE as u32, BufferUsage::INDEX),
            Self::objects_descriptor(config.initial_draw_capacity),
            Self::instances_descriptor(config.initial_draw_capacity, config.instance_stride),
        ];
        let created = create_all(device, &descriptors)?;

        log::info!(
            "Created geometry pool: {} vertices x {} bytes, {} indices, {} initial draw slots",
            config.vertex_capacity,
            config.vertex_stride,
            config.index_capacity,
            config.initial_draw_capacity
        );

        Ok(Self {
            config: config.clone(),
            compute_program,
            buffers: PoolBuffers {
                vertices: created[0],
                indices: created[1],
                objects: created[2],
                instances: created[3],
                indirect: None,
            },
            draw_capacity: config.initial_draw_capacity,
            indirect_capacity: 0,
            geometries: SlotMap::with_key(),
            draws: SlotMap::with_key(),
            objects: Vec::new(),
            payloads: Vec::new(),
            objects_dirty: DirtyState::Clean,
            payloads_dirty: DirtyState::Clean,
            needs_indirect_regen: false,
        })
    }

    fn objects_descriptor(capacity: u32) -> BufferDescriptor {
        BufferDescriptor::new("pool objects", capacity, OBJECT_RECORD_SIZE as u32, BufferUsage::COMPUTE_READ)
    }

    fn instances_descriptor(capacity: u32, stride: u32) -> BufferDescriptor {
        BufferDescriptor::new("pool instances", capacity, stride, BufferUsage::INSTANCE)
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    /// Pack raw vertex and index bytes into the pool
    ///
    /// Both regions must have room; on failure nothing is recorded. The bytes
    /// are written to the device immediately.
    pub fn upload_geometry(
        &mut self,
        device: &mut dyn GraphicsDevice,
        vertex_bytes: &[u8],
        index_bytes: &[u8],
    ) -> BatchResult<GeometryKey> {
        let (vertex_count, index_count) = measure_geometry(&self.config, vertex_bytes.len(), index_bytes.len())?;

        let vertex_start = self.allocate(RegionKind::Vertex, vertex_count)?;
        let index_start = self.allocate(RegionKind::Index, index_count)?;

        device.update_buffer_range(
            self.buffers.vertices,
            u64::from(vertex_start) * u64::from(self.config.vertex_stride),
            vertex_bytes,
        )?;
        device.update_buffer_range(
            self.buffers.indices,
            u64::from(index_start) * INDEX_SIZE as u64,
            index_bytes,
        )?;

        let key = self.geometries.insert(GeometryRecord {
            vertex_range: AllocationRange::new(vertex_start, vertex_count),
            index_range: AllocationRange::new(index_start, index_count),
            live_draws: 0,
        });
        log::debug!(
            "Uploaded geometry {:?}: vertices {}+{}, indices {}+{}",
            key,
            vertex_start,
            vertex_count,
            index_start,
            index_count
        );
        Ok(key)
    }

    fn allocate(&self, region: RegionKind, count: u32) -> BatchResult<u32> {
        let (capacity, occupied): (u32, Vec<AllocationRange>) = match region {
            RegionKind::Vertex => (
                self.config.vertex_capacity,
                self.geometries.values().map(|g| g.vertex_range).collect(),
            ),
            RegionKind::Index => (
                self.config.index_capacity,
                self.geometries.values().map(|g| g.index_range).collect(),
            ),
        };
        find_range(capacity, &occupied, count).ok_or(BatchError::CapacityExceeded {
            region,
            requested: count,
            capacity,
        })
    }

    /// Free a geometry's ranges
    ///
    /// Returns `Ok(false)` for unknown keys. Fails without changing anything if
    /// any live draw still references the geometry.
    pub fn free_geometry(&mut self, geometry: GeometryKey) -> BatchResult<bool> {
        let Some(record) = self.geometries.get(geometry) else {
            return Ok(false);
        };
        if record.live_draws > 0 {
            return Err(BatchError::ReferentialIntegrityViolation {
                geometry,
                live_draws: record.live_draws,
            });
        }
        self.geometries.remove(geometry);
        log::debug!("Freed geometry {:?}", geometry);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Draws
    // ------------------------------------------------------------------

    /// Append a draw of `geometry` with its instance payload
    ///
    /// `frame` selects a sub-range of the geometry's indices; `None` draws all
    /// of them.
    pub fn add_draw(
        &mut self,
        geometry: GeometryKey,
        frame: Option<IndexRange>,
        payload: &[u8],
    ) -> BatchResult<DrawKey> {
        self.check_payload(payload)?;
        let record = self
            .geometries
            .get(geometry)
            .ok_or(BatchError::UnknownHandle(UnknownHandle::Geometry(geometry)))?
            .object_record(frame)?;

        let slot = self.objects.len();
        self.objects.push(record);
        self.payloads.extend_from_slice(payload);
        let key = self.draws.insert(DrawEntry { slot, geometry });
        if let Some(geometry) = self.geometries.get_mut(geometry) {
            geometry.live_draws += 1;
        }

        self.objects_dirty.mark_slot(slot);
        self.payloads_dirty.mark_slot(slot);
        self.needs_indirect_regen = true;
        log::trace!("Added draw {:?} of geometry {:?} at slot {}", key, geometry, slot);
        Ok(key)
    }

    /// Overwrite a draw's instance payload in place
    pub fn edit_payload(&mut self, draw: DrawKey, payload: &[u8]) -> BatchResult<()> {
        self.check_payload(payload)?;
        let slot = self.slot_of(draw)?;
        let stride = self.stride();
        self.payloads[slot * stride..(slot + 1) * stride].copy_from_slice(payload);
        self.payloads_dirty.mark_slot(slot);
        Ok(())
    }

    /// Select a different index sub-range of the draw's geometry
    pub fn edit_object(&mut self, draw: DrawKey, frame: IndexRange) -> BatchResult<()> {
        let entry = *self
            .draws
            .get(draw)
            .ok_or(BatchError::UnknownHandle(UnknownHandle::Draw(draw)))?;
        let record = self
            .geometries
            .get(entry.geometry)
            .ok_or(BatchError::UnknownHandle(UnknownHandle::Geometry(entry.geometry)))?
            .object_record(Some(frame))?;

        self.objects[entry.slot] = record;
        self.objects_dirty.mark_slot(entry.slot);
        self.needs_indirect_regen = true;
        Ok(())
    }

    /// Remove a draw and compact both tables
    ///
    /// Returns `false` if the key is unknown; removal is idempotent.
    pub fn remove_draw(&mut self, draw: DrawKey) -> bool {
        let Some(entry) = self.draws.remove(draw) else {
            return false;
        };

        let stride = self.stride();
        self.objects.remove(entry.slot);
        self.payloads.drain(entry.slot * stride..(entry.slot + 1) * stride);
        for other in self.draws.values_mut() {
            if other.slot > entry.slot {
                other.slot -= 1;
            }
        }
        if let Some(geometry) = self.geometries.get_mut(entry.geometry) {
            geometry.live_draws = geometry.live_draws.saturating_sub(1);
        }

        // Every later slot moved; partial spans no longer describe the change
        self.objects_dirty.mark_full();
        self.payloads_dirty.mark_full();
        self.needs_indirect_regen = true;
        log::trace!("Removed draw {:?} from slot {}", draw, entry.slot);
        true
    }

    fn check_payload(&self, payload: &[u8]) -> BatchResult<()> {
        if payload.len() != self.stride() {
            return Err(BatchError::PayloadSize { expected: self.stride(), actual: payload.len() });
        }
        Ok(())
    }

    fn slot_of(&self, draw: DrawKey) -> BatchResult<usize> {
        self.draws
            .get(draw)
            .map(|entry| entry.slot)
            .ok_or(BatchError::UnknownHandle(UnknownHandle::Draw(draw)))
    }

    fn stride(&self) -> usize {
        self.config.instance_stride as usize
    }

    // ------------------------------------------------------------------
    // Device synchronisation
    // ------------------------------------------------------------------

    /// Upload pending table changes
    ///
    /// Each table uploads only its dirty slot span, or the whole table when a
    /// removal or buffer growth invalidated partial tracking.
    pub fn flush_to_device(&mut self, device: &mut dyn GraphicsDevice) -> BatchResult<()> {
        self.ensure_draw_capacity(device)?;

        let objects_state = self.objects_dirty.take();
        if let Err(err) = self.upload_objects(device, &objects_state) {
            self.objects_dirty.mark_full();
            return Err(err);
        }

        let payloads_state = self.payloads_dirty.take();
        if let Err(err) = self.upload_payloads(device, &payloads_state) {
            self.payloads_dirty.mark_full();
            return Err(err);
        }
        Ok(())
    }

    fn upload_objects(&self, device: &mut dyn GraphicsDevice, state: &DirtyState) -> BatchResult<()> {
        let Some(slots) = span_for(state, self.objects.len()) else {
            return Ok(());
        };
        let bytes: &[u8] = bytemuck::cast_slice(&self.objects[slots.clone()]);
        device.update_buffer_range(self.buffers.objects, (slots.start * OBJECT_RECORD_SIZE) as u64, bytes)?;
        Ok(())
    }

    fn upload_payloads(&self, device: &mut dyn GraphicsDevice, state: &DirtyState) -> BatchResult<()> {
        let Some(slots) = span_for(state, self.objects.len()) else {
            return Ok(());
        };
        let stride = self.stride();
        let bytes = &self.payloads[slots.start * stride..slots.end * stride];
        device.update_buffer_range(self.buffers.instances, (slots.start * stride) as u64, bytes)?;
        Ok(())
    }

    /// Grow the object and payload buffers when the draw count outran them
    fn ensure_draw_capacity(&mut self, device: &mut dyn GraphicsDevice) -> BatchResult<()> {
        let needed = self.objects.len();
        if needed <= self.draw_capacity as usize {
            return Ok(());
        }

        let mut capacity = self.draw_capacity.max(1);
        while (capacity as usize) < needed {
            capacity = capacity.saturating_mul(2);
        }

        let created = create_all(
            device,
            &[
                Self::objects_descriptor(capacity),
                Self::instances_descriptor(capacity, self.config.instance_stride),
            ],
        )?;
        device.destroy_buffer(self.buffers.objects);
        device.destroy_buffer(self.buffers.instances);
        self.buffers.objects = created[0];
        self.buffers.instances = created[1];

        log::debug!("Grew pool draw tables from {} to {} slots", self.draw_capacity, capacity);
        self.draw_capacity = capacity;
        self.objects_dirty.mark_full();
        self.payloads_dirty.mark_full();
        self.needs_indirect_regen = true;
        Ok(())
    }

    /// Regenerate every indirect command from the object table
    ///
    /// Does nothing unless membership or index ranges changed since the last
    /// successful dispatch. Pending table changes are uploaded first so the
    /// pass never reads stale records. Returns whether a dispatch was issued.
    pub fn rebuild_indirect_commands(&mut self, device: &mut dyn GraphicsDevice) -> BatchResult<bool> {
        if !self.needs_indirect_regen {
            return Ok(false);
        }
        self.flush_to_device(device)?;

        let count = self.draw_count_u32();
        if count == 0 {
            self.needs_indirect_regen = false;
            return Ok(false);
        }

        let indirect = self.ensure_indirect_capacity(device, count)?;
        device.dispatch_compute(&ComputeDispatch {
            program: self.compute_program,
            input: self.buffers.objects,
            output: indirect,
            group_count: count / self.config.workgroup_size + 1,
            draw_count: count,
        })?;

        self.needs_indirect_regen = false;
        log::debug!("Regenerated {} indirect commands", count);
        Ok(true)
    }

    fn ensure_indirect_capacity(&mut self, device: &mut dyn GraphicsDevice, count: u32) -> BatchResult<BufferHandle> {
        if let Some(indirect) = self.buffers.indirect {
            if self.indirect_capacity >= count {
                return Ok(indirect);
            }
        }

        let capacity = count.max(self.draw_capacity);
        let region = device.create_indirect_command_region(capacity)?;
        if let Some(old) = self.buffers.indirect.replace(region) {
            device.destroy_buffer(old);
        }
        self.indirect_capacity = capacity;
        Ok(region)
    }

    /// Upload, regenerate if needed, then issue one indirect draw for the pool
    ///
    /// Returns whether the indirect commands were regenerated this call.
    pub fn draw(&mut self, device: &mut dyn GraphicsDevice, program: ProgramHandle) -> BatchResult<bool> {
        self.flush_to_device(device)?;
        let rebuilt = self.rebuild_indirect_commands(device)?;

        let count = self.draw_count_u32();
        let Some(indirect) = self.buffers.indirect else {
            return Ok(rebuilt);
        };
        if count == 0 {
            return Ok(rebuilt);
        }

        device.submit_indirect(&IndirectSubmission {
            program,
            vertex_buffer: self.buffers.vertices,
            index_buffer: self.buffers.indices,
            instance_buffer: self.buffers.instances,
            indirect_buffer: indirect,
            draw_count: count,
        })?;
        Ok(rebuilt)
    }

    /// Release every device buffer owned by the pool
    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.destroy_buffer(self.buffers.vertices);
        device.destroy_buffer(self.buffers.indices);
        device.destroy_buffer(self.buffers.objects);
        device.destroy_buffer(self.buffers.instances);
        if let Some(indirect) = self.buffers.indirect {
            device.destroy_buffer(indirect);
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Geometry record for a key
    pub fn geometry(&self, geometry: GeometryKey) -> Option<&GeometryRecord> {
        self.geometries.get(geometry)
    }

    /// Current table slot of a draw
    pub fn draw_slot(&self, draw: DrawKey) -> Option<usize> {
        self.draws.get(draw).map(|entry| entry.slot)
    }

    /// Geometry a draw references
    pub fn draw_geometry(&self, draw: DrawKey) -> Option<GeometryKey> {
        self.draws.get(draw).map(|entry| entry.geometry)
    }

    /// Object record of a draw
    pub fn object_record(&self, draw: DrawKey) -> Option<&ObjectRecord> {
        self.draw_slot(draw).map(|slot| &self.objects[slot])
    }

    /// Instance payload of a draw
    pub fn payload(&self, draw: DrawKey) -> Option<&[u8]> {
        let stride = self.stride();
        self.draw_slot(draw).map(|slot| &self.payloads[slot * stride..(slot + 1) * stride])
    }

    /// All live draws with their current slots
    pub fn draws(&self) -> impl Iterator<Item = (DrawKey, usize)> + '_ {
        self.draws.iter().map(|(key, entry)| (key, entry.slot))
    }

    /// All live geometries
    pub fn geometries(&self) -> impl Iterator<Item = (GeometryKey, &GeometryRecord)> {
        self.geometries.iter()
    }

    /// Object record table in slot order
    pub fn objects(&self) -> &[ObjectRecord] {
        &self.objects
    }

    /// Instance payload table in slot order
    pub fn payloads(&self) -> &[u8] {
        &self.payloads
    }

    /// Number of live draws
    pub fn draw_count(&self) -> usize {
        self.objects.len()
    }

    fn draw_count_u32(&self) -> u32 {
        u32::try_from(self.objects.len()).unwrap_or(u32::MAX)
    }

    /// Number of live geometries
    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    /// Whether the indirect region is out of date
    pub fn needs_indirect_regen(&self) -> bool {
        self.needs_indirect_regen
    }

    /// Pending upload state of the object table
    pub fn objects_dirty(&self) -> &DirtyState {
        &self.objects_dirty
    }

    /// Pending upload state of the payload table
    pub fn payloads_dirty(&self) -> &DirtyState {
        &self.payloads_dirty
    }

    /// Device buffers owned by the pool
    pub fn buffers(&self) -> &PoolBuffers {
        &self.buffers
    }

    /// Slots currently available in the device-side draw tables
    pub fn draw_capacity(&self) -> u32 {
        self.draw_capacity
    }

    /// Configuration the pool was created with
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Vertices and indices currently allocated
    pub fn usage(&self) -> (u64, u64) {
        self.geometries.values().fold((0, 0), |(v, i), g| {
            (v + u64::from(g.vertex_range.count), i + u64::from(g.index_range.count))
        })
    }
}

/// Convert raw geometry byte lengths into vertex and index counts
///
/// Fails with `MisalignedData` for partial elements, and with a fatal
/// `Configuration` error when the geometry could never fit even an empty pool.
pub fn measure_geometry(config: &PoolConfig, vertex_len: usize, index_len: usize) -> BatchResult<(u32, u32)> {
    let vertex_count = element_count(RegionKind::Vertex, vertex_len, config.vertex_stride)?;
    let index_count = element_count(RegionKind::Index, index_len, INDEX_SIZE as u32)?;
    if vertex_count > config.vertex_capacity || index_count > config.index_capacity {
        return Err(BatchError::Configuration(format!(
            "geometry of {} vertices / {} indices exceeds pool capacity of {} / {}",
            vertex_count, index_count, config.vertex_capacity, config.index_capacity
        )));
    }
    Ok((vertex_count, index_count))
}

fn element_count(region: RegionKind, len: usize, stride: u32) -> BatchResult<u32> {
    if len % stride as usize != 0 {
        return Err(BatchError::MisalignedData { region, len, stride });
    }
    u32::try_from(len / stride as usize)
        .map_err(|_| BatchError::Configuration(format!("{len} bytes of {region} data exceeds addressable range")))
}

/// Slot span to upload for a dirty state, clamped to the table length
fn span_for(state: &DirtyState, len: usize) -> Option<std::ops::Range<usize>> {
    let span = match state {
        DirtyState::Clean => return None,
        DirtyState::Span(span) => span.start.min(len)..span.end.min(len),
        DirtyState::Full => 0..len,
    };
    (!span.is_empty()).then_some(span)
}

/// Create every buffer or none of them
fn create_all(device: &mut dyn GraphicsDevice, descriptors: &[BufferDescriptor]) -> BatchResult<Vec<BufferHandle>> {
    let mut created = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        match device.create_buffer(descriptor) {
            Ok(handle) => created.push(handle),
            Err(err) => {
                for handle in created {
                    device.destroy_buffer(handle);
                }
                return Err(err.into());
            }
        }
    }
    Ok(created)
}
