//! Geometry Pool Manager
//!
//! Routes geometry uploads across an ordered set of identically-sized
//! geometry pools. Pools are tried in creation order and the first one with
//! room wins; when every pool is full a new one is created. Draws always live
//! in the pool that holds their geometry.

use crate::config::batch_config::PoolConfig;
use crate::foundation::collections::{DrawKey, GeometryKey};
use crate::render::device::{GraphicsDevice, ProgramHandle};

use super::error::{BatchError, BatchResult, UnknownHandle};
use super::geometry_pool::{measure_geometry, GeometryPool};
use super::records::IndexRange;

/// Index of a pool in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub usize);

/// Geometry stored in one of the manager's pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryHandle {
    /// Pool holding the geometry
    pub pool: PoolId,
    /// Pool-local key
    pub key: GeometryKey,
}

/// Draw stored in one of the manager's pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawRef {
    /// Pool holding the draw
    pub pool: PoolId,
    /// Pool-local key
    pub key: DrawKey,
}

/// Statistics across every pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolManagerStats {
    /// Pools created so far
    pub pool_count: usize,
    /// Live geometries across all pools
    pub geometry_count: usize,
    /// Live draws across all pools
    pub draw_count: usize,
    /// Vertices allocated across all pools
    pub vertices_used: u64,
    /// Indices allocated across all pools
    pub indices_used: u64,
    /// Pools that currently need an indirect rebuild
    pub pools_pending_rebuild: usize,
}

/// Result of drawing every pool once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawSummary {
    /// Pools with at least one draw
    pub pools_drawn: usize,
    /// Pools whose indirect commands were regenerated
    pub rebuilds: usize,
    /// Draws submitted across all pools
    pub draws: usize,
}

/// Manager for an ordered collection of fixed-capacity geometry pools
///
/// # Usage
///
/// ```rust,ignore
/// let mut manager = PoolManager::new(PoolConfig::default(), fill_program)?;
///
/// let cube = manager.upload_geometry(&mut device, &vertex_bytes, &index_bytes)?;
/// let draw = manager.add_draw(cube, None, instance.as_bytes())?;
///
/// manager.draw_all(&mut device, draw_program)?;
/// ```
pub struct PoolManager {
    config: PoolConfig,
    compute_program: ProgramHandle,
    pools: Vec<GeometryPool>,
}

impl PoolManager {
    /// Create a manager; pools are created lazily on first upload
    ///
    /// # Arguments
    ///
    /// * `config` - Capacities and strides shared by every pool
    /// * `compute_program` - Indirect fill pass used by every pool
    ///
    /// # Returns
    ///
    /// * `Ok(PoolManager)` - Manager with no pools yet
    /// * `Err(BatchError::Configuration)` - The pool configuration is invalid
    pub fn new(config: PoolConfig, compute_program: ProgramHandle) -> BatchResult<Self> {
        config
            .validate()
            .map_err(|err| BatchError::Configuration(err.to_string()))?;
        Ok(Self { config, compute_program, pools: Vec::new() })
    }

    /// Upload geometry into the first pool with room
    ///
    /// Capacity failures move on to the next pool, then to a freshly created
    /// one. Geometry that could not fit an empty pool is rejected up front as
    /// a fatal configuration error without creating a pool.
    ///
    /// # Arguments
    ///
    /// * `device` - Device owning the pool buffers
    /// * `vertex_bytes` - Packed vertices, a whole number of vertex strides
    /// * `index_bytes` - Packed `u32` indices
    ///
    /// # Returns
    ///
    /// * `Ok(GeometryHandle)` - Pool and key of the uploaded geometry
    /// * `Err(BatchError)` - Misaligned data, configuration or device failure
    pub fn upload_geometry(
        &mut self,
        device: &mut dyn GraphicsDevice,
        vertex_bytes: &[u8],
        index_bytes: &[u8],
    ) -> BatchResult<GeometryHandle> {
        measure_geometry(&self.config, vertex_bytes.len(), index_bytes.len())?;

        for (index, pool) in self.pools.iter_mut().enumerate() {
            match pool.upload_geometry(device, vertex_bytes, index_bytes) {
                Ok(key) => return Ok(GeometryHandle { pool: PoolId(index), key }),
                Err(err) if err.is_capacity() => {
                    log::trace!("Pool {} is full ({}), trying next", index, err);
                }
                Err(err) => return Err(err),
            }
        }

        let id = PoolId(self.pools.len());
        let mut pool = GeometryPool::new(device, &self.config, self.compute_program)?;
        match pool.upload_geometry(device, vertex_bytes, index_bytes) {
            Ok(key) => {
                self.pools.push(pool);
                log::info!("Created geometry pool {} ({} pools total)", id.0, self.pools.len());
                Ok(GeometryHandle { pool: id, key })
            }
            Err(err) => {
                pool.destroy(device);
                Err(err)
            }
        }
    }

    /// Upload geometry and add one draw of it in a single step
    ///
    /// If the draw cannot be added the geometry is freed again, so a failed
    /// call leaves no trace.
    pub fn add_model(
        &mut self,
        device: &mut dyn GraphicsDevice,
        vertex_bytes: &[u8],
        index_bytes: &[u8],
        frame: Option<IndexRange>,
        payload: &[u8],
    ) -> BatchResult<(GeometryHandle, DrawRef)> {
        let geometry = self.upload_geometry(device, vertex_bytes, index_bytes)?;
        match self.add_draw(geometry, frame, payload) {
            Ok(draw) => Ok((geometry, draw)),
            Err(err) => {
                self.free_geometry(geometry)?;
                Err(err)
            }
        }
    }

    /// Add a draw of existing geometry to the geometry's pool
    pub fn add_draw(
        &mut self,
        geometry: GeometryHandle,
        frame: Option<IndexRange>,
        payload: &[u8],
    ) -> BatchResult<DrawRef> {
        let key = self.pool_mut(geometry.pool)?.add_draw(geometry.key, frame, payload)?;
        Ok(DrawRef { pool: geometry.pool, key })
    }

    /// Overwrite a draw's instance payload
    pub fn edit_payload(&mut self, draw: DrawRef, payload: &[u8]) -> BatchResult<()> {
        self.pool_mut(draw.pool)?.edit_payload(draw.key, payload)
    }

    /// Select a different index sub-range for a draw
    pub fn edit_object(&mut self, draw: DrawRef, frame: IndexRange) -> BatchResult<()> {
        self.pool_mut(draw.pool)?.edit_object(draw.key, frame)
    }

    /// Remove a draw; unknown draws are ignored
    pub fn remove_draw(&mut self, draw: DrawRef) -> bool {
        self.pools
            .get_mut(draw.pool.0)
            .is_some_and(|pool| pool.remove_draw(draw.key))
    }

    /// Free geometry that no draw references
    ///
    /// Returns `Ok(false)` for unknown handles. Freed ranges become available
    /// to later uploads; the pool itself is kept.
    pub fn free_geometry(&mut self, geometry: GeometryHandle) -> BatchResult<bool> {
        match self.pools.get_mut(geometry.pool.0) {
            Some(pool) => pool.free_geometry(geometry.key),
            None => Ok(false),
        }
    }

    /// Draw every pool in creation order
    pub fn draw_all(&mut self, device: &mut dyn GraphicsDevice, program: ProgramHandle) -> BatchResult<DrawSummary> {
        let mut summary = DrawSummary::default();
        for pool in &mut self.pools {
            if pool.draw(device, program)? {
                summary.rebuilds += 1;
            }
            if pool.draw_count() > 0 {
                summary.pools_drawn += 1;
                summary.draws += pool.draw_count();
            }
        }
        Ok(summary)
    }

    /// All pools in creation order
    pub fn pools(&self) -> &[GeometryPool] {
        &self.pools
    }

    /// One pool by id
    pub fn pool(&self, id: PoolId) -> Option<&GeometryPool> {
        self.pools.get(id.0)
    }

    fn pool_mut(&mut self, id: PoolId) -> BatchResult<&mut GeometryPool> {
        self.pools
            .get_mut(id.0)
            .ok_or(BatchError::UnknownHandle(UnknownHandle::Pool(id.0)))
    }

    /// Shared pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Statistics across every pool
    pub fn stats(&self) -> PoolManagerStats {
        self.pools.iter().fold(
            PoolManagerStats { pool_count: self.pools.len(), ..PoolManagerStats::default() },
            |mut stats, pool| {
                let (vertices, indices) = pool.usage();
                stats.geometry_count += pool.geometry_count();
                stats.draw_count += pool.draw_count();
                stats.vertices_used += vertices;
                stats.indices_used += indices;
                stats.pools_pending_rebuild += usize::from(pool.needs_indirect_regen());
                stats
            },
        )
    }

    /// Release every pool's device buffers
    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        let count = self.pools.len();
        for pool in self.pools {
            pool.destroy(device);
        }
        log::info!("Destroyed {} geometry pool(s)", count);
    }
}
