//! Batched models
//!
//! A model is either standalone (owns its geometry, uploaded once per model)
//! or instanced (draws geometry that was uploaded once and shared). Both keep
//! a transform and texture layer that make up their instance payload, and both
//! can switch between named animation frames stored back to back in their
//! index data.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::foundation::collections::DrawHandle;
use crate::foundation::math::Mat4;
use crate::render::batching::error::{BatchError, BatchResult};
use crate::render::batching::pool_manager::GeometryHandle;
use crate::render::batching::records::{IndexRange, InstanceData};
use crate::render::batching::renderer::{BatchProducer, BatchRenderer};
use crate::render::device::GraphicsDevice;

/// Vertex layout matching the default 32-byte vertex stride
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Position in model space
    pub position: [f32; 3],
    /// Normal vector
    pub normal: [f32; 3],
    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Create a vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { position, normal, tex_coord }
    }
}

/// Named index sub-ranges of one mesh, relative to the mesh's first index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameTable {
    frames: BTreeMap<String, IndexRange>,
}

impl FrameTable {
    /// Create an empty frame table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a frame
    pub fn with_frame(mut self, name: impl Into<String>, range: IndexRange) -> Self {
        self.frames.insert(name.into(), range);
        self
    }

    /// Look up a frame by name
    pub fn get(&self, name: &str) -> Option<IndexRange> {
        self.frames.get(name).copied()
    }

    /// Frame names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.frames.keys().map(String::as_str)
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the table has no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// CPU-side mesh ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    frames: FrameTable,
}

impl MeshData {
    /// Create a mesh without animation frames
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices, frames: FrameTable::new() }
    }

    /// Attach animation frames, checking every frame lies inside the index data
    pub fn with_frames(mut self, frames: FrameTable) -> BatchResult<Self> {
        let available = u32::try_from(self.indices.len()).unwrap_or(u32::MAX);
        if let Some(range) = frames.frames.values().find(|range| range.end() > u64::from(available)) {
            return Err(BatchError::InvalidSubrange { offset: range.offset, count: range.count, available });
        }
        self.frames = frames;
        Ok(self)
    }

    /// Unit cube centred at the origin
    pub fn cube() -> Self {
        let vertices = vec![
            // Front face
            Vertex::new([-1.0, -1.0, 1.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
            Vertex::new([1.0, -1.0, 1.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
            Vertex::new([1.0, 1.0, 1.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
            Vertex::new([-1.0, 1.0, 1.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            // Back face
            Vertex::new([-1.0, -1.0, -1.0], [0.0, 0.0, -1.0], [1.0, 0.0]),
            Vertex::new([-1.0, 1.0, -1.0], [0.0, 0.0, -1.0], [1.0, 1.0]),
            Vertex::new([1.0, 1.0, -1.0], [0.0, 0.0, -1.0], [0.0, 1.0]),
            Vertex::new([1.0, -1.0, -1.0], [0.0, 0.0, -1.0], [0.0, 0.0]),
        ];

        let indices = vec![
            0, 1, 2, 2, 3, 0, // front
            4, 5, 6, 6, 7, 4, // back
            4, 0, 3, 3, 5, 4, // left
            1, 7, 6, 6, 2, 1, // right
            3, 2, 6, 6, 5, 3, // top
            4, 7, 1, 1, 0, 4, // bottom
        ];

        Self::new(vertices, indices)
    }

    /// Vertex data as uploaded to the vertex region
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as uploaded to the index region
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Animation frames
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of indices
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}

/// Where a model's geometry comes from
#[derive(Debug, Clone)]
pub enum ModelKind {
    /// Owns its geometry; uploading the model uploads the mesh
    Standalone(Arc<MeshData>),
    /// Draws geometry uploaded once and shared between many models
    Instanced {
        /// Shared geometry
        base: GeometryHandle,
        /// Animation frames of the shared geometry
        frames: Arc<FrameTable>,
    },
}

/// One batched draw with its transform, texture and current frame
#[derive(Debug, Clone)]
pub struct Model {
    kind: ModelKind,
    transform: Mat4,
    texture_id: u32,
    frame: Option<IndexRange>,
    geometry: Option<GeometryHandle>,
    draw: Option<DrawHandle>,
}

impl Model {
    /// Model owning its own mesh
    pub fn standalone(mesh: Arc<MeshData>) -> Self {
        Self::with_kind(ModelKind::Standalone(mesh))
    }

    /// Model drawing shared geometry
    pub fn instanced(base: GeometryHandle, frames: Arc<FrameTable>) -> Self {
        Self::with_kind(ModelKind::Instanced { base, frames })
    }

    fn with_kind(kind: ModelKind) -> Self {
        Self { kind, transform: Mat4::identity(), texture_id: 0, frame: None, geometry: None, draw: None }
    }

    /// Set the initial texture layer
    pub fn with_texture(mut self, texture_id: u32) -> Self {
        self.texture_id = texture_id;
        self
    }

    /// Set the initial transform
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    /// Add the model to the batching system
    ///
    /// Standalone models upload their mesh immediately; the draw itself is
    /// queued. Uploading an already uploaded model returns its existing handle.
    pub fn upload(&mut self, renderer: &mut BatchRenderer, device: &mut dyn GraphicsDevice) -> BatchResult<DrawHandle> {
        if let Some(draw) = self.draw {
            return Ok(draw);
        }

        let geometry = match &self.kind {
            ModelKind::Standalone(mesh) => renderer.upload_geometry(device, mesh.vertex_bytes(), mesh.index_bytes())?,
            ModelKind::Instanced { base, .. } => *base,
        };
        let producer = renderer.producer();
        let draw = producer.add_draw(geometry, self.frame, &self.payload_bytes(producer.instance_stride()));

        self.geometry = Some(geometry);
        self.draw = Some(draw);
        Ok(draw)
    }

    /// Move the model
    pub fn set_transform(&mut self, producer: &BatchProducer, transform: Mat4) {
        self.transform = transform;
        self.push_payload(producer);
    }

    /// Change the texture layer
    pub fn set_texture(&mut self, producer: &BatchProducer, texture_id: u32) {
        self.texture_id = texture_id;
        self.push_payload(producer);
    }

    fn push_payload(&self, producer: &BatchProducer) {
        if let Some(draw) = self.draw {
            producer.edit_payload(draw, &self.payload_bytes(producer.instance_stride()));
        }
    }

    /// Payload zero-padded to the pool's instance stride
    fn payload_bytes(&self, stride: usize) -> Vec<u8> {
        let mut bytes = self.payload().as_bytes().to_vec();
        if bytes.len() < stride {
            bytes.resize(stride, 0);
        }
        bytes
    }

    /// Switch to a named animation frame
    pub fn set_frame(&mut self, producer: &BatchProducer, name: &str) -> BatchResult<()> {
        let frame = self.frames().get(name).ok_or_else(|| BatchError::UnknownFrame(name.to_string()))?;
        self.frame = Some(frame);
        if let Some(draw) = self.draw {
            producer.edit_object(draw, frame);
        }
        Ok(())
    }

    /// Remove the model's draw, and for standalone models its geometry too
    ///
    /// Returns `false` if the model was not uploaded.
    pub fn remove(&mut self, producer: &BatchProducer) -> bool {
        let Some(draw) = self.draw.take() else {
            return false;
        };
        producer.remove_draw(draw);

        // Queued after the removal, so the geometry is unreferenced by then
        if let (ModelKind::Standalone(_), Some(geometry)) = (&self.kind, self.geometry.take()) {
            producer.free_geometry(geometry);
        }
        true
    }

    /// Animation frames available to this model
    pub fn frames(&self) -> &FrameTable {
        match &self.kind {
            ModelKind::Standalone(mesh) => mesh.frames(),
            ModelKind::Instanced { frames, .. } => frames,
        }
    }

    /// Current instance payload
    pub fn payload(&self) -> InstanceData {
        InstanceData::new(&self.transform, self.texture_id)
    }

    /// Variant of the model
    pub fn kind(&self) -> &ModelKind {
        &self.kind
    }

    /// Draw handle, once uploaded
    pub fn handle(&self) -> Option<DrawHandle> {
        self.draw
    }

    /// Geometry drawn by the model, once uploaded
    pub fn geometry(&self) -> Option<GeometryHandle> {
        self.geometry
    }

    /// Current transform
    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::batch_config::PoolConfig;
    use crate::foundation::math::{translation, Vec3};
    use crate::render::device::{HeadlessDevice, ProgramHandle};
    use approx::assert_relative_eq;

    const DRAW: ProgramHandle = ProgramHandle(2);

    fn animated_cube() -> Arc<MeshData> {
        let frames = FrameTable::new()
            .with_frame("front", IndexRange::new(0, 6))
            .with_frame("back", IndexRange::new(6, 6));
        Arc::new(MeshData::cube().with_frames(frames).expect("frames fit"))
    }

    fn renderer() -> BatchRenderer {
        BatchRenderer::new(PoolConfig::with_capacity(1000), ProgramHandle(1)).expect("renderer")
    }

    #[test]
    fn test_cube_layout_matches_default_stride() {
        let cube = MeshData::cube();
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(cube.vertex_bytes().len(), 8 * 32);
        assert_eq!(cube.index_bytes().len(), 36 * 4);
    }

    #[test]
    fn test_frames_outside_index_data_are_rejected() {
        let frames = FrameTable::new().with_frame("bad", IndexRange::new(30, 12));
        assert!(matches!(
            MeshData::cube().with_frames(frames),
            Err(BatchError::InvalidSubrange { available: 36, .. })
        ));
    }

    #[test]
    fn test_standalone_models_upload_their_own_geometry() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        let mesh = animated_cube();

        let mut first = Model::standalone(Arc::clone(&mesh));
        let mut second = Model::standalone(mesh);
        first.upload(&mut renderer, &mut device).expect("upload");
        second.upload(&mut renderer, &mut device).expect("upload");
        renderer.frame(&mut device, DRAW).expect("frame");

        assert_ne!(first.geometry(), second.geometry());
        assert_eq!(renderer.stats().geometries, 2);
        assert_eq!(renderer.stats().draws, 2);
    }

    #[test]
    fn test_instanced_models_share_geometry() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        let mesh = animated_cube();
        let base = renderer
            .upload_geometry(&mut device, mesh.vertex_bytes(), mesh.index_bytes())
            .expect("upload");
        let frames = Arc::new(mesh.frames().clone());

        let mut models: Vec<_> = (0..3).map(|_| Model::instanced(base, Arc::clone(&frames))).collect();
        for model in &mut models {
            model.upload(&mut renderer, &mut device).expect("upload");
        }
        renderer.frame(&mut device, DRAW).expect("frame");

        assert_eq!(renderer.stats().geometries, 1);
        assert_eq!(renderer.stats().draws, 3);
        assert!(models.iter().all(|m| m.geometry() == Some(base)));
    }

    #[test]
    fn test_transform_and_frame_reach_the_pool() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        let producer = renderer.producer();
        let mut model = Model::standalone(animated_cube()).with_texture(4);
        let handle = model.upload(&mut renderer, &mut device).expect("upload");
        renderer.frame(&mut device, DRAW).expect("frame");

        model.set_transform(&producer, translation(Vec3::new(0.0, 5.0, 0.0)));
        model.set_frame(&producer, "back").expect("frame exists");
        renderer.frame(&mut device, DRAW).expect("frame");

        let draw = renderer.resolve(handle).expect("bound");
        let pool = renderer.manager().pool(draw.pool).expect("pool");
        let payload = InstanceData::from_bytes(pool.payload(draw.key).expect("payload")).expect("decode");
        assert_relative_eq!(payload.model[3][1], 5.0);
        assert_relative_eq!(payload.texture[0], 4.0);
        assert_eq!(pool.object_record(draw.key).expect("record").index_count, 6);
        assert_eq!(pool.object_record(draw.key).expect("record").index_start, 6);
    }

    #[test]
    fn test_payload_is_padded_to_wider_instance_stride() {
        let mut device = HeadlessDevice::new();
        let config = PoolConfig::with_capacity(1000).with_instance_stride(96);
        let mut renderer = BatchRenderer::new(config, ProgramHandle(1)).expect("renderer");
        let producer = renderer.producer();
        let mut model = Model::standalone(animated_cube()).with_texture(2);

        let handle = model.upload(&mut renderer, &mut device).expect("upload");
        let report = renderer.frame(&mut device, DRAW).expect("frame");
        assert_eq!(report.rejected, 0);
        assert_eq!(renderer.stats().draws, 1);

        model.set_transform(&producer, translation(Vec3::new(0.0, 0.0, 7.0)));
        let report = renderer.frame(&mut device, DRAW).expect("frame");
        assert_eq!(report.rejected, 0);

        let draw = renderer.resolve(handle).expect("bound");
        let pool = renderer.manager().pool(draw.pool).expect("pool");
        let bytes = pool.payload(draw.key).expect("payload");
        assert_eq!(bytes.len(), 96);
        assert!(bytes[80..].iter().all(|&b| b == 0));
        let payload = InstanceData::from_bytes(&bytes[..80]).expect("decode");
        assert_relative_eq!(payload.model[3][2], 7.0);
        assert_relative_eq!(payload.texture[0], 2.0);
    }

    #[test]
    fn test_unknown_frame_is_an_error() {
        let producer = renderer().producer();
        let mut model = Model::standalone(animated_cube());
        assert_eq!(
            model.set_frame(&producer, "walk"),
            Err(BatchError::UnknownFrame("walk".to_string()))
        );
    }

    #[test]
    fn test_remove_standalone_frees_geometry() {
        let mut device = HeadlessDevice::new();
        let mut renderer = renderer();
        let producer = renderer.producer();
        let mut model = Model::standalone(animated_cube());
        model.upload(&mut renderer, &mut device).expect("upload");
        renderer.frame(&mut device, DRAW).expect("frame");

        assert!(model.remove(&producer));
        assert!(!model.remove(&producer));
        renderer.frame(&mut device, DRAW).expect("frame");

        assert_eq!(renderer.stats().draws, 0);
        assert_eq!(renderer.stats().geometries, 0);
    }
}
