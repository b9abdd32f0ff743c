//! Pool lifecycle scenarios: packing, compaction, integrity and dirty uploads

use crate::config::batch_config::{PoolConfig, INDEX_SIZE};
use crate::render::batching::{
    AllocationRange, BatchError, BatchRenderer, DirtyState, GeometryPool, PoolId, PoolManager,
};
use crate::render::device::{HeadlessDevice, ProgramHandle};

const FILL: ProgramHandle = ProgramHandle(1);
const DRAW: ProgramHandle = ProgramHandle(2);
const STRIDE: usize = 80;

fn geometry_bytes(vertices: usize, indices: usize) -> (Vec<u8>, Vec<u8>) {
    (vec![0xAB; vertices * 32], vec![0; indices * INDEX_SIZE])
}

#[test]
fn test_remove_first_draw_then_free_geometry() {
    let mut device = HeadlessDevice::new();
    let mut renderer = BatchRenderer::new(PoolConfig::with_capacity(100_000), FILL).expect("renderer");
    let producer = renderer.producer();

    let (v, i) = geometry_bytes(24, 36);
    let g1 = renderer.upload_geometry(&mut device, &v, &i).expect("upload");
    let pool = renderer.manager().pool(g1.pool).expect("pool");
    let record = pool.geometry(g1.key).expect("record");
    assert_eq!(record.vertex_range, AllocationRange::new(0, 24));
    assert_eq!(record.index_range, AllocationRange::new(0, 36));

    let d1 = producer.add_draw(g1, None, &[1; STRIDE]);
    let d2 = producer.add_draw(g1, None, &[2; STRIDE]);
    renderer.frame(&mut device, DRAW).expect("frame");

    let d2_ref = renderer.resolve(d2).expect("bound");
    assert_eq!(renderer.manager().pool(g1.pool).unwrap().draw_slot(d2_ref.key), Some(1));

    producer.remove_draw(d1);
    renderer.frame(&mut device, DRAW).expect("frame");
    let pool = renderer.manager().pool(g1.pool).unwrap();
    assert_eq!(pool.draw_slot(d2_ref.key), Some(0));
    assert_eq!(pool.payload(d2_ref.key).unwrap(), &[2; STRIDE][..]);

    producer.remove_draw(d2);
    producer.free_geometry(g1);
    let report = renderer.frame(&mut device, DRAW).expect("frame");
    assert_eq!(report.rejected, 0);
    assert_eq!(renderer.stats().geometries, 0);
}

#[test]
fn test_integrity_violation_leaves_tables_unchanged() {
    let mut device = HeadlessDevice::new();
    let mut manager = PoolManager::new(PoolConfig::with_capacity(1_000), FILL).expect("manager");
    let (v, i) = geometry_bytes(24, 36);
    let geometry = manager.upload_geometry(&mut device, &v, &i).expect("upload");
    manager.add_draw(geometry, None, &[7; STRIDE]).expect("draw");
    manager.draw_all(&mut device, DRAW).expect("draw");

    let pool = manager.pool(PoolId(0)).unwrap();
    let objects = pool.objects().to_vec();
    let payloads = pool.payloads().to_vec();
    let uploads = device.uploads().len();

    let err = manager.free_geometry(geometry).unwrap_err();
    assert!(matches!(err, BatchError::ReferentialIntegrityViolation { live_draws: 1, .. }));

    let pool = manager.pool(PoolId(0)).unwrap();
    assert_eq!(pool.objects(), &objects[..]);
    assert_eq!(pool.payloads(), &payloads[..]);
    assert!(pool.geometry(geometry.key).is_some());
    assert!(!pool.objects_dirty().is_dirty());
    assert!(!pool.needs_indirect_regen());

    manager.draw_all(&mut device, DRAW).expect("draw");
    assert_eq!(device.uploads().len(), uploads);
}

#[test]
fn test_compaction_shifts_only_later_slots() {
    let mut device = HeadlessDevice::new();
    let mut pool = GeometryPool::new(&mut device, &PoolConfig::with_capacity(1_000), FILL).expect("pool");
    let (v, i) = geometry_bytes(3, 3);
    let geometry = pool.upload_geometry(&mut device, &v, &i).expect("upload");

    let draws: Vec<_> = (0..10u8)
        .map(|n| pool.add_draw(geometry, None, &[n; STRIDE]).expect("draw"))
        .collect();

    for removed in [7usize, 0, 4] {
        let before: Vec<_> = pool.draws().collect();
        let removed_slot = pool.draw_slot(draws[removed]).expect("live");
        assert!(pool.remove_draw(draws[removed]));

        for (key, old_slot) in before {
            if key == draws[removed] {
                continue;
            }
            let new_slot = pool.draw_slot(key).expect("still live");
            if old_slot > removed_slot {
                assert_eq!(new_slot, old_slot - 1);
            } else {
                assert_eq!(new_slot, old_slot);
            }
        }
    }

    // Payloads travelled with their draws
    for (n, draw) in draws.iter().enumerate() {
        if let Some(payload) = pool.payload(*draw) {
            assert!(payload.iter().all(|&b| usize::from(b) == n));
        }
    }
    assert_eq!(pool.draw_count(), 7);
}

#[test]
fn test_payload_edit_uploads_exactly_one_slot() {
    let mut device = HeadlessDevice::new();
    let mut renderer = BatchRenderer::new(PoolConfig::with_capacity(1_000), FILL).expect("renderer");
    let producer = renderer.producer();
    let (v, i) = geometry_bytes(8, 36);
    let geometry = renderer.upload_geometry(&mut device, &v, &i).expect("upload");

    let handles: Vec<_> = (0..6u8).map(|n| producer.add_draw(geometry, None, &[n; STRIDE])).collect();
    renderer.frame(&mut device, DRAW).expect("frame");
    device.take_uploads();
    let dispatches = device.dispatches().len();

    producer.edit_payload(handles[4], &[0xEE; STRIDE]);
    renderer.frame(&mut device, DRAW).expect("frame");

    let pool = renderer.manager().pool(geometry.pool).unwrap();
    let uploads = device.take_uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].buffer, pool.buffers().instances);
    assert_eq!(uploads[0].offset, (4 * STRIDE) as u64);
    assert_eq!(uploads[0].len, STRIDE);
    assert_eq!(device.dispatches().len(), dispatches, "payload edits never regenerate commands");

    let contents = device.buffer_contents(pool.buffers().instances).unwrap();
    assert_eq!(&contents[4 * STRIDE..5 * STRIDE], &[0xEE; STRIDE][..]);
    assert_eq!(*pool.payloads_dirty(), DirtyState::Clean);
}

#[test]
fn test_round_trip_upload_and_free_restores_capacity() {
    let mut device = HeadlessDevice::new();
    let mut manager = PoolManager::new(PoolConfig::with_capacity(500), FILL).expect("manager");

    let sizes = [(24, 36), (100, 150), (7, 9), (200, 300), (1, 3)];
    let handles: Vec<_> = sizes
        .iter()
        .map(|&(v, i)| {
            let (vb, ib) = geometry_bytes(v, i);
            manager.upload_geometry(&mut device, &vb, &ib).expect("upload")
        })
        .collect();
    assert_eq!(manager.pools().len(), 1);

    let pool = manager.pool(PoolId(0)).unwrap();
    let ranges: Vec<_> = pool.geometries().map(|(_, g)| g.vertex_range).collect();
    for (n, a) in ranges.iter().enumerate() {
        for b in &ranges[n + 1..] {
            assert!(!a.overlaps(b));
        }
    }

    for handle in handles {
        assert_eq!(manager.free_geometry(handle), Ok(true));
    }
    let (v, i) = geometry_bytes(500, 500);
    let whole = manager.upload_geometry(&mut device, &v, &i).expect("full-size upload");
    assert_eq!(whole.pool, PoolId(0));
}
