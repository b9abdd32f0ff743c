//! Batch engine demo application
//!
//! Runs the batching system headless: worker threads move a fleet of cubes
//! around while the main thread owns the device and runs frames. Pass a
//! `.toml` or `.ron` config path as the first argument to override the pool
//! sizes and log level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use batch_engine::foundation::logging;
use batch_engine::foundation::math::{translation, Mat4, Vec3};
use batch_engine::prelude::*;
use rand::prelude::*;

const FILL_PROGRAM: ProgramHandle = ProgramHandle(1);
const DRAW_PROGRAM: ProgramHandle = ProgramHandle(2);

const WORKERS: usize = 3;
const CUBES_PER_WORKER: usize = 40;
const STANDALONE_CUBES: usize = 4;
const DEMO_FRAMES: u64 = 180;
const TARGET_FPS: u32 = 60;

/// Demo state owned by the main thread
pub struct BatchDemo {
    device: HeadlessDevice,
    renderer: BatchRenderer,
    timer: FrameTimer,
    standalone: Vec<Model>,
    workers: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl BatchDemo {
    /// Create the device and renderer from configuration
    pub fn new(config: &BatchConfig) -> Result<Self, BatchError> {
        log::info!("Creating batch demo...");
        Ok(Self {
            device: HeadlessDevice::new(),
            renderer: BatchRenderer::new(config.pool.clone(), FILL_PROGRAM)?,
            timer: FrameTimer::new(),
            standalone: Vec::new(),
            workers: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Upload geometry, create models and start the worker threads
    pub fn initialize(&mut self) -> Result<(), BatchError> {
        let frames = FrameTable::new()
            .with_frame("front", IndexRange::new(0, 6))
            .with_frame("back", IndexRange::new(6, 6))
            .with_frame("whole", IndexRange::new(0, 36));
        let cube = Arc::new(MeshData::cube().with_frames(frames)?);

        // Shared geometry for the instanced fleet
        let base = self
            .renderer
            .upload_geometry(&mut self.device, cube.vertex_bytes(), cube.index_bytes())?;
        let shared_frames = Arc::new(cube.frames().clone());

        let mut rng = thread_rng();
        for n in 0..STANDALONE_CUBES {
            let position = Vec3::new(rng.gen_range(-20.0..20.0), 0.0, rng.gen_range(-20.0..20.0));
            #[allow(clippy::cast_possible_truncation)]
            let texture = n as u32;
            let mut model = Model::standalone(Arc::clone(&cube))
                .with_transform(translation(position))
                .with_texture(texture);
            model.upload(&mut self.renderer, &mut self.device)?;
            self.standalone.push(model);
        }

        for worker in 0..WORKERS {
            let mut fleet = Vec::with_capacity(CUBES_PER_WORKER);
            for _ in 0..CUBES_PER_WORKER {
                let mut model = Model::instanced(base, Arc::clone(&shared_frames));
                model.upload(&mut self.renderer, &mut self.device)?;
                fleet.push(model);
            }
            let producer = self.renderer.producer();
            let running = Arc::clone(&self.running);
            self.workers.push(thread::spawn(move || animate_fleet(worker, fleet, &producer, &running)));
        }

        log::info!(
            "Initialized {} standalone and {} instanced cubes across {} workers",
            STANDALONE_CUBES,
            WORKERS * CUBES_PER_WORKER,
            WORKERS
        );
        Ok(())
    }

    /// Run frames until the demo length is reached, then shut down
    pub fn run(mut self) -> Result<(), BatchError> {
        while self.timer.frame_count() < DEMO_FRAMES {
            self.timer.update();
            self.frame()?;
            self.timer.hold_at_fps(TARGET_FPS);
        }

        self.running.store(false, Ordering::Release);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("A fleet worker panicked");
            }
        }

        let producer = self.renderer.producer();
        for model in &mut self.standalone {
            model.remove(&producer);
        }
        // Apply the workers' final removals and the standalone frees
        self.frame()?;

        log_stats(self.renderer.stats());
        self.renderer.destroy(&mut self.device);
        log::info!("Batch demo finished, {} device buffers leaked", self.device.live_buffer_count());
        Ok(())
    }

    fn frame(&mut self) -> Result<(), BatchError> {
        let report = self.renderer.frame(&mut self.device, DRAW_PROGRAM)?;
        if report.rejected > 0 {
            log::warn!("{} command(s) rejected this frame", report.rejected);
        }
        if self.timer.is_second() {
            log::info!("{} fps", self.timer.fps());
            log_stats(self.renderer.stats());
        }
        Ok(())
    }
}

/// Worker loop: jitter every cube and flip animation frames now and then
fn animate_fleet(worker: usize, mut fleet: Vec<Model>, producer: &BatchProducer, running: &AtomicBool) {
    let mut rng = thread_rng();
    let mut angle = 0.0f32;

    while running.load(Ordering::Acquire) {
        angle += 0.05;
        for model in &mut fleet {
            let position = Vec3::new(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-50.0..50.0),
            );
            let transform: Mat4 = translation(position) * Mat4::from_euler_angles(0.0, angle, 0.0);
            model.set_transform(producer, transform);

            if rng.gen_bool(0.1) {
                let frame = *["front", "back", "whole"].choose(&mut rng).unwrap_or(&"whole");
                if let Err(err) = model.set_frame(producer, frame) {
                    log::warn!("Worker {} could not switch frame: {}", worker, err);
                }
            }
        }
        thread::sleep(Duration::from_millis(8));
    }

    for model in &mut fleet {
        model.remove(producer);
    }
    log::debug!("Worker {} removed its fleet", worker);
}

fn log_stats(stats: &BatchStats) {
    log::info!(
        "frames={} pools={} geometries={} draws={} applied={} rejected={} rebuilds={} last_flush={:?}",
        stats.frames,
        stats.pools,
        stats.geometries,
        stats.draws,
        stats.commands_applied,
        stats.commands_rejected,
        stats.indirect_rebuilds,
        stats.last_flush
    );
}

fn load_config() -> Result<BatchConfig, ConfigError> {
    let config = match std::env::args().nth(1) {
        Some(path) => BatchConfig::load_from_file(&path)?,
        None => BatchConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init_with_level(&config.logging.level);

    log::info!("Starting batch engine demo");
    let mut demo = BatchDemo::new(&config)?;
    demo.initialize()?;
    demo.run()?;
    Ok(())
}
