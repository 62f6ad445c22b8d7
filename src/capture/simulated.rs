use std::{
    f32::consts::TAU,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};

use super::{CaptureDevice, CaptureFeeds, CaptureOptions, FeedSenders, feed_channels};
use crate::{
    pipeline::selector::UNSET_TRACKING_ID,
    types::{
        Body, BodyTrackingState, ColorFrame, DepthFrame, JOINT_COUNT, Joint, MAX_BODIES, Point3,
        SkeletonFrame,
    },
};

const DEPTH_WIDTH: u32 = 320;
const DEPTH_HEIGHT: u32 = 240;
const COLOR_WIDTH: u32 = 320;
const COLOR_HEIGHT: u32 = 240;
const BACKGROUND_MM: u16 = 4000;
const PLAYER_INDEX_BITS: u16 = 3;

// Standing pose relative to the hip center, meters, in sensor joint order.
const STANDING_POSE: [(f32, f32, f32); JOINT_COUNT] = [
    (0.0, 0.0, 0.0),
    (0.0, 0.1, 0.0),
    (0.0, 0.35, 0.0),
    (0.0, 0.6, 0.0),
    (-0.18, 0.32, 0.0),
    (-0.25, 0.08, 0.02),
    (-0.27, -0.12, 0.0),
    (-0.28, -0.2, 0.0),
    (0.18, 0.32, 0.0),
    (0.25, 0.08, -0.05),
    (0.27, 0.2, -0.25),
    (0.28, 0.27, -0.3),
    (-0.09, -0.05, 0.0),
    (-0.1, -0.48, 0.02),
    (-0.1, -0.88, 0.05),
    (-0.1, -0.93, -0.05),
    (0.09, -0.05, 0.0),
    (0.1, -0.48, 0.02),
    (0.1, -0.88, 0.05),
    (0.1, -0.93, -0.05),
];

#[derive(Clone, Copy, Debug)]
pub struct SimulatorOptions {
    pub fps: u32,
    pub bodies: usize,
    pub seed: u64,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            fps: 30,
            bodies: 2,
            seed: 0,
        }
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    tracked_ids: Option<[u32; 2]>,
    tracked_requests: u64,
    options: Option<CaptureOptions>,
}

/// Read-side view of what the acquisition worker has asked of the device.
#[derive(Clone, Debug, Default)]
pub struct DeviceRecord {
    state: Arc<Mutex<DeviceState>>,
}

impl DeviceRecord {
    pub fn tracked_identifiers(&self) -> Option<[u32; 2]> {
        self.lock().tracked_ids
    }

    pub fn tracked_requests(&self) -> u64 {
        self.lock().tracked_requests
    }

    pub fn options(&self) -> Option<CaptureOptions> {
        self.lock().options
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Synthetic sensor: a few bodies swaying in front of a flat background,
/// emitted at a fixed rate on all three feeds.
pub struct SimulatedCapture {
    feeds: CaptureFeeds,
    record: DeviceRecord,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SimulatedCapture {
    pub fn start(options: SimulatorOptions) -> Result<Self> {
        let (senders, feeds) = feed_channels();
        let record = DeviceRecord::default();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_flag = stop.clone();
        let device_state = record.clone();
        let handle = thread::Builder::new()
            .name("simulated-capture".into())
            .spawn(move || run_simulator(options, senders, device_state, stop_flag))
            .context("failed to spawn simulated capture thread")?;

        Ok(Self {
            feeds,
            record,
            stop,
            handle: Some(handle),
        })
    }

    pub fn record(&self) -> DeviceRecord {
        self.record.clone()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimulatedCapture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CaptureDevice for SimulatedCapture {
    fn feeds(&self) -> CaptureFeeds {
        self.feeds.clone()
    }

    fn set_tracked_identifiers(&mut self, ids: [u32; 2]) {
        let mut state = self.record.lock();
        state.tracked_ids = Some(ids);
        state.tracked_requests += 1;
    }

    fn configure(&mut self, options: &CaptureOptions) -> Result<()> {
        log::info!(
            "simulated capture configured: seated={} near={} app_selects={} elevation={}",
            options.seated,
            options.near_range,
            options.app_selects_skeletons,
            options.elevation_degrees
        );
        self.record.lock().options = Some(*options);
        Ok(())
    }
}

fn run_simulator(
    options: SimulatorOptions,
    senders: FeedSenders,
    record: DeviceRecord,
    stop: Arc<AtomicBool>,
) {
    let interval = Duration::from_secs_f64(1.0 / f64::from(options.fps.max(1)));
    let scene = Scene::new(options.bodies, options.seed);
    let started = Instant::now();
    let mut next_frame = started;

    log::info!(
        "simulated capture running: {} bodies at {} fps",
        scene.phases.len(),
        options.fps.max(1)
    );

    while !stop.load(Ordering::Relaxed) {
        let (tracked, app_selects) = {
            let state = record.lock();
            (
                state.tracked_ids.unwrap_or([UNSET_TRACKING_ID; 2]),
                state.options.is_some_and(|o| o.app_selects_skeletons),
            )
        };
        let bodies = scene.bodies(started.elapsed().as_secs_f32(), tracked, app_selects);
        let depth = scene.depth_frame(&bodies);

        // Skeleton first so the depth tick that follows can consume it.
        senders.push_skeleton(SkeletonFrame::new(bodies));
        senders.push_depth(depth);
        senders.push_color(ColorFrame {
            timestamp: Instant::now(),
            width: COLOR_WIDTH,
            height: COLOR_HEIGHT,
            bgrx: vec![0x40; (COLOR_WIDTH * COLOR_HEIGHT * 4) as usize],
        });

        next_frame += interval;
        let now = Instant::now();
        if next_frame > now {
            thread::sleep(next_frame - now);
        } else {
            next_frame = now;
        }
    }

    log::info!("simulated capture stopped");
}

struct Scene {
    phases: Vec<f32>,
}

impl Scene {
    fn new(bodies: usize, seed: u64) -> Self {
        let phases = (0..bodies.min(MAX_BODIES) as u64)
            .map(|i| {
                let mixed = seed
                    .wrapping_add(i)
                    .wrapping_mul(0x9E37_79B9_7F4A_7C15);
                (mixed >> 40) as f32 / (1u64 << 24) as f32 * TAU
            })
            .collect();
        Self { phases }
    }

    fn bodies(&self, t: f32, tracked: [u32; 2], app_selects: bool) -> Vec<Body> {
        let mut bodies: Vec<Body> = self
            .phases
            .iter()
            .enumerate()
            .map(|(i, &phase)| {
                let tracking_id = i as u32 + 1;
                let fully_tracked = if app_selects {
                    tracked.contains(&tracking_id)
                } else {
                    i < 2
                };
                swaying_body(tracking_id, i as f32, phase, t, fully_tracked)
            })
            .collect();
        bodies.resize_with(MAX_BODIES, Body::not_tracked);
        bodies
    }

    fn depth_frame(&self, bodies: &[Body]) -> DepthFrame {
        let mut pixels =
            vec![BACKGROUND_MM << PLAYER_INDEX_BITS; (DEPTH_WIDTH * DEPTH_HEIGHT) as usize];

        for (player, body) in bodies.iter().enumerate() {
            if !body.state.is_candidate() {
                continue;
            }
            let depth_mm = (body.depth * 1000.0).clamp(0.0, 8191.0) as u16;
            let hip = body.joints[0].position;
            let center = ((hip.x / body.depth * 0.5 + 0.5) * DEPTH_WIDTH as f32) as i64;
            let half_width = (12.0 / body.depth) as i64;
            let value = (depth_mm << PLAYER_INDEX_BITS) | (player as u16 + 1);

            for row in (DEPTH_HEIGHT / 6)..(DEPTH_HEIGHT * 5 / 6) {
                for col in (center - half_width)..=(center + half_width) {
                    if (0..i64::from(DEPTH_WIDTH)).contains(&col) {
                        pixels[(row * DEPTH_WIDTH) as usize + col as usize] = value;
                    }
                }
            }
        }

        DepthFrame {
            timestamp: Instant::now(),
            width: DEPTH_WIDTH,
            height: DEPTH_HEIGHT,
            pixels,
        }
    }
}

fn swaying_body(tracking_id: u32, slot: f32, phase: f32, t: f32, fully_tracked: bool) -> Body {
    let depth = 1.6 + slot * 0.7 + 0.2 * (0.5 * t + phase).sin();
    let hip = Point3::new(0.25 * (0.8 * t + phase).sin(), -0.1, depth);
    let lean = 0.06 * (1.3 * t + phase).sin();

    let mut joints = [Joint::default(); JOINT_COUNT];
    for (joint, (dx, dy, dz)) in joints.iter_mut().zip(STANDING_POSE) {
        // Upper body leans with height above the hip.
        let lean_x = if dy > 0.0 { lean * dy / 0.6 } else { 0.0 };
        *joint = Joint::tracked(Point3::new(hip.x + dx + lean_x, hip.y + dy, hip.z + dz));
    }

    if fully_tracked {
        Body {
            tracking_id,
            state: BodyTrackingState::FullyTracked,
            depth,
            joints,
        }
    } else {
        Body {
            tracking_id,
            state: BodyTrackingState::PositionOnly,
            depth,
            ..Body::not_tracked()
        }
    }
}
