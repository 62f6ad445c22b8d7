use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, bounded};

use super::{pose::update_landmarks, selector::select_targets};
use crate::{
    capture::{CaptureDevice, CaptureFeeds},
    context::{TrackerContext, TrackingSnapshot},
    error::FrameError,
    net::{
        broadcast::{DEFAULT_SEND_TIMEOUT, PacketBroadcaster},
        discovery::DiscoveryDriver,
    },
    types::{LandmarkSet, SkeletonFrame},
};

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);
const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug)]
pub struct AcquisitionOptions {
    pub wait_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Cancellation for the worker. Clones can be handed to signal handlers.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Sender<()>,
}

impl StopSignal {
    pub fn stop(&self) {
        let _ = self.tx.try_send(());
    }
}

#[derive(Debug)]
pub struct AcquisitionHandle {
    stop: StopSignal,
    handle: Option<thread::JoinHandle<u64>>,
}

impl AcquisitionHandle {
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Signals the worker and waits for it. Returns the number of ticks processed.
    pub fn stop(mut self) -> u64 {
        self.stop.stop();
        self.join_worker()
    }

    /// Waits for the worker to exit on its own, e.g. after a `StopSignal` fired.
    pub fn join(mut self) -> u64 {
        self.join_worker()
    }

    fn join_worker(&mut self) -> u64 {
        match self.handle.take().map(thread::JoinHandle::join) {
            Some(Ok(frames)) => frames,
            Some(Err(_)) => {
                log::error!("acquisition worker panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.stop.stop();
        self.join_worker();
    }
}

pub fn start_acquisition<D>(
    device: D,
    context: TrackerContext,
    options: AcquisitionOptions,
) -> Result<AcquisitionHandle>
where
    D: CaptureDevice + 'static,
{
    let (stop_tx, stop_rx) = bounded(1);
    let worker = AcquisitionLoop::new(device, context, options);

    let handle = thread::Builder::new()
        .name("acquisition".into())
        .spawn(move || worker.run(&stop_rx))
        .context("failed to spawn acquisition worker")?;

    Ok(AcquisitionHandle {
        stop: StopSignal { tx: stop_tx },
        handle: Some(handle),
    })
}

/// Rolling frames-per-second, recomputed once at least a second has passed.
#[derive(Debug)]
pub struct FpsCounter {
    last_report: Instant,
    frames_at_report: u64,
    fps: u32,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            last_report: now,
            frames_at_report: 0,
            fps: 0,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Returns the new rate when a report is due.
    pub fn observe(&mut self, now: Instant, frames: u64) -> Option<u32> {
        let elapsed = now.saturating_duration_since(self.last_report);
        if elapsed < FPS_REPORT_INTERVAL {
            return None;
        }
        let elapsed_ms = elapsed.as_millis().max(1);
        let counted = u128::from(frames.saturating_sub(self.frames_at_report));
        self.fps = u32::try_from((counted * 1000 + 500) / elapsed_ms).unwrap_or(u32::MAX);
        self.last_report = now;
        self.frames_at_report = frames;
        Some(self.fps)
    }
}

#[derive(Debug, PartialEq)]
enum Wake {
    Stop,
    Timeout,
    Depth,
    Skeleton,
    Color,
}

struct AcquisitionLoop<D> {
    device: D,
    feeds: CaptureFeeds,
    context: TrackerContext,
    broadcaster: PacketBroadcaster,
    discovery: DiscoveryDriver,
    wait_timeout: Duration,
    applied_options: Option<u64>,
    latest_skeleton: Option<SkeletonFrame>,
    landmarks: LandmarkSet,
    frames: u64,
    fps: FpsCounter,
}

impl<D: CaptureDevice> AcquisitionLoop<D> {
    fn new(device: D, context: TrackerContext, options: AcquisitionOptions) -> Self {
        Self {
            feeds: device.feeds(),
            device,
            context,
            broadcaster: PacketBroadcaster::new(options.send_timeout),
            discovery: DiscoveryDriver::new(),
            wait_timeout: options.wait_timeout,
            applied_options: None,
            latest_skeleton: None,
            landmarks: LandmarkSet::default(),
            frames: 0,
            fps: FpsCounter::new(Instant::now()),
        }
    }

    fn run(mut self, stop_rx: &Receiver<()>) -> u64 {
        log::info!(
            "acquisition worker started (wait timeout {:?})",
            self.wait_timeout
        );

        loop {
            if stop_requested(stop_rx) {
                break;
            }
            self.sync_capture_options();
            self.discovery.tick(
                self.context.discovery.is_enabled(),
                self.context.listen_port(),
                &self.context.registry,
            );

            let keep_going = match self.wait(stop_rx) {
                Wake::Stop => false,
                Wake::Timeout => true,
                Wake::Depth => self.on_depth(),
                Wake::Skeleton => self.on_skeleton(),
                Wake::Color => self.on_color(),
            };
            if !keep_going {
                break;
            }

            if let Some(fps) = self.fps.observe(Instant::now(), self.frames) {
                log::debug!("{fps} fps ({} frames total)", self.frames);
            }
        }

        log::info!("acquisition worker stopped after {} frames", self.frames);
        self.frames
    }

    fn wait(&self, stop_rx: &Receiver<()>) -> Wake {
        let mut select = Select::new();
        let stop = select.recv(stop_rx);
        let depth = select.recv(&self.feeds.depth);
        let skeleton = select.recv(&self.feeds.skeleton);
        let color = select.recv(&self.feeds.color);

        let Ok(ready) = select.ready_timeout(self.wait_timeout) else {
            return Wake::Timeout;
        };
        // Stop outranks data even when both are ready.
        if ready == stop || stop_requested(stop_rx) {
            Wake::Stop
        } else if ready == depth {
            Wake::Depth
        } else if ready == skeleton {
            Wake::Skeleton
        } else if ready == color {
            Wake::Color
        } else {
            Wake::Timeout
        }
    }

    fn sync_capture_options(&mut self) {
        let (generation, options) = self.context.capture_options();
        if self.applied_options == Some(generation) {
            return;
        }
        if let Err(err) = self.device.configure(&options) {
            log::warn!("failed to configure capture device: {err:#}");
        }
        self.applied_options = Some(generation);
    }

    /// A depth frame drives the tick; the newest skeleton frame rides along.
    fn on_depth(&mut self) -> bool {
        let frame = match self.feeds.depth.try_recv() {
            Ok(frame) => frame,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return feed_closed("depth"),
        };
        if let Err(err) = frame.validate() {
            log::warn!("rejected depth frame: {err}");
            return true;
        }

        self.drain_skeletons();
        match self.latest_skeleton.take().ok_or(FrameError::Unavailable) {
            Ok(skeleton) => self.process(&skeleton),
            Err(err) => log::trace!("depth tick skipped: {err}"),
        }
        true
    }

    fn on_skeleton(&mut self) -> bool {
        match self.feeds.skeleton.try_recv() {
            Ok(frame) => {
                self.latest_skeleton = Some(frame);
                self.drain_skeletons();
                true
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => feed_closed("skeleton"),
        }
    }

    fn on_color(&mut self) -> bool {
        match self.feeds.color.try_recv() {
            Ok(frame) => {
                if let Err(err) = frame.validate() {
                    log::warn!("rejected color frame: {err}");
                }
                true
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => feed_closed("color"),
        }
    }

    fn drain_skeletons(&mut self) {
        while let Ok(newer) = self.feeds.skeleton.try_recv() {
            self.latest_skeleton = Some(newer);
        }
    }

    fn process(&mut self, skeleton: &SkeletonFrame) {
        let selection = select_targets(&skeleton.bodies);
        self.device.set_tracked_identifiers(selection.tracked_ids());

        let primary = selection
            .primary
            .and_then(|selected| skeleton.bodies.get(selected.index));
        update_landmarks(primary, &self.context.calibration(), &mut self.landmarks);

        let slots = self.context.registry.snapshot();
        let report = self.broadcaster.broadcast(&slots, &self.landmarks);
        // The reported rate counts these ticks; depth frames without a skeleton are not ticks.
        self.frames += 1;
        log::trace!(
            "tick {}: packet delivered to {} endpoints",
            self.frames,
            report.delivered()
        );

        self.context.snapshot.store(TrackingSnapshot {
            frame_number: self.frames,
            timestamp: Some(skeleton.timestamp),
            selection,
            landmarks: self.landmarks,
            fps: self.fps.fps(),
        });
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    match stop_rx.try_recv() {
        Ok(()) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn feed_closed(feed: &str) -> bool {
    log::error!("capture {feed} feed closed, stopping acquisition");
    false
}

#[cfg(test)]
mod tests {
    use std::{
        net::UdpSocket,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::{
        capture::{CaptureOptions, FeedSenders, feed_channels},
        net::broadcast::{PACKET_LEN, decode_packet},
        pipeline::pose::Calibration,
        settings::Settings,
        types::{Body, BodyTrackingState, DepthFrame, Joint, JointIndex, Point3},
    };

    #[derive(Default)]
    struct Requests {
        tracked: Vec<[u32; 2]>,
        configured: Vec<CaptureOptions>,
    }

    struct ScriptedDevice {
        feeds: CaptureFeeds,
        requests: Arc<Mutex<Requests>>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn feeds(&self) -> CaptureFeeds {
            self.feeds.clone()
        }

        fn set_tracked_identifiers(&mut self, ids: [u32; 2]) {
            self.requests.lock().unwrap().tracked.push(ids);
        }

        fn configure(&mut self, options: &CaptureOptions) -> Result<()> {
            self.requests.lock().unwrap().configured.push(*options);
            Ok(())
        }
    }

    fn scripted() -> (ScriptedDevice, FeedSenders, Arc<Mutex<Requests>>) {
        let (senders, feeds) = feed_channels();
        let requests = Arc::new(Mutex::new(Requests::default()));
        let device = ScriptedDevice {
            feeds,
            requests: requests.clone(),
        };
        (device, senders, requests)
    }

    fn depth(width: u32, height: u32, len: usize) -> DepthFrame {
        DepthFrame {
            timestamp: Instant::now(),
            width,
            height,
            pixels: vec![0; len],
        }
    }

    fn upright_body(id: u32, state: BodyTrackingState, x: f32, z: f32) -> Body {
        let mut body = Body {
            tracking_id: id,
            state,
            depth: z,
            ..Body::not_tracked()
        };
        body.set_joint(JointIndex::Head, Joint::tracked(Point3::new(x, 0.6, z)));
        body.set_joint(
            JointIndex::ShoulderCenter,
            Joint::tracked(Point3::new(x, 0.35, z)),
        );
        body
    }

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn context_sending_to(socket: &UdpSocket) -> TrackerContext {
        let mut settings = Settings::default();
        settings.endpoints[2].host = "127.0.0.1".into();
        settings.endpoints[2].port = socket.local_addr().unwrap().port().to_string();
        TrackerContext::new(settings, false)
    }

    fn wait_for_frame(context: &TrackerContext, frame_number: u64) -> Arc<TrackingSnapshot> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let snapshot = context.latest();
            if snapshot.frame_number >= frame_number || Instant::now() > deadline {
                return snapshot;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn fps_uses_rounded_integer_rate() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);
        assert_eq!(counter.observe(start + Duration::from_millis(999), 29), None);
        assert_eq!(
            counter.observe(start + Duration::from_millis(2000), 61),
            Some(30)
        );
        assert_eq!(
            counter.observe(start + Duration::from_millis(3000), 91),
            Some(30)
        );
        assert_eq!(counter.fps(), 30);
    }

    #[test]
    fn depth_tick_selects_transforms_and_broadcasts() {
        let socket = receiver();
        let context = context_sending_to(&socket);
        let (device, senders, requests) = scripted();
        let handle = start_acquisition(device, context.clone(), AcquisitionOptions::default())
            .unwrap();

        senders.push_skeleton(SkeletonFrame::new(vec![
            upright_body(21, BodyTrackingState::PositionOnly, 0.5, 3.0),
            upright_body(22, BodyTrackingState::FullyTracked, 0.0, 2.0),
        ]));
        senders.push_depth(depth(4, 4, 16));

        let mut buf = [0u8; 64];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        assert_eq!(len, PACKET_LEN);
        let eyes = decode_packet(&buf[..len]).unwrap();
        let head = Calibration::default().to_world(Point3::new(0.0, 0.6, 2.0));
        assert!((eyes[0] - (head.x - 1.25)).abs() < 1e-3);
        assert!((eyes[3] - (head.x + 1.25)).abs() < 1e-3);
        assert!((eyes[5] - head.z).abs() < 1e-3);

        let snapshot = wait_for_frame(&context, 1);
        assert_eq!(snapshot.frame_number, 1);
        assert_eq!(snapshot.selection.tracked_ids(), [22, 21]);
        assert!(snapshot.timestamp.is_some());

        assert_eq!(handle.stop(), 1);
        let requests = requests.lock().unwrap();
        assert_eq!(requests.tracked, vec![[22, 21]]);
        assert_eq!(requests.configured.len(), 1);
    }

    #[test]
    fn malformed_depth_frame_is_rejected_without_stopping() {
        let socket = receiver();
        let context = context_sending_to(&socket);
        let (device, senders, _requests) = scripted();
        let handle = start_acquisition(device, context.clone(), AcquisitionOptions::default())
            .unwrap();

        let body = upright_body(5, BodyTrackingState::FullyTracked, 0.0, 2.0);
        senders.push_skeleton(SkeletonFrame::new(vec![body.clone()]));
        senders.push_depth(depth(4, 4, 15));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(context.latest().frame_number, 0);

        senders.push_skeleton(SkeletonFrame::new(vec![body]));
        senders.push_depth(depth(4, 4, 16));
        assert_eq!(wait_for_frame(&context, 1).frame_number, 1);
        assert!(!handle.is_finished());
        handle.stop();
    }

    #[test]
    fn position_only_primary_keeps_last_landmarks() {
        let socket = receiver();
        let context = context_sending_to(&socket);
        let (device, senders, _requests) = scripted();
        let handle = start_acquisition(device, context.clone(), AcquisitionOptions::default())
            .unwrap();

        senders.push_skeleton(SkeletonFrame::new(vec![upright_body(
            1,
            BodyTrackingState::FullyTracked,
            0.1,
            2.0,
        )]));
        senders.push_depth(depth(2, 2, 4));
        let first = wait_for_frame(&context, 1);

        senders.push_skeleton(SkeletonFrame::new(vec![upright_body(
            1,
            BodyTrackingState::PositionOnly,
            0.9,
            1.0,
        )]));
        senders.push_depth(depth(2, 2, 4));
        let second = wait_for_frame(&context, 2);

        assert_eq!(second.frame_number, 2);
        assert_eq!(second.landmarks, first.landmarks);
        handle.stop();
    }

    #[test]
    fn stop_preempts_a_long_wait() {
        let (device, _senders, _requests) = scripted();
        let context = TrackerContext::new(Settings::default(), false);
        let handle = start_acquisition(
            device,
            context,
            AcquisitionOptions {
                wait_timeout: Duration::from_secs(30),
                ..AcquisitionOptions::default()
            },
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        assert_eq!(handle.stop(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn pending_stop_wins_over_queued_frames() {
        let socket = receiver();
        let context = context_sending_to(&socket);
        let (device, senders, requests) = scripted();
        let body = upright_body(7, BodyTrackingState::FullyTracked, 0.0, 2.0);
        assert!(senders.push_skeleton(SkeletonFrame::new(vec![body])));
        assert!(senders.push_depth(depth(4, 4, 16)));

        let (stop_tx, stop_rx) = bounded(1);
        stop_tx.send(()).unwrap();
        let worker = AcquisitionLoop::new(device, context.clone(), AcquisitionOptions::default());
        assert_eq!(worker.run(&stop_rx), 0);

        assert!(requests.lock().unwrap().tracked.is_empty());
        assert_eq!(context.latest().frame_number, 0);
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        assert!(socket.recv_from(&mut [0u8; 64]).is_err());
    }

    #[test]
    fn wait_reports_stop_whichever_ready_operation_is_picked() {
        let context = TrackerContext::new(Settings::default(), false);
        let (device, senders, _requests) = scripted();
        let body = upright_body(7, BodyTrackingState::FullyTracked, 0.0, 2.0);
        assert!(senders.push_skeleton(SkeletonFrame::new(vec![body])));
        assert!(senders.push_depth(depth(4, 4, 16)));
        let worker = AcquisitionLoop::new(device, context, AcquisitionOptions::default());

        let (stop_tx, stop_rx) = bounded(1);
        for _ in 0..64 {
            stop_tx.send(()).unwrap();
            assert_eq!(worker.wait(&stop_rx), Wake::Stop);
            // Readiness alone leaves the stop message queued.
            let _ = stop_rx.try_recv();
        }
        assert_eq!(worker.feeds.depth.len(), 1);
        assert_eq!(worker.feeds.skeleton.len(), 1);
    }

    #[test]
    fn stop_signal_from_another_thread_ends_the_worker() {
        let (device, _senders, _requests) = scripted();
        let context = TrackerContext::new(Settings::default(), false);
        let handle = start_acquisition(device, context, AcquisitionOptions::default()).unwrap();

        let signal = handle.stop_signal();
        thread::spawn(move || signal.stop()).join().unwrap();
        handle.join();
    }

    #[test]
    fn applied_settings_reconfigure_the_device() {
        let (device, _senders, requests) = scripted();
        let context = TrackerContext::new(Settings::default(), false);
        let handle = start_acquisition(
            device,
            context.clone(),
            AcquisitionOptions {
                wait_timeout: Duration::from_millis(10),
                ..AcquisitionOptions::default()
            },
        )
        .unwrap();

        let seated = Settings {
            tracking_mode: crate::settings::TrackingMode::Seated,
            ..Settings::default()
        };
        context.apply_settings(&seated);

        let deadline = Instant::now() + Duration::from_secs(2);
        while requests.lock().unwrap().configured.len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.configured.len(), 2);
        assert!(!requests.configured[0].seated);
        assert!(requests.configured[1].seated);
    }
}
