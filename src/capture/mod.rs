//! Boundary to the sensor capture subsystem.
//!
//! A device hands out three frame feeds and accepts two requests from the
//! acquisition worker: which bodies to keep tracking, and which capture
//! options to run with.

pub mod simulated;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::types::{ColorFrame, DepthFrame, SkeletonFrame};

pub use simulated::{DeviceRecord, SimulatedCapture, SimulatorOptions};

/// Frames the capture subsystem buffers per feed before dropping.
pub const FEED_DEPTH: usize = 2;

/// Joint filter parameters forwarded to the sensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothingParams {
    pub smoothing: f32,
    pub correction: f32,
    pub prediction: f32,
    pub jitter_radius: f32,
    pub max_deviation_radius: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            smoothing: 0.5,
            correction: 0.5,
            prediction: 0.5,
            jitter_radius: 0.5,
            max_deviation_radius: 0.04,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CaptureOptions {
    pub seated: bool,
    pub near_range: bool,
    /// When set, the sensor fully tracks only the ids passed to
    /// `set_tracked_identifiers`.
    pub app_selects_skeletons: bool,
    pub elevation_degrees: i32,
    pub smoothing: SmoothingParams,
}

/// Receiving ends of the three feeds. A queued frame is the feed's "ready" signal.
#[derive(Clone, Debug)]
pub struct CaptureFeeds {
    pub depth: Receiver<DepthFrame>,
    pub skeleton: Receiver<SkeletonFrame>,
    pub color: Receiver<ColorFrame>,
}

/// Producer side of the feeds, owned by a device implementation. Pushes never
/// block; a frame is dropped when its feed is already full.
#[derive(Clone, Debug)]
pub struct FeedSenders {
    pub depth: Sender<DepthFrame>,
    pub skeleton: Sender<SkeletonFrame>,
    pub color: Sender<ColorFrame>,
}

impl FeedSenders {
    pub fn push_depth(&self, frame: DepthFrame) -> bool {
        self.depth.try_send(frame).is_ok()
    }

    pub fn push_skeleton(&self, frame: SkeletonFrame) -> bool {
        self.skeleton.try_send(frame).is_ok()
    }

    pub fn push_color(&self, frame: ColorFrame) -> bool {
        self.color.try_send(frame).is_ok()
    }
}

pub fn feed_channels() -> (FeedSenders, CaptureFeeds) {
    let (depth_tx, depth_rx) = bounded(FEED_DEPTH);
    let (skeleton_tx, skeleton_rx) = bounded(FEED_DEPTH);
    let (color_tx, color_rx) = bounded(FEED_DEPTH);
    (
        FeedSenders {
            depth: depth_tx,
            skeleton: skeleton_tx,
            color: color_tx,
        },
        CaptureFeeds {
            depth: depth_rx,
            skeleton: skeleton_rx,
            color: color_rx,
        },
    )
}

pub trait CaptureDevice: Send {
    fn feeds(&self) -> CaptureFeeds;

    /// Asks the sensor to keep tracking these two bodies. Zero means "none".
    fn set_tracked_identifiers(&mut self, ids: [u32; 2]);

    fn configure(&mut self, options: &CaptureOptions) -> anyhow::Result<()>;
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
    fn feeds(&self) -> CaptureFeeds {
        (**self).feeds()
    }

    fn set_tracked_identifiers(&mut self, ids: [u32; 2]) {
        (**self).set_tracked_identifiers(ids)
    }

    fn configure(&mut self, options: &CaptureOptions) -> anyhow::Result<()> {
        (**self).configure(options)
    }
}
