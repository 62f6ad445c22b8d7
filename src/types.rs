use std::time::Instant;

use crate::error::FrameError;

pub const MAX_BODIES: usize = 6;
pub const JOINT_COUNT: usize = 20;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const ZERO: Point3 = Point3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyTrackingState {
    #[default]
    NotTracked,
    PositionOnly,
    FullyTracked,
}

impl BodyTrackingState {
    /// Bodies in either tracked state compete for selection.
    pub fn is_candidate(self) -> bool {
        matches!(
            self,
            BodyTrackingState::PositionOnly | BodyTrackingState::FullyTracked
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JointTrackingState {
    #[default]
    NotTracked,
    Inferred,
    Tracked,
}

/// Skeleton joint slots in sensor order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointIndex {
    HipCenter = 0,
    Spine,
    ShoulderCenter,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Joint {
    /// Sensor space, meters.
    pub position: Point3,
    pub state: JointTrackingState,
}

impl Joint {
    pub fn tracked(position: Point3) -> Self {
        Self {
            position,
            state: JointTrackingState::Tracked,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Body {
    pub tracking_id: u32,
    pub state: BodyTrackingState,
    /// Projected depth reported by the sensor; smaller is nearer.
    pub depth: f32,
    pub joints: [Joint; JOINT_COUNT],
}

impl Body {
    pub fn not_tracked() -> Self {
        Self {
            tracking_id: 0,
            state: BodyTrackingState::NotTracked,
            depth: f32::INFINITY,
            joints: [Joint::default(); JOINT_COUNT],
        }
    }

    pub fn joint(&self, index: JointIndex) -> &Joint {
        &self.joints[index as usize]
    }

    pub fn set_joint(&mut self, index: JointIndex, joint: Joint) {
        self.joints[index as usize] = joint;
    }
}

#[derive(Clone, Debug)]
pub struct SkeletonFrame {
    pub timestamp: Instant,
    pub bodies: Vec<Body>,
}

impl SkeletonFrame {
    pub fn new(bodies: Vec<Body>) -> Self {
        Self {
            timestamp: Instant::now(),
            bodies,
        }
    }
}

/// Packed 16-bit depth image (depth in the upper 13 bits, player index in the lower 3).
#[derive(Clone, Debug)]
pub struct DepthFrame {
    pub timestamp: Instant,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u16>,
}

impl DepthFrame {
    pub fn validate(&self) -> Result<(), FrameError> {
        let expected = (self.width as usize).saturating_mul(self.height as usize);
        if self.pixels.len() != expected {
            return Err(FrameError::MalformedBuffer {
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ColorFrame {
    pub timestamp: Instant,
    pub width: u32,
    pub height: u32,
    pub bgrx: Vec<u8>,
}

impl ColorFrame {
    pub fn validate(&self) -> Result<(), FrameError> {
        let expected = (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4);
        if self.bgrx.len() != expected {
            return Err(FrameError::MalformedBuffer {
                expected,
                actual: self.bgrx.len(),
            });
        }
        Ok(())
    }
}

/// World-space output points in calibrated units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LandmarkSet {
    pub left_eye: Point3,
    pub right_eye: Point3,
    pub right_elbow: Point3,
    pub right_hand: Point3,
    /// Unused; kept so the full landmark block stays eighteen floats wide.
    pub reserved: [Point3; 2],
}

impl LandmarkSet {
    pub fn eyes(&self) -> [f32; 6] {
        [
            self.left_eye.x,
            self.left_eye.y,
            self.left_eye.z,
            self.right_eye.x,
            self.right_eye.y,
            self.right_eye.z,
        ]
    }

    pub fn to_floats(&self) -> [f32; 18] {
        let mut out = [0.0f32; 18];
        let points = [
            self.left_eye,
            self.right_eye,
            self.right_elbow,
            self.right_hand,
            self.reserved[0],
            self.reserved[1],
        ];
        for (chunk, point) in out.chunks_exact_mut(3).zip(points) {
            chunk.copy_from_slice(&[point.x, point.y, point.z]);
        }
        out
    }
}
