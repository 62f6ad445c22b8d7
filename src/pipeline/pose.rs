use crate::types::{Body, BodyTrackingState, JointIndex, LandmarkSet, Point3};

/// Sensor meters to output inches.
pub const METERS_TO_OUTPUT_UNITS: f32 = 39.37;
/// Half the distance between the eyes, in output units.
pub const EYE_HALF_SPACING: f32 = 1.25;
/// Mechanical range of the sensor mount.
pub const MAX_TILT_DEGREES: f32 = 27.0;

/// Where the sensor sits in the output frame and how far it is pitched.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Calibration {
    /// Sensor position in output units.
    pub offset: Point3,
    tilt_degrees: f32,
}

impl Calibration {
    pub fn new(offset: Point3, tilt_degrees: f32) -> Self {
        Self {
            offset,
            tilt_degrees: clamp_tilt(tilt_degrees),
        }
    }

    pub fn tilt_degrees(&self) -> f32 {
        self.tilt_degrees
    }

    pub fn set_tilt_degrees(&mut self, tilt_degrees: f32) {
        self.tilt_degrees = clamp_tilt(tilt_degrees);
    }

    /// Pitch-corrects a sensor-space point, converts it to output units and
    /// moves it by the mount offset.
    pub fn to_world(&self, point: Point3) -> Point3 {
        let angle = (-self.tilt_degrees).to_radians();
        let (sin, cos) = angle.sin_cos();
        let y = point.y * cos - point.z * sin;
        let z = point.z * cos + point.y * sin;
        Point3 {
            x: point.x * METERS_TO_OUTPUT_UNITS + self.offset.x,
            y: y * METERS_TO_OUTPUT_UNITS + self.offset.y,
            z: z * METERS_TO_OUTPUT_UNITS + self.offset.z,
        }
    }
}

pub fn clamp_tilt(tilt_degrees: f32) -> f32 {
    if tilt_degrees.is_nan() {
        return 0.0;
    }
    tilt_degrees.clamp(-MAX_TILT_DEGREES, MAX_TILT_DEGREES)
}

/// Sideways lean of the head over the shoulders, in radians, always >= 0.
pub fn head_tilt(head: Point3, shoulder_center: Point3) -> f32 {
    let ratio = (shoulder_center.x - head.x) / (shoulder_center.y - head.y);
    if ratio.is_nan() {
        return 0.0;
    }
    ratio.atan().abs()
}

/// Left and right eye positions derived from the head point.
///
/// The two lean branches are not mirror images of each other: leaning right
/// flips the sign of the vertical offset.
pub fn eye_points(head: Point3, shoulder_center: Point3) -> (Point3, Point3) {
    let tilt = head_tilt(head, shoulder_center);
    let dx = tilt.cos() * EYE_HALF_SPACING;
    let dy = tilt.sin() * EYE_HALF_SPACING;
    let mut left = head;
    let mut right = head;

    if head.x < shoulder_center.x {
        left.x -= dx;
        left.y -= dy;
        right.x += dx;
        right.y += dy;
    } else {
        right.x += dx;
        right.y -= dy;
        left.x -= dx;
        left.y += dy;
    }
    (left, right)
}

/// Rewrites the four active landmarks from `body`. Reserved slots are left alone.
pub fn transform_body(body: &Body, calibration: &Calibration, landmarks: &mut LandmarkSet) {
    let world = |index| calibration.to_world(body.joint(index).position);
    let head = world(JointIndex::Head);
    let shoulder_center = world(JointIndex::ShoulderCenter);

    let (left_eye, right_eye) = eye_points(head, shoulder_center);
    landmarks.left_eye = left_eye;
    landmarks.right_eye = right_eye;
    landmarks.right_elbow = world(JointIndex::ElbowRight);
    landmarks.right_hand = world(JointIndex::HandRight);
}

/// Applies `transform_body` only when the body carries joint data.
/// Returns whether the landmarks were rewritten.
pub fn update_landmarks(
    body: Option<&Body>,
    calibration: &Calibration,
    landmarks: &mut LandmarkSet,
) -> bool {
    match body {
        Some(body) if body.state == BodyTrackingState::FullyTracked => {
            transform_body(body, calibration, landmarks);
            true
        }
        _ => false,
    }
}
