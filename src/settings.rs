//! Operator settings persisted as a line-oriented text file.
//!
//! ```text
//! 9000                      listen port
//! 0 1 0                     tracking mode, selection mode, range mode
//! 0 12.5 -3 10              mount x y z, tilt degrees
//! 0.5 0.5 0.5 0.5 0.04      smoothing, correction, prediction, jitter, max deviation
//! 192.168.1.20 7000         six endpoint lines, "host port"
//! ...
//! ```
//!
//! An endpoint line may be blank or missing; that slot is empty. The last
//! token of an endpoint line is the port and everything before it the host.

use std::{fs, path::Path, str::SplitWhitespace};

use crate::{
    capture::{CaptureOptions, SmoothingParams},
    error::SettingsError,
    net::registry::{EndpointSlot, EndpointSlots},
    pipeline::pose::Calibration,
    types::Point3,
};

pub const DEFAULT_SETTINGS_FILE: &str = "kinectInfo.cfg";
pub const DEFAULT_LISTEN_PORT: u16 = 9000;

const ENDPOINT_FIRST_LINE: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrackingMode {
    #[default]
    Default,
    Seated,
}

impl TrackingMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Default),
            1 => Some(Self::Seated),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// How the sensor decides which bodies get full joint tracking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectionMode {
    #[default]
    Default,
    Nearest1,
    Nearest2,
    Sticky1,
    Sticky2,
}

impl SelectionMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Default),
            1 => Some(Self::Nearest1),
            2 => Some(Self::Nearest2),
            3 => Some(Self::Sticky1),
            4 => Some(Self::Sticky2),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RangeMode {
    #[default]
    Default,
    Near,
}

impl RangeMode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Default),
            1 => Some(Self::Near),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub listen_port: u16,
    pub tracking_mode: TrackingMode,
    pub selection_mode: SelectionMode,
    pub range_mode: RangeMode,
    /// Sensor position in output units.
    pub mount_position: Point3,
    /// Stored as entered; clamped only when turned into a `Calibration`.
    pub mount_tilt_degrees: f32,
    pub smoothing: SmoothingParams,
    pub endpoints: EndpointSlots,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            tracking_mode: TrackingMode::default(),
            selection_mode: SelectionMode::default(),
            range_mode: RangeMode::default(),
            mount_position: Point3::ZERO,
            mount_tilt_degrees: 0.0,
            smoothing: SmoothingParams::default(),
            endpoints: Default::default(),
        }
    }
}

impl Settings {
    pub fn calibration(&self) -> Calibration {
        Calibration::new(self.mount_position, self.mount_tilt_degrees)
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            seated: self.tracking_mode == TrackingMode::Seated,
            near_range: self.range_mode == RangeMode::Near,
            app_selects_skeletons: self.selection_mode != SelectionMode::Default,
            elevation_degrees: self.calibration().tilt_degrees().round() as i32,
            smoothing: self.smoothing,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        fs::write(path, self.render())?;
        Ok(())
    }

    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        let lines: Vec<&str> = text.lines().collect();
        let line = |number: usize| Fields::at(&lines, number);

        let mut first = line(1)?;
        let listen_port = first.parse("listen_port")?;

        let mut modes = line(2)?;
        let tracking_mode = modes.mode("tracking_mode", TrackingMode::from_code)?;
        let selection_mode = modes.mode("selection_mode", SelectionMode::from_code)?;
        let range_mode = modes.mode("range_mode", RangeMode::from_code)?;

        let mut mount = line(3)?;
        let mount_position = Point3::new(
            mount.parse("mount_x")?,
            mount.parse("mount_y")?,
            mount.parse("mount_z")?,
        );
        let mount_tilt_degrees = mount.parse("mount_tilt")?;

        let mut filter = line(4)?;
        let smoothing = SmoothingParams {
            smoothing: filter.parse("smoothing")?,
            correction: filter.parse("correction")?,
            prediction: filter.parse("prediction")?,
            jitter_radius: filter.parse("jitter_radius")?,
            max_deviation_radius: filter.parse("max_deviation_radius")?,
        };

        let mut endpoints: EndpointSlots = Default::default();
        for (index, slot) in endpoints.iter_mut().enumerate() {
            if let Some(text) = lines.get(ENDPOINT_FIRST_LINE - 1 + index) {
                let text = text.trim();
                let (host, port) = text.rsplit_once(char::is_whitespace).unwrap_or((text, ""));
                *slot = EndpointSlot::new(host, port);
            }
        }

        Ok(Self {
            listen_port,
            tracking_mode,
            selection_mode,
            range_mode,
            mount_position,
            mount_tilt_degrees,
            smoothing,
            endpoints,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{}\n", self.listen_port));
        out.push_str(&format!(
            "{} {} {}\n",
            self.tracking_mode.code(),
            self.selection_mode.code(),
            self.range_mode.code()
        ));
        let p = self.mount_position;
        out.push_str(&format!(
            "{} {} {} {}\n",
            p.x, p.y, p.z, self.mount_tilt_degrees
        ));
        let s = self.smoothing;
        out.push_str(&format!(
            "{} {} {} {} {}\n",
            s.smoothing, s.correction, s.prediction, s.jitter_radius, s.max_deviation_radius
        ));
        for slot in &self.endpoints {
            let slot = slot.clone().normalized();
            if slot.is_empty() {
                out.push('\n');
            } else {
                out.push_str(&format!("{} {}\n", slot.host, slot.port));
            }
        }
        out
    }
}

struct Fields<'a> {
    line: usize,
    tokens: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    /// Tokens of 1-based line `line`.
    fn at(lines: &[&'a str], line: usize) -> Result<Self, SettingsError> {
        let text: &'a str = lines
            .get(line - 1)
            .copied()
            .ok_or(SettingsError::MissingLine { line })?;
        Ok(Self {
            line,
            tokens: text.split_whitespace(),
        })
    }

    fn next(&mut self, field: &'static str) -> Result<&'a str, SettingsError> {
        self.tokens.next().ok_or(SettingsError::MissingField {
            line: self.line,
            field,
        })
    }

    fn parse<T: std::str::FromStr>(&mut self, field: &'static str) -> Result<T, SettingsError> {
        let token = self.next(field)?;
        token
            .parse()
            .map_err(|_| SettingsError::invalid(self.line, field, token))
    }

    fn mode<M>(
        &mut self,
        field: &'static str,
        from_code: fn(i32) -> Option<M>,
    ) -> Result<M, SettingsError> {
        let token = self.next(field)?;
        token
            .parse()
            .ok()
            .and_then(from_code)
            .ok_or_else(|| SettingsError::invalid(self.line, field, token))
    }
}
