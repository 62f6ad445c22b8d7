//! State shared between the acquisition worker and the operator side.

use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Instant,
};

use crate::{
    capture::CaptureOptions,
    net::{discovery::DiscoveryToggle, registry::EndpointRegistry},
    pipeline::{pose::Calibration, selector::Selection},
    settings::Settings,
    types::LandmarkSet,
};

/// What the worker produced on its most recent tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackingSnapshot {
    /// Ticks processed since start; 0 until the first tick.
    pub frame_number: u64,
    pub timestamp: Option<Instant>,
    pub selection: Selection,
    pub landmarks: LandmarkSet,
    pub fps: u32,
}

/// Single-writer cell; readers get a whole snapshot or the previous one.
#[derive(Clone, Debug, Default)]
pub struct SnapshotCell {
    current: Arc<Mutex<Arc<TrackingSnapshot>>>,
}

impl SnapshotCell {
    pub fn load(&self) -> Arc<TrackingSnapshot> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self, snapshot: TrackingSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

#[derive(Debug)]
struct OperatorState {
    generation: u64,
    settings: Settings,
}

/// Everything the worker reads and the operator writes, behind clonable handles.
#[derive(Clone, Debug)]
pub struct TrackerContext {
    pub registry: EndpointRegistry,
    pub discovery: DiscoveryToggle,
    pub snapshot: SnapshotCell,
    operator: Arc<RwLock<OperatorState>>,
}

impl TrackerContext {
    pub fn new(settings: Settings, discovery_enabled: bool) -> Self {
        Self {
            registry: EndpointRegistry::from_slots(settings.endpoints.clone()),
            discovery: DiscoveryToggle::new(discovery_enabled),
            snapshot: SnapshotCell::default(),
            operator: Arc::new(RwLock::new(OperatorState {
                generation: 0,
                settings,
            })),
        }
    }

    /// Replaces calibration, modes and listen port, and overwrites all six
    /// endpoint slots. The worker reconfigures the device on its next iteration.
    pub fn apply_settings(&self, settings: &Settings) {
        let mut operator = self.operator.write().unwrap_or_else(PoisonError::into_inner);
        operator.generation += 1;
        operator.settings = settings.clone();
        self.registry.replace_all(settings.endpoints.clone());
        log::info!(
            "applied operator settings (generation {})",
            operator.generation
        );
    }

    pub fn calibration(&self) -> Calibration {
        self.read(|operator| operator.settings.calibration())
    }

    pub fn listen_port(&self) -> u16 {
        self.read(|operator| operator.settings.listen_port)
    }

    /// Capture options tagged with a counter that changes on every apply.
    pub fn capture_options(&self) -> (u64, CaptureOptions) {
        self.read(|operator| (operator.generation, operator.settings.capture_options()))
    }

    /// Settings as they would be saved now, including discovered endpoints.
    pub fn current_settings(&self) -> Settings {
        let mut settings = self.read(|operator| operator.settings.clone());
        settings.endpoints = self.registry.snapshot();
        settings
    }

    pub fn latest(&self) -> Arc<TrackingSnapshot> {
        self.snapshot.load()
    }

    fn read<T>(&self, f: impl FnOnce(&OperatorState) -> T) -> T {
        f(&self.operator.read().unwrap_or_else(PoisonError::into_inner))
    }
}
