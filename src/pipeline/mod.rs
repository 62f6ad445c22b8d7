pub mod acquisition;
pub mod pose;
pub mod selector;

// Re-exports for convenience
pub use acquisition::{
    AcquisitionHandle, AcquisitionOptions, FpsCounter, StopSignal, start_acquisition,
};
pub use pose::{Calibration, transform_body, update_landmarks};
pub use selector::{SelectedBody, Selection, select_targets};
