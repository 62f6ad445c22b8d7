//! Body-tracking relay: picks the nearest tracked people from a depth sensor,
//! turns the primary body into calibrated eye positions and streams them to
//! up to six UDP endpoints.

pub mod capture;
pub mod config;
pub mod context;
pub mod error;
pub mod net;
pub mod pipeline;
pub mod settings;
pub mod types;
