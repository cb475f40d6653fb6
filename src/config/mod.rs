//! # Configuration
//!
//! Process-wide settings read once at startup.

mod controller;

pub use controller::ControllerConfig;
