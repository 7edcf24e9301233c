//! Application layer: the controller that owns the analyzer end to end,
//! and the activity log it narrates into.

pub mod controller;
pub mod log;

pub use controller::{Controller, ReadingView, StatusView};
pub use log::ActivityLog;
