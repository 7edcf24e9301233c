//! Domain model: parameters, task kinds, persisted records, configuration.

pub mod config;
pub mod param;
pub mod reading;
pub mod task;

pub use config::{Config, RenderedConfig, DEFAULT_CONFIG_ID, DEFAULT_I2C_ADDR};
pub use param::{Parameter, TaskKind};
pub use reading::Reading;
pub use task::Task;
