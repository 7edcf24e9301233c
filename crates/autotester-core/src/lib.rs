//! autotester-core
//!
//! Control core for a wet-chemistry reef analyzer driven over a single-master
//! I²C bus. Every physical interaction with the device is serialized into a
//! persistent task queue drained by one worker; calendar recurrence rules
//! enqueue periodic tests; reagent and waste accounting gates what may be
//! enqueued at all.
//!
//! Module layout:
//! - domain: parameters, task kinds, persisted records, configuration
//! - ports: the external seams (bucketed store, byte bus, clock)
//! - store: redb-backed and in-memory store implementations
//! - queue: persistent FIFO with a single cancellable worker
//! - schedule: recurrence engine and the per-parameter scheduler supervisor
//! - device: the byte protocol spoken over the bus
//! - app: the controller tying it all together, plus the activity log

pub mod app;
pub mod device;
pub mod domain;
pub mod error;
pub mod ports;
pub mod queue;
pub mod schedule;
pub mod store;

pub use error::Error;
