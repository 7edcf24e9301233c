//! Bus port: ordered byte-level transport to a single device.
//!
//! The analyzer sits alone on a single-master bus, so the protocol is just
//! "write 1 or 5 bytes, optionally read 1 or 4 back". Hardware specifics
//! live behind this trait; the Linux adapter is provided by the daemon.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
#[error("bus i/o: {0}")]
pub struct BusError(pub String);

impl BusError {
    pub fn new(err: impl fmt::Display) -> Self {
        BusError(err.to_string())
    }
}

pub trait Bus: Send {
    fn write_bytes(&mut self, addr: u8, data: &[u8]) -> Result<(), BusError>;

    fn read_bytes(&mut self, addr: u8, n: usize) -> Result<Vec<u8>, BusError>;
}

/// The single gate in front of the bus.
///
/// Every code path — the queue worker, live status reads, the boundary-path
/// calibration write — goes through `transaction`, and the mutex is held for
/// exactly one logical transaction (a write plus its optional read). The
/// worker's 500 ms poll sleeps happen outside the lock.
#[derive(Clone)]
pub struct SharedBus {
    inner: Arc<Mutex<Box<dyn Bus>>>,
}

impl SharedBus {
    pub fn new(bus: impl Bus + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(bus))),
        }
    }

    pub async fn transaction<R>(
        &self,
        op: impl FnOnce(&mut dyn Bus) -> Result<R, BusError>,
    ) -> Result<R, BusError> {
        let mut bus = self.inner.lock().await;
        op(bus.as_mut())
    }
}
