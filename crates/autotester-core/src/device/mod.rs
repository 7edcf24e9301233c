//! The byte protocol spoken over the bus.
//!
//! Every transaction is a 1- or 5-byte write, optionally followed by a 1- or
//! 4-byte read. Multi-byte payloads are little-endian; float values are
//! IEEE-754 binary32. Opcodes live on [`crate::domain::TaskKind`]; this
//! module owns the read opcodes, the status poll loop, and the codec.

mod sim;

pub use sim::SimulatedBus;

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::ports::bus::{BusError, SharedBus};

/// Opcode that asks for the one-byte device status.
pub const OP_READ_STATUS: u8 = 0x31;

/// Opcode that asks for the float32 result of a completed test.
pub const OP_READ_RESULT: u8 = 0x32;

/// Decoded status byte. Anything the firmware has not defined yet is
/// treated as busy and polled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Busy,
    Error,
}

impl Status {
    pub fn from_byte(byte: u8) -> Status {
        match byte {
            0 => Status::Idle,
            2 => Status::Error,
            _ => Status::Busy,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Device reported error")]
    Reported,

    #[error("Timed out waiting for device idle")]
    Timeout,

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
}

/// Poll and settle intervals. Tests shrink these to run in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Wait after a calibration reaches idle before the factor is readable.
    pub settle: Duration,
    /// Ceiling on a whole poll loop; the device is expected to return to
    /// idle well within this.
    pub poll_ceiling: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            settle: Duration::from_millis(100),
            poll_ceiling: Duration::from_secs(300),
        }
    }
}

/// One analyzer behind the shared bus.
///
/// Each method is a single logical transaction and holds the bus mutex for
/// exactly that long; `poll_idle` sleeps between transactions with the bus
/// released.
#[derive(Clone)]
pub struct Analyzer {
    bus: SharedBus,
    addr: u8,
    timing: Timing,
}

impl Analyzer {
    pub fn new(bus: SharedBus, addr: u8) -> Self {
        Self::with_timing(bus, addr, Timing::default())
    }

    pub fn with_timing(bus: SharedBus, addr: u8, timing: Timing) -> Self {
        Self { bus, addr, timing }
    }

    pub fn settle(&self) -> Duration {
        self.timing.settle
    }

    /// Send a bare opcode.
    pub async fn start(&self, opcode: u8) -> Result<(), DeviceError> {
        let addr = self.addr;
        self.bus
            .transaction(move |bus| bus.write_bytes(addr, &[opcode]))
            .await
            .map_err(Into::into)
    }

    /// Read the raw status byte.
    pub async fn status(&self) -> Result<u8, DeviceError> {
        let addr = self.addr;
        let data = self
            .bus
            .transaction(move |bus| {
                bus.write_bytes(addr, &[OP_READ_STATUS])?;
                bus.read_bytes(addr, 1)
            })
            .await?;
        data.first().copied().ok_or(DeviceError::ShortRead {
            expected: 1,
            got: 0,
        })
    }

    /// Poll every `poll_interval` until the device is idle again.
    ///
    /// Status 2 is a terminal failure for the task in flight, and a loop
    /// that outlives `poll_ceiling` aborts with a timeout.
    pub async fn poll_idle(&self) -> Result<(), DeviceError> {
        let started = Instant::now();
        loop {
            tokio::time::sleep(self.timing.poll_interval).await;
            match Status::from_byte(self.status().await?) {
                Status::Idle => return Ok(()),
                Status::Error => return Err(DeviceError::Reported),
                Status::Busy => {}
            }
            if started.elapsed() > self.timing.poll_ceiling {
                return Err(DeviceError::Timeout);
            }
        }
    }

    /// Read the measurement left behind by a completed test.
    pub async fn read_result(&self) -> Result<f32, DeviceError> {
        self.read_f32(OP_READ_RESULT).await
    }

    /// Read a calibration factor.
    pub async fn read_factor(&self, opcode: u8) -> Result<f32, DeviceError> {
        self.read_f32(opcode).await
    }

    /// Write `opcode ∥ float32(value)` as one 5-byte transaction.
    pub async fn send_value(&self, opcode: u8, value: f32) -> Result<(), DeviceError> {
        let addr = self.addr;
        let mut frame = [0u8; 5];
        frame[0] = opcode;
        frame[1..].copy_from_slice(&value.to_le_bytes());
        self.bus
            .transaction(move |bus| bus.write_bytes(addr, &frame))
            .await
            .map_err(Into::into)
    }

    async fn read_f32(&self, opcode: u8) -> Result<f32, DeviceError> {
        let addr = self.addr;
        let data = self
            .bus
            .transaction(move |bus| {
                bus.write_bytes(addr, &[opcode])?;
                bus.read_bytes(addr, 4)
            })
            .await?;
        let bytes: [u8; 4] = data.as_slice().try_into().map_err(|_| DeviceError::ShortRead {
            expected: 4,
            got: data.len(),
        })?;
        Ok(f32::from_le_bytes(bytes))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockBus, MockStep};
    use super::*;

    fn fast_timing() -> Timing {
        Timing {
            poll_interval: Duration::from_millis(1),
            settle: Duration::from_millis(1),
            poll_ceiling: Duration::from_millis(50),
        }
    }

    fn analyzer(script: Vec<MockStep>) -> (Analyzer, mock::WriteLog) {
        let (bus, log) = MockBus::new(script);
        (
            Analyzer::with_timing(SharedBus::new(bus), 0x10, fast_timing()),
            log,
        )
    }

    #[test]
    fn status_bytes_decode() {
        assert_eq!(Status::from_byte(0), Status::Idle);
        assert_eq!(Status::from_byte(1), Status::Busy);
        assert_eq!(Status::from_byte(2), Status::Error);
        // undefined values poll through as busy
        assert_eq!(Status::from_byte(7), Status::Busy);
    }

    #[tokio::test]
    async fn poll_idle_waits_out_busy() {
        let (analyzer, _log) = analyzer(vec![
            MockStep::ExpectWrite(vec![OP_READ_STATUS]),
            MockStep::Read(vec![1]),
            MockStep::ExpectWrite(vec![OP_READ_STATUS]),
            MockStep::Read(vec![1]),
            MockStep::ExpectWrite(vec![OP_READ_STATUS]),
            MockStep::Read(vec![0]),
        ]);
        analyzer.poll_idle().await.unwrap();
    }

    #[tokio::test]
    async fn poll_idle_aborts_on_reported_error() {
        let (analyzer, _log) = analyzer(vec![
            MockStep::ExpectWrite(vec![OP_READ_STATUS]),
            MockStep::Read(vec![2]),
        ]);
        assert!(matches!(
            analyzer.poll_idle().await,
            Err(DeviceError::Reported)
        ));
    }

    #[tokio::test]
    async fn result_decodes_little_endian_binary32() {
        let (analyzer, _log) = analyzer(vec![
            MockStep::ExpectWrite(vec![OP_READ_RESULT]),
            MockStep::Read(vec![0x00, 0x00, 0xD2, 0x43]),
        ]);
        assert_eq!(analyzer.read_result().await.unwrap(), 420.0);
    }

    #[tokio::test]
    async fn read_failure_surfaces_as_a_bus_error() {
        let (analyzer, _log) = analyzer(vec![
            MockStep::ExpectWrite(vec![OP_READ_RESULT]),
            MockStep::Fail("nak"),
        ]);
        assert!(matches!(
            analyzer.read_result().await,
            Err(DeviceError::Bus(_))
        ));
    }

    #[tokio::test]
    async fn send_value_is_a_single_five_byte_frame() {
        let (analyzer, log) = analyzer(vec![MockStep::ExpectWrite(vec![
            0x22, 0x00, 0x00, 0xD2, 0x43,
        ])]);
        analyzer.send_value(0x22, 420.0).await.unwrap();
        assert_eq!(log.snapshot(), vec![vec![0x22, 0x00, 0x00, 0xD2, 0x43]]);
    }

    #[tokio::test]
    async fn poll_idle_times_out_against_a_stuck_device() {
        let analyzer = Analyzer::with_timing(
            SharedBus::new(SimulatedBus::stuck_busy()),
            0x10,
            Timing {
                poll_interval: Duration::from_millis(1),
                settle: Duration::from_millis(1),
                poll_ceiling: Duration::from_millis(5),
            },
        );
        assert!(matches!(
            analyzer.poll_idle().await,
            Err(DeviceError::Timeout)
        ));
    }
}
