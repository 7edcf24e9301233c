//! Stand-in device for `--dev` runs.
//!
//! Accepts the full opcode map, stays busy for a couple of polls after a
//! start opcode, then goes idle and serves a plausible reading. Calibration
//! value writes are stored and echoed back as the factor, so the whole
//! protocol path can be exercised without hardware.

use crate::ports::bus::{Bus, BusError};

const DEFAULT_BUSY_POLLS: u32 = 2;

pub struct SimulatedBus {
    busy_polls: u32,
    busy_left: u32,
    pending_read: u8,
    factor: f32,
    counter: u32,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            busy_polls: DEFAULT_BUSY_POLLS,
            busy_left: 0,
            pending_read: 0,
            factor: 1.0,
            counter: 0,
        }
    }

    /// A device that never returns to idle; used to exercise the poll
    /// ceiling.
    pub fn stuck_busy() -> Self {
        Self {
            busy_polls: u32::MAX,
            busy_left: u32::MAX,
            ..Self::new()
        }
    }

    fn next_value(&mut self) -> f32 {
        // deterministic but varied; the UI plots these in dev runs
        self.counter = self.counter.wrapping_add(1);
        400.0 + (self.counter % 100) as f32 * 0.25
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimulatedBus {
    fn write_bytes(&mut self, _addr: u8, data: &[u8]) -> Result<(), BusError> {
        let Some(&opcode) = data.first() else {
            return Err(BusError::new("empty write"));
        };
        match opcode {
            // start opcodes: tests, calibrations, flushes
            0x11..=0x2B => {
                self.busy_left = self.busy_polls;
                if data.len() == 5 {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(&data[1..]);
                    self.factor = f32::from_le_bytes(bytes);
                }
                self.pending_read = 0;
                Ok(())
            }
            // read opcodes select what the next read returns
            0x31..=0x3A => {
                self.pending_read = opcode;
                Ok(())
            }
            _ => Err(BusError::new(format!("unknown opcode {opcode:#04x}"))),
        }
    }

    fn read_bytes(&mut self, _addr: u8, n: usize) -> Result<Vec<u8>, BusError> {
        match self.pending_read {
            super::OP_READ_STATUS => {
                let status = if self.busy_left > 0 {
                    self.busy_left = self.busy_left.saturating_sub(1);
                    1u8
                } else {
                    0u8
                };
                Ok(vec![status; n.min(1)])
            }
            super::OP_READ_RESULT => {
                let value = self.next_value();
                Ok(value.to_le_bytes()[..n.min(4)].to_vec())
            }
            0x35..=0x3A => Ok(self.factor.to_le_bytes()[..n.min(4)].to_vec()),
            other => Err(BusError::new(format!(
                "read with no pending read opcode ({other:#04x})"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_a_full_test_sequence() {
        let mut bus = SimulatedBus::new();
        bus.write_bytes(0x10, &[0x11]).unwrap();

        // busy for a couple of polls, then idle
        let mut polls = 0;
        loop {
            bus.write_bytes(0x10, &[super::super::OP_READ_STATUS]).unwrap();
            let status = bus.read_bytes(0x10, 1).unwrap();
            polls += 1;
            if status[0] == 0 {
                break;
            }
            assert!(polls < 10, "simulated device never went idle");
        }

        bus.write_bytes(0x10, &[super::super::OP_READ_RESULT]).unwrap();
        let data = bus.read_bytes(0x10, 4).unwrap();
        let value = f32::from_le_bytes(data.try_into().unwrap());
        assert!((400.0..=425.0).contains(&value));
    }

    #[test]
    fn calibration_value_round_trips_as_the_factor() {
        let mut bus = SimulatedBus::new();
        let mut frame = vec![0x22];
        frame.extend_from_slice(&1.5f32.to_le_bytes());
        bus.write_bytes(0x10, &frame).unwrap();

        // drain the busy polls
        loop {
            bus.write_bytes(0x10, &[super::super::OP_READ_STATUS]).unwrap();
            if bus.read_bytes(0x10, 1).unwrap()[0] == 0 {
                break;
            }
        }

        bus.write_bytes(0x10, &[0x36]).unwrap();
        let data = bus.read_bytes(0x10, 4).unwrap();
        assert_eq!(f32::from_le_bytes(data.try_into().unwrap()), 1.5);
    }
}
