//! Linux adapter for the bus port, over `/dev/i2c-*`.

use std::path::Path;

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use autotester_core::domain::DEFAULT_I2C_ADDR;
use autotester_core::ports::bus::{Bus, BusError};

pub struct LinuxBus {
    dev: LinuxI2CDevice,
    addr: u8,
}

impl LinuxBus {
    pub fn open(path: &Path) -> Result<Self, BusError> {
        let dev = LinuxI2CDevice::new(path, u16::from(DEFAULT_I2C_ADDR)).map_err(BusError::new)?;
        Ok(Self {
            dev,
            addr: DEFAULT_I2C_ADDR,
        })
    }

    /// Re-point the kernel handle when the configured address changes.
    fn select(&mut self, addr: u8) -> Result<(), BusError> {
        if addr != self.addr {
            self.dev
                .set_slave_address(u16::from(addr))
                .map_err(BusError::new)?;
            self.addr = addr;
        }
        Ok(())
    }
}

impl Bus for LinuxBus {
    fn write_bytes(&mut self, addr: u8, data: &[u8]) -> Result<(), BusError> {
        self.select(addr)?;
        self.dev.write(data).map_err(BusError::new)
    }

    fn read_bytes(&mut self, addr: u8, n: usize) -> Result<Vec<u8>, BusError> {
        self.select(addr)?;
        let mut buf = vec![0u8; n];
        self.dev.read(&mut buf).map_err(BusError::new)?;
        Ok(buf)
    }
}
