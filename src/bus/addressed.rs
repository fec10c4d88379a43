use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{lock, BusConnection, BusDevice, BusKind};
use crate::error::BusError;

/// A shared I2C or SPI bus. Devices are selected by a one-byte address (I2C)
/// or chip select (SPI) and answer synchronously.
pub struct AddressedBus {
    kind: BusKind,
    name: String,
    devices: Mutex<HashMap<u8, Arc<dyn BusDevice>>>,
    // Held for the whole of a transfer so transact halves stay together.
    transfer: Mutex<()>,
}

impl AddressedBus {
    pub fn new(kind: BusKind, name: &str) -> Self {
        debug_assert!(matches!(kind, BusKind::I2c | BusKind::Spi), "{kind} is not an addressed bus");
        Self {
            kind,
            name: name.to_string(),
            devices: Mutex::new(HashMap::new()),
            transfer: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attach(&self, target: u8, device: Arc<dyn BusDevice>) -> Result<(), BusError> {
        let mut devices = lock(&self.devices);
        if devices.contains_key(&target) {
            return Err(BusError::TargetInUse {
                kind: self.kind,
                bus: self.name.clone(),
                target: format!("{target:#04x}"),
            });
        }
        devices.insert(target, device);
        debug!("{} bus {}: attached device at {:#04x}", self.kind, self.name, target);
        Ok(())
    }

    pub fn detach(&self, target: u8) -> bool {
        lock(&self.devices).remove(&target).is_some()
    }

    pub fn attached(&self) -> Vec<u8> {
        let mut targets: Vec<u8> = lock(&self.devices).keys().copied().collect();
        targets.sort_unstable();
        targets
    }

    fn device(&self, target: u8) -> Result<Arc<dyn BusDevice>, BusError> {
        lock(&self.devices).get(&target).cloned().ok_or_else(|| BusError::NoDevice {
            kind: self.kind,
            bus: self.name.clone(),
            target: format!("{target:#04x}"),
        })
    }

    pub fn write(&self, target: u8, data: &[u8]) -> Result<usize, BusError> {
        let device = self.device(target)?;
        let _transfer = lock(&self.transfer);
        debug!("{} {}@{:#04x} <- {}", self.kind, self.name, target, hex::encode(data));
        device.bus_write(data)?;
        Ok(data.len())
    }

    pub fn read(&self, target: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        if buf.is_empty() {
            return Err(BusError::ZeroLength);
        }
        let device = self.device(target)?;
        let _transfer = lock(&self.transfer);
        let count = device.bus_read(buf)?;
        debug!("{} {}@{:#04x} -> {}", self.kind, self.name, target, hex::encode(&buf[..count]));
        Ok(count)
    }

    pub fn transact(&self, target: u8, wbuf: &[u8], rbuf: &mut [u8]) -> Result<usize, BusError> {
        if rbuf.is_empty() {
            return Err(BusError::ZeroLength);
        }
        let device = self.device(target)?;
        let _transfer = lock(&self.transfer);
        debug!("{} {}@{:#04x} <- {}", self.kind, self.name, target, hex::encode(wbuf));
        device.bus_write(wbuf)?;
        let count = device.bus_read(rbuf)?;
        debug!("{} {}@{:#04x} -> {}", self.kind, self.name, target, hex::encode(&rbuf[..count]));
        Ok(count)
    }
}

/// Master connection bound to one address on an [`AddressedBus`].
pub struct AddressedMaster {
    bus: Arc<AddressedBus>,
    target: u8,
}

impl AddressedMaster {
    pub fn new(bus: Arc<AddressedBus>, target: u8) -> Self {
        Self { bus, target }
    }
}

impl BusConnection for AddressedMaster {
    fn kind(&self) -> BusKind {
        self.bus.kind()
    }

    fn describe(&self) -> String {
        format!("{:#04x}@{}", self.target, self.bus.name())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, BusError> {
        self.bus.write(self.target, data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        self.bus.read(self.target, buf)
    }

    fn transact(&mut self, wbuf: &[u8], rbuf: &mut [u8]) -> Result<usize, BusError> {
        self.bus.transact(self.target, wbuf, rbuf)
    }
}
