//! In-process bus emulation.
//!
//! Every transport exposes the same master-side triad through
//! [`BusConnection`] (`write`, `read`, `transact`). Devices sit on the slave
//! side: I2C and SPI devices implement [`BusDevice`] and answer synchronously,
//! UART devices receive bytes through a callback on their endpoint and may
//! answer at any time.

pub mod addressed;
pub mod command;
pub mod time;
pub mod uart;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::CommonConfig;
use crate::error::BusError;

pub use addressed::{AddressedBus, AddressedMaster};
pub use command::{CommandBus, CommandHandler, CommandMaster};
pub use time::{TickHandler, TimeBus, TimeDriver};
pub use uart::{UartBus, UartEndpoint, UartHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusKind {
    I2c,
    Spi,
    Uart,
    Command,
}

impl BusKind {
    pub const ALL: [BusKind; 4] = [BusKind::I2c, BusKind::Spi, BusKind::Uart, BusKind::Command];

    /// Case-insensitive lookup used by operator input.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "I2C" => Some(BusKind::I2c),
            "SPI" => Some(BusKind::Spi),
            "UART" | "USART" => Some(BusKind::Uart),
            "COMMAND" => Some(BusKind::Command),
            _ => None,
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BusKind::I2c => "I2C",
            BusKind::Spi => "SPI",
            BusKind::Uart => "UART",
            BusKind::Command => "COMMAND",
        };
        f.write_str(name)
    }
}

/// Master side of a bus, bound to one target.
pub trait BusConnection: Send {
    fn kind(&self) -> BusKind;

    /// Bus name and target, for prompts and logs.
    fn describe(&self) -> String;

    fn write(&mut self, data: &[u8]) -> Result<usize, BusError>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError>;

    /// Write immediately followed by read. No other master on the same bus
    /// observes the bus between the two halves.
    fn transact(&mut self, wbuf: &[u8], rbuf: &mut [u8]) -> Result<usize, BusError>;

    /// Bytes that arrived without being requested. Only asynchronous
    /// transports ever return anything here.
    fn take_unsolicited(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

/// Slave side of a synchronous addressed bus (I2C, SPI).
pub trait BusDevice: Send + Sync {
    fn bus_write(&self, data: &[u8]) -> Result<(), BusError>;

    fn bus_read(&self, buf: &mut [u8]) -> Result<usize, BusError>;
}

/// Recover the guard from a poisoned lock. A panicking callback must not take
/// the whole bus down with it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parse a numeric target such as `30`, `0x1e` or `0X1E`.
pub(crate) fn parse_numeric_target(target: &str) -> Result<u16, BusError> {
    let trimmed = target.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => trimmed.parse::<u16>(),
    };
    parsed.map_err(|_| BusError::InvalidTarget(target.to_string()))
}

/// Named buses of every transport, created on first use, plus the shared
/// simulation clock.
pub struct BusHub {
    i2c: Mutex<HashMap<String, Arc<AddressedBus>>>,
    spi: Mutex<HashMap<String, Arc<AddressedBus>>>,
    uart: Mutex<HashMap<String, Arc<UartBus>>>,
    command: Mutex<HashMap<String, Arc<CommandBus>>>,
    time: Arc<TimeBus>,
}

impl BusHub {
    pub fn new(common: CommonConfig) -> Self {
        Self {
            i2c: Mutex::new(HashMap::new()),
            spi: Mutex::new(HashMap::new()),
            uart: Mutex::new(HashMap::new()),
            command: Mutex::new(HashMap::new()),
            time: Arc::new(TimeBus::new(common)),
        }
    }

    pub fn i2c_bus(&self, name: &str) -> Arc<AddressedBus> {
        Arc::clone(
            lock(&self.i2c)
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AddressedBus::new(BusKind::I2c, name))),
        )
    }

    pub fn spi_bus(&self, name: &str) -> Arc<AddressedBus> {
        Arc::clone(
            lock(&self.spi)
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AddressedBus::new(BusKind::Spi, name))),
        )
    }

    pub fn uart_bus(&self, name: &str) -> Arc<UartBus> {
        Arc::clone(
            lock(&self.uart)
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(UartBus::new(name))),
        )
    }

    pub fn command_bus(&self, name: &str) -> Arc<CommandBus> {
        Arc::clone(
            lock(&self.command)
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CommandBus::new(name))),
        )
    }

    pub fn time(&self) -> Arc<TimeBus> {
        Arc::clone(&self.time)
    }

    /// Open a master connection to `target` on the named bus.
    ///
    /// I2C targets are addresses, SPI targets chip selects, UART targets port
    /// numbers and command targets node names.
    pub fn connect(&self, kind: BusKind, bus: &str, target: &str) -> Result<Box<dyn BusConnection>, BusError> {
        match kind {
            BusKind::I2c | BusKind::Spi => {
                let value = parse_numeric_target(target)?;
                let address = u8::try_from(value).map_err(|_| BusError::InvalidTarget(target.to_string()))?;
                let bus = if kind == BusKind::I2c { self.i2c_bus(bus) } else { self.spi_bus(bus) };
                Ok(Box::new(AddressedMaster::new(bus, address)))
            }
            BusKind::Uart => {
                let port = parse_numeric_target(target)?;
                Ok(Box::new(self.uart_bus(bus).open(port)))
            }
            BusKind::Command => {
                if target.trim().is_empty() {
                    return Err(BusError::InvalidTarget(target.to_string()));
                }
                Ok(Box::new(CommandMaster::new(self.command_bus(bus), target.trim())))
            }
        }
    }
}

impl Default for BusHub {
    fn default() -> Self {
        Self::new(CommonConfig::default())
    }
}
