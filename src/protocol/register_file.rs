use serde::{Deserialize, Serialize};
use tracing::debug;

pub const REGISTER_COUNT: usize = 256;

/// How the first byte of a write selects a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressStyle {
    /// I2C style: the first byte is the register pointer, any following
    /// bytes are written from there on.
    Pointer,
    /// SPI style: bit 7 of the first byte is the write flag, the low seven
    /// bits the register.
    WriteBit,
}

pub const SPI_WRITE_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Undefined,
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterStats {
    pub writes: u32,
    pub reads: u32,
    pub ignored_writes: u32,
    pub undefined_accesses: u32,
}

/// Byte-wide register bank behind an I2C or SPI device.
///
/// Master writes honour the access map; device-side `load` never does.
/// Undefined registers read as zero and swallow writes.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    values: [u8; REGISTER_COUNT],
    access: [Access; REGISTER_COUNT],
    pointer: u8,
    stats: RegisterStats,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            values: [0; REGISTER_COUNT],
            access: [Access::Undefined; REGISTER_COUNT],
            pointer: 0,
            stats: RegisterStats::default(),
        }
    }

    pub fn define(&mut self, register: u8, access: Access, initial: u8) {
        self.access[usize::from(register)] = access;
        self.values[usize::from(register)] = initial;
    }

    pub fn access(&self, register: u8) -> Access {
        self.access[usize::from(register)]
    }

    pub fn get(&self, register: u8) -> u8 {
        self.values[usize::from(register)]
    }

    /// Device-side update of consecutive registers starting at `register`.
    pub fn load(&mut self, register: u8, bytes: &[u8]) {
        for (offset, byte) in bytes.iter().enumerate() {
            let index = (usize::from(register) + offset) % REGISTER_COUNT;
            self.values[index] = *byte;
        }
    }

    pub fn pointer(&self) -> u8 {
        self.pointer
    }

    pub fn select(&mut self, register: u8) {
        if self.access(register) == Access::Undefined {
            debug!("register {:#04x} is not defined, reads will return zero", register);
            self.stats.undefined_accesses += 1;
        }
        self.pointer = register;
    }

    /// Master write of consecutive registers, auto-incrementing.
    pub fn write_at(&mut self, register: u8, data: &[u8]) {
        let mut current = register;
        for &byte in data {
            match self.access(current) {
                Access::ReadWrite => {
                    self.values[usize::from(current)] = byte;
                    self.stats.writes += 1;
                }
                Access::ReadOnly => {
                    debug!("write of {:#04x} to read-only register {:#04x} ignored", byte, current);
                    self.stats.ignored_writes += 1;
                }
                Access::Undefined => {
                    debug!("write of {:#04x} to undefined register {:#04x} ignored", byte, current);
                    self.stats.ignored_writes += 1;
                    self.stats.undefined_accesses += 1;
                }
            }
            current = current.wrapping_add(1);
        }
    }

    /// Fill `buf` from the pointer onwards, auto-incrementing.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        for slot in buf.iter_mut() {
            *slot = match self.access(self.pointer) {
                Access::Undefined => 0,
                _ => self.values[usize::from(self.pointer)],
            };
            self.pointer = self.pointer.wrapping_add(1);
            self.stats.reads += 1;
        }
        buf.len()
    }

    /// Apply a master write framed in the given style.
    pub fn handle_write(&mut self, style: AddressStyle, data: &[u8]) {
        let Some((&first, rest)) = data.split_first() else {
            return;
        };
        match style {
            AddressStyle::Pointer => {
                self.select(first);
                self.write_at(first, rest);
            }
            AddressStyle::WriteBit => {
                let register = first & !SPI_WRITE_BIT;
                self.select(register);
                if first & SPI_WRITE_BIT != 0 {
                    self.write_at(register, rest);
                }
            }
        }
    }

    pub fn get_stats(&self) -> &RegisterStats {
        &self.stats
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}
