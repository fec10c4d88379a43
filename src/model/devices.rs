//! Declarative table of the simulated devices.
//!
//! Everything that differs between devices lives here. The behaviour itself
//! is the shared pipeline in [`super::sensor`].

use crate::protocol::{Access, AddressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Data frame built from the current truth point.
    Data,
    /// Housekeeping frame: command count, configuration word, status word.
    Housekeeping,
}

#[derive(Debug)]
pub struct StreamSpec {
    pub name: &'static str,
    pub kind: StreamKind,
}

/// Register map of one addressed-bus interface.
#[derive(Debug)]
pub struct RegisterProfile {
    pub style: AddressStyle,
    pub registers: &'static [(u8, Access, u8)],
    /// First of `2 * field_count` read-only registers holding the current
    /// point as big-endian u16 values, refreshed on every read.
    pub live_data_base: Option<u8>,
}

#[derive(Debug)]
pub struct DeviceDescriptor {
    pub model_type: &'static str,
    pub truth_field: &'static str,
    pub field_count: usize,
    /// Engineering value that maps to the top of the u16 range.
    pub full_scale: f64,
    pub default_provider: &'static str,
    pub uart: bool,
    pub i2c: Option<RegisterProfile>,
    pub spi: Option<RegisterProfile>,
    pub streams: &'static [StreamSpec],
    /// DISABLE silences the device until ENABLE.
    pub gated: bool,
}

impl DeviceDescriptor {
    /// Stream names match without regard to case. Models register streams
    /// under the table's spelling.
    pub fn stream(&self, name: &str) -> Option<&StreamSpec> {
        self.streams.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Stream reconfigured by the STREAM PERIOD opcode.
    pub fn primary_stream(&self) -> Option<&StreamSpec> {
        self.streams.iter().find(|s| s.kind == StreamKind::Data)
    }
}

pub static DEVICES: &[DeviceDescriptor] = &[
    DeviceDescriptor {
        model_type: "GENERIC_MAG",
        truth_field: "svb",
        field_count: 3,
        full_scale: 1.0,
        default_provider: "42SOCKET",
        uart: true,
        i2c: Some(RegisterProfile {
            style: AddressStyle::Pointer,
            registers: &[(0x00, Access::ReadOnly, 0x4D)],
            live_data_base: Some(0x01),
        }),
        spi: None,
        streams: &[StreamSpec { name: "MAG", kind: StreamKind::Data }],
        gated: false,
    },
    DeviceDescriptor {
        model_type: "SAMPLE",
        truth_field: "svb",
        field_count: 3,
        full_scale: 1.0,
        default_provider: "SYNTHETIC",
        uart: true,
        i2c: None,
        spi: None,
        streams: &[
            StreamSpec { name: "DATA", kind: StreamKind::Data },
            StreamSpec { name: "HK", kind: StreamKind::Housekeeping },
        ],
        gated: true,
    },
    DeviceDescriptor {
        model_type: "CAMERA",
        truth_field: "svb",
        field_count: 3,
        full_scale: 1.0,
        default_provider: "SYNTHETIC",
        uart: false,
        i2c: Some(RegisterProfile {
            style: AddressStyle::Pointer,
            registers: &[(0x0A, Access::ReadOnly, 0x56), (0x0B, Access::ReadOnly, 0x40)],
            live_data_base: None,
        }),
        spi: Some(RegisterProfile {
            style: AddressStyle::WriteBit,
            registers: &[
                (0x01, Access::ReadWrite, 0x00), // capture control
                (0x02, Access::ReadWrite, 0x00), // start capture
                (0x03, Access::ReadWrite, 0x00), // sensor timing
                (0x04, Access::ReadWrite, 0x00), // FIFO control
                (0x05, Access::ReadWrite, 0x00), // GPIO direction
                (0x06, Access::ReadWrite, 0x00), // GPIO write
                (0x40, Access::ReadOnly, 0x40),  // chip version
                (0x41, Access::ReadOnly, 0x08),  // capture done
            ],
            live_data_base: None,
        }),
        streams: &[],
        gated: false,
    },
];

pub fn lookup(model_type: &str) -> Option<&'static DeviceDescriptor> {
    DEVICES.iter().find(|d| d.model_type == model_type)
}
