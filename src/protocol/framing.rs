//! UART frame layout shared by the streaming devices.
//!
//! Every frame is `DE AD | payload | BE EF`. Commands carry a one-byte opcode
//! and a big-endian u32 parameter; data frames carry a sequence number and
//! one big-endian u16 per field; housekeeping frames carry three u32 words.

use heapless::Vec;
use static_assertions::const_assert_eq;
use tracing::debug;

use crate::data_point::MAX_FIELDS;

pub const HEADER: [u8; 2] = [0xDE, 0xAD];
pub const TRAILER: [u8; 2] = [0xBE, 0xEF];

pub const COMMAND_FRAME_LEN: usize = 9;
pub const HK_FRAME_LEN: usize = 16;
pub const MAX_DATA_FRAME_LEN: usize = HEADER.len() + 4 + MAX_FIELDS * 2 + TRAILER.len();

const_assert_eq!(COMMAND_FRAME_LEN, HEADER.len() + 1 + 4 + TRAILER.len());
const_assert_eq!(HK_FRAME_LEN, HEADER.len() + 3 * 4 + TRAILER.len());
const_assert_eq!(MAX_DATA_FRAME_LEN, 40);

pub type DataFrame = Vec<u8, MAX_DATA_FRAME_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Noop,
    Housekeeping,
    Data,
    Config,
    StreamPeriod,
    Unknown(u8),
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value {
            0 => Opcode::Noop,
            1 => Opcode::Housekeeping,
            2 => Opcode::Data,
            3 => Opcode::Config,
            4 => Opcode::StreamPeriod,
            other => Opcode::Unknown(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        match op {
            Opcode::Noop => 0,
            Opcode::Housekeeping => 1,
            Opcode::Data => 2,
            Opcode::Config => 3,
            Opcode::StreamPeriod => 4,
            Opcode::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: Opcode,
    pub param: u32,
    pub raw: [u8; COMMAND_FRAME_LEN],
}

pub fn encode_command(opcode: Opcode, param: u32) -> [u8; COMMAND_FRAME_LEN] {
    let mut frame = [0u8; COMMAND_FRAME_LEN];
    frame[..2].copy_from_slice(&HEADER);
    frame[2] = opcode.into();
    frame[3..7].copy_from_slice(&param.to_be_bytes());
    frame[7..].copy_from_slice(&TRAILER);
    frame
}

/// Map `value` in `[-full_scale, full_scale]` onto `1..=65535`, clamping
/// anything outside.
pub fn scale_to_u16(value: f64, full_scale: f64) -> u16 {
    let unit = if full_scale > 0.0 { (value / full_scale).clamp(-1.0, 1.0) } else { 0.0 };
    (unit * 32767.0 + 32768.0) as u16
}

pub fn encode_data_frame(sequence: u32, fields: &[u16]) -> DataFrame {
    debug_assert!(fields.len() <= MAX_FIELDS, "{} fields exceed frame capacity", fields.len());
    let mut frame = DataFrame::new();
    let _ = frame.extend_from_slice(&HEADER);
    let _ = frame.extend_from_slice(&sequence.to_be_bytes());
    for field in fields.iter().take(MAX_FIELDS) {
        let _ = frame.extend_from_slice(&field.to_be_bytes());
    }
    let _ = frame.extend_from_slice(&TRAILER);
    frame
}

/// Split a data frame back into its sequence number and fields.
pub fn decode_data_frame(frame: &[u8]) -> Option<(u32, std::vec::Vec<u16>)> {
    if frame.len() < HEADER.len() + 4 + TRAILER.len() || (frame.len() - 8) % 2 != 0 {
        return None;
    }
    if frame[..2] != HEADER || frame[frame.len() - 2..] != TRAILER {
        return None;
    }
    let sequence = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]);
    let fields = frame[6..frame.len() - 2]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    Some((sequence, fields))
}

pub fn encode_hk_frame(count: u32, config: u32, status: u32) -> [u8; HK_FRAME_LEN] {
    let mut frame = [0u8; HK_FRAME_LEN];
    frame[..2].copy_from_slice(&HEADER);
    frame[2..6].copy_from_slice(&count.to_be_bytes());
    frame[6..10].copy_from_slice(&config.to_be_bytes());
    frame[10..14].copy_from_slice(&status.to_be_bytes());
    frame[14..].copy_from_slice(&TRAILER);
    frame
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub frames: u32,
    pub discarded_bytes: u32,
    pub bad_trailers: u32,
}

/// Reassembles command frames from a byte stream that may split or run
/// frames together arbitrarily.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8, COMMAND_FRAME_LEN>,
    stats: FramerStats,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> std::vec::Vec<CommandFrame> {
        let mut frames = std::vec::Vec::new();
        for &byte in bytes {
            if let Some(frame) = self.push_byte(byte) {
                frames.push(frame);
            }
        }
        frames
    }

    fn push_byte(&mut self, byte: u8) -> Option<CommandFrame> {
        match self.buf.len() {
            0 if byte != HEADER[0] => {
                self.stats.discarded_bytes += 1;
                return None;
            }
            1 if byte != HEADER[1] => {
                self.stats.discarded_bytes += 1;
                self.buf.clear();
                if byte == HEADER[0] {
                    let _ = self.buf.push(byte);
                } else {
                    self.stats.discarded_bytes += 1;
                }
                return None;
            }
            _ => {}
        }

        let _ = self.buf.push(byte);
        if !self.buf.is_full() {
            return None;
        }

        let mut raw = [0u8; COMMAND_FRAME_LEN];
        raw.copy_from_slice(&self.buf);
        self.buf.clear();
        if raw[7..] != TRAILER {
            debug!("command frame {} has a bad trailer, dropped", hex::encode(raw));
            self.stats.bad_trailers += 1;
            return None;
        }
        self.stats.frames += 1;
        Some(CommandFrame {
            opcode: Opcode::from(raw[2]),
            param: u32::from_be_bytes([raw[3], raw[4], raw[5], raw[6]]),
            raw,
        })
    }

    /// Bytes of a partial frame currently held.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn get_stats(&self) -> &FramerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_layout() {
        let frame = encode_command(Opcode::Config, 0x0102_0304);
        assert_eq!(frame, [0xDE, 0xAD, 3, 1, 2, 3, 4, 0xBE, 0xEF]);
    }

    #[test]
    fn test_split_frame_reassembled() {
        let frame = encode_command(Opcode::Housekeeping, 0);
        let mut framer = FrameAssembler::new();
        assert!(framer.push(&frame[..4]).is_empty());
        assert_eq!(framer.pending(), 4);
        let frames = framer.push(&frame[4..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, Opcode::Housekeeping);
    }

    #[test]
    fn test_resync_after_noise() {
        let mut stream = vec![0x00, 0xDE, 0x11, 0xDE];
        stream.extend_from_slice(&encode_command(Opcode::Data, 0)[1..]);
        stream.extend_from_slice(&encode_command(Opcode::StreamPeriod, 250));
        let mut framer = FrameAssembler::new();
        let frames = framer.push(&stream);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode, Opcode::Data);
        assert_eq!(frames[1].param, 250);
        assert_eq!(framer.get_stats().discarded_bytes, 3);
    }

    #[test]
    fn test_bad_trailer_dropped() {
        let mut frame = encode_command(Opcode::Noop, 0);
        frame[8] = 0x00;
        let mut framer = FrameAssembler::new();
        assert!(framer.push(&frame).is_empty());
        assert_eq!(framer.get_stats().bad_trailers, 1);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_unknown_opcode_still_framed() {
        let mut framer = FrameAssembler::new();
        let frames = framer.push(&encode_command(Opcode::Unknown(0x7f), 9));
        assert_eq!(frames[0].opcode, Opcode::Unknown(0x7f));
        assert_eq!(u8::from(frames[0].opcode), 0x7f);
    }

    #[test]
    fn test_data_frame_scaling() {
        assert_eq!(scale_to_u16(0.0, 1.0), 32768);
        assert_eq!(scale_to_u16(1.0, 1.0), 65535);
        assert_eq!(scale_to_u16(-1.0, 1.0), 1);
        assert_eq!(scale_to_u16(5.0, 1.0), 65535);
        assert_eq!(scale_to_u16(0.5e-4, 1.0e-4), 49151);

        let frame = encode_data_frame(7, &[1, 0x8000, 0xFFFF]);
        assert_eq!(frame.len(), 14);
        assert_eq!(&frame[..6], &[0xDE, 0xAD, 0, 0, 0, 7]);
        assert_eq!(decode_data_frame(&frame), Some((7, vec![1, 0x8000, 0xFFFF])));
    }

    #[test]
    fn test_hk_frame_layout() {
        let frame = encode_hk_frame(5, 0x0A0B_0C0D, 1);
        assert_eq!(&frame[2..6], &[0, 0, 0, 5]);
        assert_eq!(&frame[6..10], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&frame[14..], &TRAILER);
    }
}
