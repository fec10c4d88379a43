//! Device-side wire protocols: register files for addressed buses and the
//! framed command protocol used on UART.

pub mod framing;
pub mod register_file;

pub use framing::{
    decode_data_frame, encode_command, encode_data_frame, encode_hk_frame, scale_to_u16, CommandFrame, DataFrame,
    FrameAssembler, FramerStats, Opcode, COMMAND_FRAME_LEN, HK_FRAME_LEN,
};
pub use register_file::{Access, AddressStyle, RegisterFile, RegisterStats, SPI_WRITE_BIT};
