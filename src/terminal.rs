//! Operator console for poking simulated devices by hand.
//!
//! The terminal is bound to one bus connection at a time. Lines are either
//! terminal commands (`HELP`, `SET ...`, `READ`, `TRANSACT`, `QUIT`) or a
//! payload written to the current target, entered as ASCII or hex depending
//! on the input mode.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::{BusConnection, BusHub, BusKind};
use crate::error::TerminalError;
use crate::hex::{decode_hex, format_hex};

const REPLY_BUFFER_LEN: usize = 4096;

const HELP: &str = "\
The prompt shows <terminal node@bus type:bus name>, the target node and the modes.
Commands:
  HELP                         - Displays this help
  QUIT                         - Exits the program
  SET SIMNODE <target>         - Target address, chip select, port or node name
  SET SIMBUS <bus>             - Bus the target lives on
  SET TERMNODE <name>          - Name shown for this terminal
  SET BUSTYPE <I2C|SPI|UART|COMMAND>
  SET <ASCII|HEX> [IN|OUT]     - Input and/or output mode
  READ <n>                     - Read n bytes from the target
  TRANSACT <n> <payload>       - Write payload, then read up to n bytes
  Anything else is sent to the target as a payload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ascii,
    Hex,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Ascii => "ASCII",
            Mode::Hex => "HEX",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutput {
    Continue(String),
    Quit,
}

pub struct Terminal {
    hub: Arc<BusHub>,
    in_mode: Mode,
    out_mode: Mode,
    bus_kind: BusKind,
    bus_name: String,
    target: String,
    node_name: String,
    connection: Option<Box<dyn BusConnection>>,
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim_start()),
        None => (text, ""),
    }
}

impl Terminal {
    /// ASCII in and out. Call [`Terminal::reset_bus_connection`] before use.
    pub fn new(hub: Arc<BusHub>, bus_kind: BusKind, bus_name: &str, target: &str) -> Self {
        Self {
            hub,
            in_mode: Mode::Ascii,
            out_mode: Mode::Ascii,
            bus_kind,
            bus_name: bus_name.to_string(),
            target: target.to_string(),
            node_name: "terminal".to_string(),
            connection: None,
        }
    }

    pub fn with_modes(mut self, in_mode: Mode, out_mode: Mode) -> Self {
        self.in_mode = in_mode;
        self.out_mode = out_mode;
        self
    }

    /// Replace the current connection with one to the configured bus type,
    /// bus and target. The old connection is closed first.
    ///
    /// # Errors
    ///
    /// The bus error if the target cannot be reached.
    pub fn reset_bus_connection(&mut self) -> Result<(), TerminalError> {
        self.connection = None;
        let connection = self.hub.connect(self.bus_kind, &self.bus_name, &self.target)?;
        debug!("terminal connected to {} {}", self.bus_kind, connection.describe());
        self.connection = Some(connection);
        Ok(())
    }

    pub fn in_mode(&self) -> Mode {
        self.in_mode
    }

    pub fn out_mode(&self) -> Mode {
        self.out_mode
    }

    pub fn bus_kind(&self) -> BusKind {
        self.bus_kind
    }

    pub fn prompt(&self) -> String {
        format!(
            "SimTerminal:<{}@{}:{}>:Node:<{}>:Mode:<IN={}:OUT={}> $ ",
            self.node_name, self.bus_kind, self.bus_name, self.target, self.in_mode, self.out_mode
        )
    }

    pub fn process_line(&mut self, line: &str) -> TerminalOutput {
        let line = line.trim();
        if line.is_empty() {
            return TerminalOutput::Continue(String::new());
        }
        let (word, rest) = split_word(line);
        let output = match word.to_ascii_uppercase().as_str() {
            "HELP" => HELP.to_string(),
            "QUIT" => return TerminalOutput::Quit,
            "SET" => self.set(rest),
            "READ" => {
                let result = self.read(rest);
                self.render(result)
            }
            "TRANSACT" => {
                let result = self.transact(rest);
                self.render(result)
            }
            _ => {
                let result = self.send(line);
                self.render(result)
            }
        };
        TerminalOutput::Continue(output)
    }

    /// Bytes that arrived on the connection since the last call, rendered in
    /// the output mode.
    pub fn poll_unsolicited(&mut self) -> Option<String> {
        let bytes = self.connection.as_mut()?.take_unsolicited();
        if bytes.is_empty() {
            None
        } else {
            Some(self.render_bytes(&bytes))
        }
    }

    fn set(&mut self, rest: &str) -> String {
        let (option, value) = split_word(rest);
        let option = option.to_ascii_uppercase();
        match option.as_str() {
            "SIMNODE" | "SIMBUS" | "TERMNODE" | "BUSTYPE" if value.is_empty() => {
                format!("Error: SET {option} needs a value")
            }
            "SIMNODE" => {
                self.target = value.to_string();
                self.reconnect()
            }
            "SIMBUS" => {
                self.bus_name = value.to_string();
                self.reconnect()
            }
            "TERMNODE" => {
                self.node_name = value.to_string();
                String::new()
            }
            "BUSTYPE" => match BusKind::parse(value) {
                Some(kind) => {
                    self.bus_kind = kind;
                    self.reconnect()
                }
                None => format!("Error: {}", TerminalError::UnknownBusType(value.to_string())),
            },
            "ASCII" | "HEX" => {
                let mode = if option == "HEX" { Mode::Hex } else { Mode::Ascii };
                match value.to_ascii_uppercase().as_str() {
                    "" => {
                        self.in_mode = mode;
                        self.out_mode = mode;
                    }
                    "IN" => self.in_mode = mode,
                    "OUT" => self.out_mode = mode,
                    other => return format!("Error: expected IN or OUT, got {other}"),
                }
                String::new()
            }
            _ => format!("Error: unknown SET option {option} (try HELP)"),
        }
    }

    fn reconnect(&mut self) -> String {
        match self.reset_bus_connection() {
            Ok(()) => String::new(),
            Err(e) => {
                warn!("terminal connection failed: {}", e);
                format!("Error: {e}")
            }
        }
    }

    fn connection(&mut self) -> Result<&mut Box<dyn BusConnection>, TerminalError> {
        if self.connection.is_none() {
            self.reset_bus_connection()?;
        }
        self.connection.as_mut().ok_or(TerminalError::Bus(crate::error::BusError::Offline))
    }

    fn payload(&self, text: &str) -> Result<Vec<u8>, TerminalError> {
        match self.in_mode {
            Mode::Hex => decode_hex(text),
            Mode::Ascii => Ok(text.as_bytes().to_vec()),
        }
    }

    fn parse_length(text: &str) -> Result<usize, TerminalError> {
        text.parse::<usize>().map_err(|_| TerminalError::InvalidLength(text.to_string()))
    }

    fn read(&mut self, rest: &str) -> Result<Vec<u8>, TerminalError> {
        let length = Self::parse_length(rest.trim())?;
        let mut buf = vec![0u8; length];
        let count = self.connection()?.read(&mut buf)?;
        buf.truncate(count);
        Ok(buf)
    }

    fn transact(&mut self, rest: &str) -> Result<Vec<u8>, TerminalError> {
        let (length, payload) = split_word(rest);
        let length = Self::parse_length(length)?;
        let wbuf = self.payload(payload)?;
        let mut rbuf = vec![0u8; length];
        let count = self.connection()?.transact(&wbuf, &mut rbuf)?;
        rbuf.truncate(count);
        Ok(rbuf)
    }

    /// Plain payload. The command bus answers every request, UART peers may
    /// answer while the write is handled; addressed buses stay silent.
    fn send(&mut self, text: &str) -> Result<Vec<u8>, TerminalError> {
        let wbuf = self.payload(text)?;
        let connection = self.connection()?;
        if connection.kind() == BusKind::Command {
            let mut rbuf = vec![0u8; REPLY_BUFFER_LEN];
            let count = connection.transact(&wbuf, &mut rbuf)?;
            rbuf.truncate(count);
            return Ok(rbuf);
        }
        connection.write(&wbuf)?;
        Ok(connection.take_unsolicited())
    }

    fn render(&self, result: Result<Vec<u8>, TerminalError>) -> String {
        match result {
            Ok(bytes) => self.render_bytes(&bytes),
            Err(e) => format!("Error: {e}"),
        }
    }

    fn render_bytes(&self, bytes: &[u8]) -> String {
        match self.out_mode {
            Mode::Hex => format_hex(bytes),
            Mode::Ascii => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}
