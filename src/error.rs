use thiserror::Error;

use crate::bus::BusKind;

/// Top-level error for constructing and running simulators.
#[derive(Debug, Error)]
pub enum SimError {
    /// No factory is registered under the requested key. Fatal for the
    /// construction path that asked for it.
    #[error("unrecognized {kind} key: {key}")]
    UnknownPlugin { kind: &'static str, key: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model {0} is stopped and cannot be restarted")]
    Stopped(String),

    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no device at {target} on {kind} bus {bus}")]
    NoDevice { kind: BusKind, bus: String, target: String },

    #[error("{target} already in use on {kind} bus {bus}")]
    TargetInUse { kind: BusKind, bus: String, target: String },

    #[error("\"{0}\" is not a valid target for this bus")]
    InvalidTarget(String),

    #[error("length must be greater than zero")]
    ZeroLength,

    #[error("there are no bytes available to read")]
    NothingToRead,

    #[error("operation not supported on {0} bus")]
    Unsupported(BusKind),

    #[error("device is offline")]
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("truth source not connected")]
    NotConnected,

    #[error("no truth data received yet")]
    NoData,

    #[error("truth file {0} contains no data blocks")]
    EmptyRecording(String),

    #[error("truth source I/O failure: {0}")]
    Io(String),

    #[error("socket provider needs a running tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream table is full")]
    Full,

    #[error("stream {0} already exists")]
    Duplicate(String),

    #[error("stream {0} does not exist")]
    Unknown(String),

    #[error("stream {0} needs a period greater than zero")]
    InvalidPeriod(String),
}

/// Diagnostic recorded on a data point whose raw source could not be decoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("key {0} not found in truth data")]
    MissingKey(String),

    #[error("expected {expected} values for {key}, found {found}")]
    TooFewValues { key: String, expected: usize, found: usize },

    #[error("value \"{token}\" for {key} is not a number")]
    InvalidNumber { key: String, token: String },

    #[error("selector for field {0} does not fit in a key")]
    SelectorTooLong(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalError {
    #[error("invalid hex character '{character}' at position {position}")]
    InvalidHex { character: char, position: usize },

    #[error("\"{0}\" is not a valid length")]
    InvalidLength(String),

    #[error("unknown bus type \"{0}\" (expected I2C, SPI, UART or COMMAND)")]
    UnknownBusType(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}
