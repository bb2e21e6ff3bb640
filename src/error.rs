use std::path::PathBuf;

use derive_more::From;
use thiserror::Error;

use crate::handlers::{
    FrameCodecError, ModeError, PackedDecimalError, PinCodeError, StatusDecodeError,
};
use crate::protocol::{EndpointId, endpoint_metadata};

/// Errors raised by the device transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no MA Touch controller matching `{prefix}*` was found within {timeout_ms}ms")]
    DeviceNotFound { prefix: String, timeout_ms: u64 },
    #[error("failed to connect to the controller: {reason}")]
    ConnectFailed { reason: String },
    #[error("the transport is not connected")]
    NotConnected,
    #[error(
        "required endpoint `{name}` ({uuid}) was not found on the connected device",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { endpoint: EndpointId },
    #[error("no reply within {timeout_ms}ms for request with sequence id {sequence_id}")]
    ReplyTimeout { sequence_id: u8, timeout_ms: u64 },
    #[error("notification stream ended while waiting for a reply")]
    NotificationStreamClosed,
}

/// Errors returned by a single request/reply exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Encode(#[from] FrameCodecError),
    #[error("request with sequence id {sequence_id} is still awaiting its reply")]
    RequestInFlight { sequence_id: u8 },
}

/// Errors returned when loading controller configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file `{}`", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Pin(#[from] PinCodeError),
    #[error("transport chunk size cannot be zero")]
    ZeroChunkSize,
}

/// Errors returned by the controller handle.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("the controller task has stopped")]
    Stopped,
    #[error("the controller task failed")]
    TaskFailed(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Temperature(#[from] PackedDecimalError),
}

/// Errors returned when parsing fake thermostat fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("fixture payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("status fixture must hold {expected} payload bytes, got {actual}")]
    InvalidStatusLength { expected: usize, actual: usize },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level protocol errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(FrameCodecError, Box<FrameCodecError>)]
    FrameCodec(Box<FrameCodecError>),
    #[error(transparent)]
    #[from(PackedDecimalError, Box<PackedDecimalError>)]
    PackedDecimal(Box<PackedDecimalError>),
    #[error(transparent)]
    #[from(PinCodeError, Box<PinCodeError>)]
    PinCode(Box<PinCodeError>),
    #[error(transparent)]
    #[from(ModeError, Box<ModeError>)]
    Mode(Box<ModeError>),
    #[error(transparent)]
    #[from(StatusDecodeError, Box<StatusDecodeError>)]
    StatusDecode(Box<StatusDecodeError>),
    #[error(transparent)]
    #[from(TransportError, Box<TransportError>)]
    Transport(Box<TransportError>),
    #[error(transparent)]
    #[from(ExchangeError, Box<ExchangeError>)]
    Exchange(Box<ExchangeError>),
}
