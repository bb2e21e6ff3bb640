mod app;
mod cli;
mod climate;
mod config;
mod controller;
mod error;
mod handlers;
mod hw;
mod protocol;
mod session;
mod telemetry;
mod terminal;
mod utils;

pub use app::{RunSettings, fake_transport, real_transport, run, run_with_clients};
pub use cli::{Args, Command, FakeArgs, LogLevel, OutputFormat, PowerState, SetArgs, WatchArgs};
pub use climate::{
    ClimateField, ClimateSnapshot, DeviceInfo, FieldChange, OperatingState, PendingChanges,
    derive_operating_state,
};
pub use config::{ControllerConfig, default_config_path};
pub use controller::{ClimateController, ControllerHandle, CycleReport};
pub use error::{
    ConfigError, ControllerError, ExchangeError, FixtureError, ProtocolError, TransportError,
};
pub use handlers::{
    CompleteMessage, ControlCommand, ControlIntent, DEFAULT_VANE_FAN_BYTE, DecodedMode,
    FrameCodec, FrameCodecError, LOGIN_SEQUENCE, LOGOUT_SEQUENCE, LoginHandler, ModeError,
    ModeFlags, PackedDecimalError, PinCode, PinCodeError, Reassembler, STATUS_QUERY,
    STATUS_REPLY_LEN, SequenceId, SessionStep, StatusDecodeError, StatusReply, TargetMode,
    Temperature, decode_temperature, encode_temperature, vane_fan_byte_from_status,
};
pub use hw::{
    BtleplugTransport, BtleplugTransportConfig, DeviceTransport, FakeThermostat,
    FakeThermostatConfig, FakeThermostatProbe, FragmentStream, StatusFixture, WriteMode,
};
pub use protocol::EndpointId;
pub use session::{
    ClimateSession, CommandExchange, CycleOutcome, CycleOutcomeKind, CycleState, PendingRequest,
};
pub use terminal::TerminalClient;
