mod control;
mod frame_codec;
mod login;
mod mode;
mod packed_decimal;
mod status;

pub use self::control::{
    ControlCommand, ControlIntent, DEFAULT_VANE_FAN_BYTE, vane_fan_byte_from_status,
};
pub use self::frame_codec::{
    CompleteMessage, FrameCodec, FrameCodecError, Reassembler, SequenceId,
};
pub use self::login::{LOGIN_SEQUENCE, LOGOUT_SEQUENCE, LoginHandler, SessionStep};
pub use self::mode::{DecodedMode, ModeError, ModeFlags, TargetMode};
pub use self::packed_decimal::{
    PackedDecimalError, PinCode, PinCodeError, Temperature, decode_temperature,
    encode_temperature,
};
pub use self::status::{STATUS_QUERY, STATUS_REPLY_LEN, StatusDecodeError, StatusReply};
