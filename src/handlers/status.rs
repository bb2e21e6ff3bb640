use thiserror::Error;

use super::{DecodedMode, Temperature, decode_temperature};
use crate::utils::format_hex;

/// Payload requesting the full climate status.
pub const STATUS_QUERY: [u8; 3] = [0x05, 0x02, 0x00];

/// Body length of a valid status reply, checksum included.
pub const STATUS_REPLY_LEN: usize = 0x35;

const COMMAND_CLASS_OFFSET: usize = 1;
const RESULT_OFFSET: usize = 2;
const STATUS_COMMAND_CLASS: u8 = 0x05;
const RESULT_OK: u8 = 0x00;
const RESULT_BUSY: u8 = 0x09;

const MODE_OFFSET: usize = 7;
const COOLING_SETPOINT_OFFSET: usize = 28;
const HEATING_SETPOINT_OFFSET: usize = 30;
const CURRENT_TEMPERATURE_OFFSET: usize = 45;
const FAN_OFFSET: usize = 38;
const VANE_OFFSET: usize = 39;

/// Reasons a status reply could not be applied.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum StatusDecodeError {
    /// The reply does not have the status shape.
    #[error("malformed status reply ({len} bytes): {body}")]
    Malformed { len: usize, body: String },
    /// The controller is showing a menu and refused the query.
    #[error("controller is busy in a menu")]
    DeviceBusy,
}

impl StatusDecodeError {
    fn malformed(body: &[u8]) -> Self {
        Self::Malformed {
            len: body.len(),
            body: format_hex(body),
        }
    }
}

/// Decoded status reply.
///
/// Offsets are positions in the reassembled body, where offset 0 is the
/// echoed sequence byte.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StatusReply {
    body: Vec<u8>,
    mode: DecodedMode,
    cooling_setpoint: Temperature,
    heating_setpoint: Temperature,
    current_temperature: Temperature,
}

impl StatusReply {
    /// Decodes a reassembled status reply body.
    ///
    /// # Errors
    ///
    /// Returns [`StatusDecodeError::DeviceBusy`] for the menu sentinel and
    /// [`StatusDecodeError::Malformed`] for any other unexpected shape.
    pub fn decode(body: &[u8]) -> Result<Self, StatusDecodeError> {
        let command_class = body.get(COMMAND_CLASS_OFFSET).copied();
        let result = body.get(RESULT_OFFSET).copied();
        if command_class != Some(STATUS_COMMAND_CLASS) || result != Some(RESULT_OK) {
            if result == Some(RESULT_BUSY) {
                return Err(StatusDecodeError::DeviceBusy);
            }
            return Err(StatusDecodeError::malformed(body));
        }
        if body.len() != STATUS_REPLY_LEN {
            return Err(StatusDecodeError::malformed(body));
        }

        let temperature_at = |offset| {
            decode_temperature(body, offset).map_err(|_error| StatusDecodeError::malformed(body))
        };

        Ok(Self {
            mode: DecodedMode::from_status_byte(body[MODE_OFFSET]),
            cooling_setpoint: temperature_at(COOLING_SETPOINT_OFFSET)?,
            heating_setpoint: temperature_at(HEATING_SETPOINT_OFFSET)?,
            current_temperature: temperature_at(CURRENT_TEMPERATURE_OFFSET)?,
            body: body.to_vec(),
        })
    }

    #[must_use]
    pub fn mode(&self) -> DecodedMode {
        self.mode
    }

    #[must_use]
    pub fn cooling_setpoint(&self) -> Temperature {
        self.cooling_setpoint
    }

    #[must_use]
    pub fn heating_setpoint(&self) -> Temperature {
        self.heating_setpoint
    }

    #[must_use]
    pub fn current_temperature(&self) -> Temperature {
        self.current_temperature
    }

    /// Raw mode byte at body offset 7.
    #[must_use]
    pub fn raw_mode_byte(&self) -> u8 {
        self.body[MODE_OFFSET]
    }

    /// Unconfirmed fan byte; the high nibble tracks fan speed in captures.
    #[must_use]
    pub fn raw_fan_byte(&self) -> u8 {
        self.body[FAN_OFFSET]
    }

    /// Unconfirmed vane byte.
    #[must_use]
    pub fn raw_vane_byte(&self) -> u8 {
        self.body[VANE_OFFSET]
    }

    /// Any body byte, for positions without a typed accessor.
    #[must_use]
    pub fn raw_byte(&self, offset: usize) -> Option<u8> {
        self.body.get(offset).copied()
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
