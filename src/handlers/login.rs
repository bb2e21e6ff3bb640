use derive_more::Display;

use super::PinCode;

const AUTH_MARKER: u8 = 0x01;
const SESSION_PAYLOAD_LEN: usize = 8;

/// One authenticated session step, identified by its sub-command and parameter bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[display("{subcommand:#04x}/{param:#04x}")]
pub struct SessionStep {
    subcommand: u8,
    param: u8,
}

impl SessionStep {
    const fn new(subcommand: u8, param: u8) -> Self {
        Self { subcommand, param }
    }

    #[must_use]
    pub const fn subcommand(self) -> u8 {
        self.subcommand
    }

    #[must_use]
    pub const fn param(self) -> u8 {
        self.param
    }
}

/// Handshake steps sent after connecting, in order.
pub const LOGIN_SEQUENCE: [SessionStep; 5] = [
    SessionStep::new(0x01, 0x00),
    SessionStep::new(0x03, 0x00),
    SessionStep::new(0x01, 0x03),
    SessionStep::new(0x03, 0x03),
    SessionStep::new(0x01, 0x04),
];

/// Steps sent after the status query, before disconnecting.
pub const LOGOUT_SEQUENCE: [SessionStep; 3] = [
    SessionStep::new(0x03, 0x04),
    SessionStep::new(0x01, 0x01),
    SessionStep::new(0x03, 0x01),
];

/// Builds the PIN-authenticated payloads used to open and close a session.
pub struct LoginHandler;

impl LoginHandler {
    /// Payload for one session step.
    ///
    /// ```
    /// use matouch::{LOGIN_SEQUENCE, LoginHandler, PinCode};
    ///
    /// let pin = PinCode::new(1234)?;
    /// let payload = LoginHandler::payload_for(LOGIN_SEQUENCE[0], pin);
    /// assert_eq!([0x01, 0x00, 0x01, 0x34, 0x12, 0x00, 0x00, 0x00], payload);
    /// # Ok::<(), matouch::PinCodeError>(())
    /// ```
    #[must_use]
    pub fn payload_for(step: SessionStep, pin: PinCode) -> [u8; SESSION_PAYLOAD_LEN] {
        let [pin_low, pin_high] = pin.wire_bytes();
        [
            step.subcommand(),
            step.param(),
            AUTH_MARKER,
            pin_low,
            pin_high,
            0x00,
            0x00,
            0x00,
        ]
    }

    /// Payloads for the full login handshake.
    #[must_use]
    pub fn login_payloads(pin: PinCode) -> Vec<[u8; SESSION_PAYLOAD_LEN]> {
        LOGIN_SEQUENCE
            .iter()
            .map(|step| Self::payload_for(*step, pin))
            .collect()
    }

    /// Payloads for the logout sequence.
    #[must_use]
    pub fn logout_payloads(pin: PinCode) -> Vec<[u8; SESSION_PAYLOAD_LEN]> {
        LOGOUT_SEQUENCE
            .iter()
            .map(|step| Self::payload_for(*step, pin))
            .collect()
    }
}
