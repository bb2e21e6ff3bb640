use bon::Builder;

use super::mode::power_mode_byte;
use super::{PackedDecimalError, TargetMode, Temperature, encode_temperature};

const CONTROL_PREFIX: [u8; 3] = [0x05, 0x01, 0x01];
const FIXED_SETPOINT_BLOCK: [u8; 6] = [0x90, 0x01, 0x40, 0x02, 0x90, 0x01];
const CONTROL_PAYLOAD_LEN: usize = 20;

/// Vane/fan byte sent before any status reply has been read.
pub const DEFAULT_VANE_FAN_BYTE: u8 = 0x64;

const SWING_VANE: u8 = 0x07;
const FIXED_VANE: u8 = 0x06;

/// Rebuilds the control command's vane/fan byte from a status reply.
///
/// The high nibble is `7` when the status vane byte is `7` and `6`
/// otherwise. The low nibble is the high nibble of the status fan byte.
///
/// ```
/// use matouch::vane_fan_byte_from_status;
///
/// assert_eq!(0x64, vane_fan_byte_from_status(0x40, 0x06));
/// assert_eq!(0x72, vane_fan_byte_from_status(0x20, 0x07));
/// ```
#[must_use]
pub const fn vane_fan_byte_from_status(raw_fan_byte: u8, raw_vane_byte: u8) -> u8 {
    let vane = if raw_vane_byte == SWING_VANE {
        SWING_VANE
    } else {
        FIXED_VANE
    };
    (vane << 4) | (raw_fan_byte >> 4)
}

/// The single field a control command changes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ControlIntent {
    Power(bool),
    TargetMode(TargetMode),
    CoolingSetpoint(Temperature),
    HeatingSetpoint(Temperature),
}

impl ControlIntent {
    /// The `[flagsA, flagsB, flagsC]` selector bytes.
    const fn flags(self) -> [u8; 3] {
        match self {
            Self::Power(_) => [0x01, 0x00, 0x00],
            Self::TargetMode(_) => [0x02, 0x00, 0x00],
            Self::CoolingSetpoint(_) => [0x00, 0x01, 0x00],
            Self::HeatingSetpoint(_) => [0x00, 0x02, 0x00],
        }
    }
}

/// Unified control command.
///
/// Every command carries the full current state; the intent selects which
/// field the controller applies.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Builder)]
pub struct ControlCommand {
    intent: ControlIntent,
    target_mode: TargetMode,
    cooling_setpoint: Temperature,
    heating_setpoint: Temperature,
    #[builder(default = DEFAULT_VANE_FAN_BYTE)]
    vane_fan_byte: u8,
}

impl ControlCommand {
    #[must_use]
    pub const fn intent(&self) -> ControlIntent {
        self.intent
    }

    /// Builds the twenty-byte control payload.
    ///
    /// ```
    /// use matouch::{ControlCommand, ControlIntent, TargetMode, Temperature};
    ///
    /// let command = ControlCommand::builder()
    ///     .intent(ControlIntent::TargetMode(TargetMode::Cool))
    ///     .target_mode(TargetMode::Cool)
    ///     .cooling_setpoint(Temperature::from_tenths(245))
    ///     .heating_setpoint(Temperature::from_tenths(210))
    ///     .build();
    /// let payload = command.payload()?;
    /// assert_eq!([0x02, 0x00, 0x00, 0x09], payload[3..7]);
    /// # Ok::<(), matouch::PackedDecimalError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when a setpoint cannot be packed.
    pub fn payload(&self) -> Result<[u8; CONTROL_PAYLOAD_LEN], PackedDecimalError> {
        let (cooling_setpoint, heating_setpoint, mode) = match self.intent {
            ControlIntent::Power(power) => (
                self.cooling_setpoint,
                self.heating_setpoint,
                power_mode_byte(power),
            ),
            ControlIntent::TargetMode(mode) => (
                self.cooling_setpoint,
                self.heating_setpoint,
                mode.device_flags().bits(),
            ),
            ControlIntent::CoolingSetpoint(value) => (
                value,
                self.heating_setpoint,
                self.target_mode.device_flags().bits(),
            ),
            ControlIntent::HeatingSetpoint(value) => (
                self.cooling_setpoint,
                value,
                self.target_mode.device_flags().bits(),
            ),
        };
        let [cool_low, cool_high] = encode_temperature(cooling_setpoint)?;
        let [heat_low, heat_high] = encode_temperature(heating_setpoint)?;
        let [flags_a, flags_b, flags_c] = self.intent.flags();

        let mut payload = [0u8; CONTROL_PAYLOAD_LEN];
        payload[..3].copy_from_slice(&CONTROL_PREFIX);
        payload[3..7].copy_from_slice(&[flags_a, flags_b, flags_c, mode]);
        payload[7..11].copy_from_slice(&[cool_low, cool_high, heat_low, heat_high]);
        payload[11..17].copy_from_slice(&FIXED_SETPOINT_BLOCK);
        payload[17] = self.vane_fan_byte;
        Ok(payload)
    }
}
