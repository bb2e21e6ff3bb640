use std::str::FromStr;

use serde::Serialize;
use strum_macros::{Display, EnumIter};
use thiserror::Error;

bitflags::bitflags! {
    /// Mode bits carried by the status reply and the control command.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
    pub struct ModeFlags: u8 {
        const POWER = 1 << 0;
        const FAN = 1 << 1;
        const COOL = 1 << 3;
        const HEAT = 1 << 4;
        const DRY = 1 << 5;
        const AUTO = 1 << 6;
    }
}

/// Caller-contract violations caught before any bytes are sent.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ModeError {
    /// The requested target mode has no control-command encoding.
    #[error("unsupported target mode `{value}`; expected auto, heat or cool")]
    UnsupportedTargetMode { value: String },
}

/// Climate target mode exposed to the host.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    #[default]
    #[strum(to_string = "auto")]
    Auto,
    #[strum(to_string = "heat")]
    Heat,
    #[strum(to_string = "cool")]
    Cool,
}

impl TargetMode {
    /// Mode byte sent in the unified control command.
    ///
    /// ```
    /// use matouch::{ModeFlags, TargetMode};
    ///
    /// assert_eq!(0x79, TargetMode::Auto.device_flags().bits());
    /// assert_eq!(ModeFlags::POWER | ModeFlags::HEAT, TargetMode::Heat.device_flags());
    /// ```
    #[must_use]
    pub const fn device_flags(self) -> ModeFlags {
        match self {
            Self::Auto => ModeFlags::POWER
                .union(ModeFlags::COOL)
                .union(ModeFlags::HEAT)
                .union(ModeFlags::DRY)
                .union(ModeFlags::AUTO),
            Self::Heat => ModeFlags::POWER.union(ModeFlags::HEAT),
            Self::Cool => ModeFlags::POWER.union(ModeFlags::COOL),
        }
    }
}

impl FromStr for TargetMode {
    type Err = ModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            _ => Err(ModeError::UnsupportedTargetMode {
                value: value.to_string(),
            }),
        }
    }
}

impl TryFrom<u8> for TargetMode {
    type Error = ModeError;

    /// Maps the host's numeric target state (`0` auto, `1` heat, `2` cool).
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::Heat),
            2 => Ok(Self::Cool),
            _ => Err(ModeError::UnsupportedTargetMode {
                value: value.to_string(),
            }),
        }
    }
}

/// Power and target mode decoded from a status mode byte.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DecodedMode {
    pub power: bool,
    /// `None` when no auto/cool/heat bit is set.
    pub target_mode: Option<TargetMode>,
}

impl DecodedMode {
    /// Decodes the status mode byte.
    ///
    /// The unit is on when the fan bit is set. Auto wins over cool, which
    /// wins over heat. With none of those bits the unit is reported off
    /// whatever the fan bit says.
    ///
    /// ```
    /// use matouch::{DecodedMode, TargetMode};
    ///
    /// let decoded = DecodedMode::from_status_byte(0x79);
    /// assert!(decoded.power);
    /// assert_eq!(Some(TargetMode::Auto), decoded.target_mode);
    /// ```
    #[must_use]
    pub fn from_status_byte(byte: u8) -> Self {
        let flags = ModeFlags::from_bits_retain(byte);
        let target_mode = if flags.contains(ModeFlags::AUTO) {
            Some(TargetMode::Auto)
        } else if flags.contains(ModeFlags::COOL) {
            Some(TargetMode::Cool)
        } else if flags.contains(ModeFlags::HEAT) {
            Some(TargetMode::Heat)
        } else {
            None
        };

        Self {
            power: target_mode.is_some() && flags.contains(ModeFlags::FAN),
            target_mode,
        }
    }
}

/// Mode byte used by the power intent of the control command.
#[must_use]
pub(crate) fn power_mode_byte(power: bool) -> u8 {
    let flags = if power {
        ModeFlags::HEAT | ModeFlags::POWER
    } else {
        ModeFlags::HEAT
    };
    flags.bits()
}
