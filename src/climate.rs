use std::collections::BTreeSet;

use serde::Serialize;
use strum_macros::{Display, EnumIter};
use tracing::debug;

use crate::handlers::{
    ControlIntent, PackedDecimalError, StatusReply, TargetMode, Temperature, encode_temperature,
};

const DEFAULT_TEMPERATURE: Temperature = Temperature::from_tenths(100);

/// What the unit is doing right now, derived from mode, setpoints and room temperature.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingState {
    #[default]
    #[strum(to_string = "idle")]
    Idle,
    #[strum(to_string = "heating")]
    Heating,
    #[strum(to_string = "cooling")]
    Cooling,
}

/// Derives the operating state.
///
/// ```
/// use matouch::{OperatingState, TargetMode, Temperature, derive_operating_state};
///
/// let state = derive_operating_state(
///     true,
///     TargetMode::Auto,
///     Temperature::from_tenths(190),
///     Temperature::from_tenths(240),
///     Temperature::from_tenths(200),
/// );
/// assert_eq!(OperatingState::Heating, state);
/// ```
#[must_use]
pub fn derive_operating_state(
    power: bool,
    target_mode: TargetMode,
    current_temperature: Temperature,
    cooling_setpoint: Temperature,
    heating_setpoint: Temperature,
) -> OperatingState {
    if !power {
        return OperatingState::Idle;
    }

    match target_mode {
        TargetMode::Heat if current_temperature <= heating_setpoint => OperatingState::Heating,
        TargetMode::Cool if current_temperature >= cooling_setpoint => OperatingState::Cooling,
        TargetMode::Auto if current_temperature < heating_setpoint => OperatingState::Heating,
        TargetMode::Auto if current_temperature > cooling_setpoint => OperatingState::Cooling,
        TargetMode::Heat | TargetMode::Cool | TargetMode::Auto => OperatingState::Idle,
    }
}

/// Version strings read from the controller.
#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize)]
pub struct DeviceInfo {
    pub firmware: Option<String>,
    pub software: Option<String>,
}

/// Decodes a version characteristic value.
pub(crate) fn decode_version_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Host-settable climate fields, in the order pending changes are pushed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Display, EnumIter)]
pub enum ClimateField {
    #[strum(to_string = "power")]
    Power,
    #[strum(to_string = "target_mode")]
    TargetMode,
    #[strum(to_string = "cooling_setpoint")]
    CoolingSetpoint,
    #[strum(to_string = "heating_setpoint")]
    HeatingSetpoint,
}

/// One requested change to a host-settable field.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FieldChange {
    Power(bool),
    TargetMode(TargetMode),
    CoolingSetpoint(Temperature),
    HeatingSetpoint(Temperature),
}

impl FieldChange {
    #[must_use]
    pub const fn field(self) -> ClimateField {
        match self {
            Self::Power(_) => ClimateField::Power,
            Self::TargetMode(_) => ClimateField::TargetMode,
            Self::CoolingSetpoint(_) => ClimateField::CoolingSetpoint,
            Self::HeatingSetpoint(_) => ClimateField::HeatingSetpoint,
        }
    }

    /// Checks that a setpoint fits the two-byte packed form.
    ///
    /// # Errors
    ///
    /// Returns [`PackedDecimalError::OutOfRange`] for setpoints above `99.9`.
    pub fn ensure_encodable(self) -> Result<Self, PackedDecimalError> {
        match self {
            Self::CoolingSetpoint(value) | Self::HeatingSetpoint(value) => {
                encode_temperature(value)?;
            }
            Self::Power(_) | Self::TargetMode(_) => {}
        }
        Ok(self)
    }

    pub(crate) const fn intent(self) -> ControlIntent {
        match self {
            Self::Power(power) => ControlIntent::Power(power),
            Self::TargetMode(mode) => ControlIntent::TargetMode(mode),
            Self::CoolingSetpoint(value) => ControlIntent::CoolingSetpoint(value),
            Self::HeatingSetpoint(value) => ControlIntent::HeatingSetpoint(value),
        }
    }
}

/// Fields changed locally that still need to be pushed to the controller.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PendingChanges {
    dirty: BTreeSet<ClimateField>,
}

impl PendingChanges {
    pub fn mark(&mut self, field: ClimateField) {
        self.dirty.insert(field);
    }

    pub fn clear(&mut self, field: ClimateField) {
        self.dirty.remove(&field);
    }

    #[must_use]
    pub fn is_dirty(&self, field: ClimateField) -> bool {
        self.dirty.contains(&field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    /// Dirty fields in push order: power, target mode, cooling setpoint, heating setpoint.
    pub fn iter(&self) -> impl Iterator<Item = ClimateField> + '_ {
        self.dirty.iter().copied()
    }
}

/// Mirror of the controller state as seen by the host.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ClimateSnapshot {
    pub power: bool,
    pub target_mode: TargetMode,
    pub cooling_setpoint: Temperature,
    pub heating_setpoint: Temperature,
    pub current_temperature: Temperature,
    pub operating_state: OperatingState,
    pub device_info: DeviceInfo,
}

impl Default for ClimateSnapshot {
    fn default() -> Self {
        Self {
            power: false,
            target_mode: TargetMode::default(),
            cooling_setpoint: DEFAULT_TEMPERATURE,
            heating_setpoint: DEFAULT_TEMPERATURE,
            current_temperature: DEFAULT_TEMPERATURE,
            operating_state: OperatingState::Idle,
            device_info: DeviceInfo::default(),
        }
    }
}

impl ClimateSnapshot {
    /// Applies a decoded status reply.
    ///
    /// A mode byte without a climate mode reports the unit off and keeps
    /// the previous target mode.
    pub fn apply_status(&mut self, reply: &StatusReply) {
        let mode = reply.mode();
        self.power = mode.power;
        if let Some(target_mode) = mode.target_mode {
            self.target_mode = target_mode;
        }
        self.cooling_setpoint = reply.cooling_setpoint();
        self.heating_setpoint = reply.heating_setpoint();
        self.current_temperature = reply.current_temperature();
        self.refresh_operating_state();
        debug!(
            power = self.power,
            target_mode = %self.target_mode,
            cooling_setpoint = %self.cooling_setpoint,
            heating_setpoint = %self.heating_setpoint,
            current_temperature = %self.current_temperature,
            operating_state = %self.operating_state,
            "applied status reply"
        );
    }

    /// Applies a local change, returning whether the value differed.
    pub fn apply_change(&mut self, change: FieldChange) -> bool {
        let changed = match change {
            FieldChange::Power(power) => replace_if_changed(&mut self.power, power),
            FieldChange::TargetMode(mode) => replace_if_changed(&mut self.target_mode, mode),
            FieldChange::CoolingSetpoint(value) => {
                replace_if_changed(&mut self.cooling_setpoint, value)
            }
            FieldChange::HeatingSetpoint(value) => {
                replace_if_changed(&mut self.heating_setpoint, value)
            }
        };
        if changed {
            self.refresh_operating_state();
        }
        changed
    }

    /// Current value of a host-settable field as a change record.
    #[must_use]
    pub fn current_value(&self, field: ClimateField) -> FieldChange {
        match field {
            ClimateField::Power => FieldChange::Power(self.power),
            ClimateField::TargetMode => FieldChange::TargetMode(self.target_mode),
            ClimateField::CoolingSetpoint => FieldChange::CoolingSetpoint(self.cooling_setpoint),
            ClimateField::HeatingSetpoint => FieldChange::HeatingSetpoint(self.heating_setpoint),
        }
    }

    fn refresh_operating_state(&mut self) {
        self.operating_state = derive_operating_state(
            self.power,
            self.target_mode,
            self.current_temperature,
            self.cooling_setpoint,
            self.heating_setpoint,
        );
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;

    fn celsius(tenths: u16) -> Temperature {
        Temperature::from_tenths(tenths)
    }

    #[rstest]
    #[case::off(false, TargetMode::Heat, 180, OperatingState::Idle)]
    #[case::heat_below(true, TargetMode::Heat, 180, OperatingState::Heating)]
    #[case::heat_at_setpoint(true, TargetMode::Heat, 200, OperatingState::Heating)]
    #[case::heat_above(true, TargetMode::Heat, 210, OperatingState::Idle)]
    #[case::cool_above(true, TargetMode::Cool, 250, OperatingState::Cooling)]
    #[case::cool_at_setpoint(true, TargetMode::Cool, 240, OperatingState::Cooling)]
    #[case::cool_below(true, TargetMode::Cool, 230, OperatingState::Idle)]
    #[case::auto_cold(true, TargetMode::Auto, 190, OperatingState::Heating)]
    #[case::auto_hot(true, TargetMode::Auto, 250, OperatingState::Cooling)]
    #[case::auto_comfortable(true, TargetMode::Auto, 220, OperatingState::Idle)]
    #[case::auto_at_heat_setpoint(true, TargetMode::Auto, 200, OperatingState::Idle)]
    #[case::auto_at_cool_setpoint(true, TargetMode::Auto, 240, OperatingState::Idle)]
    fn operating_state_follows_mode_and_setpoints(
        #[case] power: bool,
        #[case] target_mode: TargetMode,
        #[case] current: u16,
        #[case] expected: OperatingState,
    ) {
        let state =
            derive_operating_state(power, target_mode, celsius(current), celsius(240), celsius(200));
        assert_eq!(expected, state);
    }

    #[test]
    fn apply_change_reports_only_real_changes() {
        let mut snapshot = ClimateSnapshot::default();

        assert!(!snapshot.apply_change(FieldChange::Power(false)));
        assert!(snapshot.apply_change(FieldChange::Power(true)));
        assert!(!snapshot.apply_change(FieldChange::TargetMode(TargetMode::Auto)));
        assert!(snapshot.apply_change(FieldChange::HeatingSetpoint(celsius(215))));
        assert_eq!(celsius(215), snapshot.heating_setpoint);
    }

    #[test]
    fn apply_change_recomputes_operating_state() {
        let mut snapshot = ClimateSnapshot::default();
        snapshot.apply_change(FieldChange::Power(true));
        snapshot.apply_change(FieldChange::TargetMode(TargetMode::Heat));
        assert_eq!(OperatingState::Heating, snapshot.operating_state);

        snapshot.apply_change(FieldChange::HeatingSetpoint(celsius(90)));
        assert_eq!(OperatingState::Idle, snapshot.operating_state);
    }

    #[rstest]
    #[case::cooling(FieldChange::CoolingSetpoint(celsius(1_200)))]
    #[case::heating(FieldChange::HeatingSetpoint(celsius(1_000)))]
    fn setpoints_above_packed_range_are_not_encodable(#[case] change: FieldChange) {
        assert_matches!(
            change.ensure_encodable(),
            Err(PackedDecimalError::OutOfRange { .. })
        );
    }

    #[rstest]
    #[case::power(FieldChange::Power(true))]
    #[case::mode(FieldChange::TargetMode(TargetMode::Cool))]
    #[case::top_of_range(FieldChange::HeatingSetpoint(celsius(999)))]
    fn encodable_changes_pass_through(#[case] change: FieldChange) {
        assert_eq!(Ok(change), change.ensure_encodable());
    }

    #[test]
    fn pending_changes_iterate_in_push_order() {
        let mut pending = PendingChanges::default();
        pending.mark(ClimateField::HeatingSetpoint);
        pending.mark(ClimateField::Power);
        pending.mark(ClimateField::CoolingSetpoint);
        pending.mark(ClimateField::Power);

        let order: Vec<ClimateField> = pending.iter().collect();
        assert_eq!(
            vec![
                ClimateField::Power,
                ClimateField::CoolingSetpoint,
                ClimateField::HeatingSetpoint,
            ],
            order
        );

        pending.clear(ClimateField::Power);
        assert!(!pending.is_dirty(ClimateField::Power));
        assert!(!pending.is_empty());
    }

    #[test]
    fn current_value_round_trips_every_field() {
        let snapshot = ClimateSnapshot::default();
        for field in ClimateField::iter() {
            assert_eq!(field, snapshot.current_value(field).field());
        }
    }

    #[rstest]
    #[case(b"1.02\0\0".as_slice(), "1.02")]
    #[case(b"PAR-CT01MAU ".as_slice(), "PAR-CT01MAU")]
    #[case(&[0x41, 0xFF, 0x00], "A\u{FFFD}")]
    fn version_strings_are_trimmed(#[case] raw: &[u8], #[case] expected: &str) {
        assert_eq!(expected, decode_version_string(raw));
    }

    #[test]
    fn default_snapshot_serialises_as_json() {
        let json = serde_json::to_value(ClimateSnapshot::default()).expect("snapshot should serialise");
        assert_eq!(serde_json::json!(10.0), json["current_temperature"]);
        assert_eq!(serde_json::json!("auto"), json["target_mode"]);
        assert_eq!(serde_json::json!("idle"), json["operating_state"]);
    }
}
