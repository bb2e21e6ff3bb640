use std::fmt::{self, Display, Formatter};

use crate::climate::ClimateSnapshot;
use crate::session::CycleOutcomeKind;

use super::painter::Painter;
use super::table::Table;

/// Renders a full snapshot with the outcome of the cycle that produced it.
pub(crate) struct SnapshotView<'a> {
    snapshot: &'a ClimateSnapshot,
    outcome: CycleOutcomeKind,
    painter: &'a Painter,
}

impl<'a> SnapshotView<'a> {
    pub(crate) fn new(
        snapshot: &'a ClimateSnapshot,
        outcome: CycleOutcomeKind,
        painter: &'a Painter,
    ) -> Self {
        Self {
            snapshot,
            outcome,
            painter,
        }
    }
}

impl Display for SnapshotView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let painter = self.painter;
        let snapshot = self.snapshot;
        let info = &snapshot.device_info;
        let table = Table::key_value(
            painter,
            vec![
                ("power", painter.power(snapshot.power)),
                ("target_mode", painter.target_mode(snapshot.target_mode)),
                (
                    "operating_state",
                    painter.operating_state(snapshot.operating_state),
                ),
                (
                    "current_temperature",
                    painter.celsius(snapshot.current_temperature),
                ),
                ("cooling_setpoint", painter.celsius(snapshot.cooling_setpoint)),
                ("heating_setpoint", painter.celsius(snapshot.heating_setpoint)),
                ("firmware", painter.optional(info.firmware.as_deref())),
                ("software", painter.optional(info.software.as_deref())),
            ],
        );

        write!(f, "{}", painter.heading("MA Touch controller:"))?;
        write!(f, "\n{table}")?;
        write!(
            f,
            "\n{} {}",
            painter.muted("last cycle:"),
            painter.outcome(self.outcome)
        )
    }
}

/// Renders one line per finished cycle for `watch`.
pub(crate) struct CycleLineView<'a> {
    number: u64,
    outcome: CycleOutcomeKind,
    snapshot: &'a ClimateSnapshot,
    painter: &'a Painter,
}

impl<'a> CycleLineView<'a> {
    pub(crate) fn new(
        number: u64,
        outcome: CycleOutcomeKind,
        snapshot: &'a ClimateSnapshot,
        painter: &'a Painter,
    ) -> Self {
        Self {
            number,
            outcome,
            snapshot,
            painter,
        }
    }
}

impl Display for CycleLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let painter = self.painter;
        let snapshot = self.snapshot;
        write!(
            f,
            "{} {} power={} mode={} state={} room={} cool={} heat={}",
            painter.muted(format!("[{:04}]", self.number)),
            painter.outcome(self.outcome),
            painter.power(snapshot.power),
            painter.target_mode(snapshot.target_mode),
            painter.operating_state(snapshot.operating_state),
            painter.temperature(snapshot.current_temperature),
            painter.temperature(snapshot.cooling_setpoint),
            painter.temperature(snapshot.heating_setpoint),
        )
    }
}
