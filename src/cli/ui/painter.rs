use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::climate::OperatingState;
use crate::handlers::{TargetMode, Temperature};
use crate::session::CycleOutcomeKind;

/// Styles thermostat readings for the terminal.
///
/// With colour disabled every method returns the bare label, so piped and
/// snapshot output stays stable.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    /// Green for a completed cycle, yellow for anything that left the
    /// snapshot stale.
    pub(crate) fn outcome(&self, outcome: CycleOutcomeKind) -> String {
        let style = match outcome {
            CycleOutcomeKind::Updated => OwoStyle::new().bold().green(),
            CycleOutcomeKind::DeviceBusy
            | CycleOutcomeKind::MalformedStatus
            | CycleOutcomeKind::ConnectFailed
            | CycleOutcomeKind::Aborted => OwoStyle::new().bold().yellow(),
        };
        self.paint(&outcome.to_string(), style)
    }

    pub(crate) fn power(&self, power: bool) -> String {
        if power {
            self.paint("on", OwoStyle::new().bold().green())
        } else {
            self.muted("off")
        }
    }

    pub(crate) fn target_mode(&self, target_mode: TargetMode) -> String {
        self.paint(&target_mode.to_string(), OwoStyle::new().bold())
    }

    /// Heating in red, cooling in blue, idle dimmed.
    pub(crate) fn operating_state(&self, state: OperatingState) -> String {
        let style = match state {
            OperatingState::Heating => OwoStyle::new().bold().red(),
            OperatingState::Cooling => OwoStyle::new().bold().blue(),
            OperatingState::Idle => OwoStyle::new().dimmed(),
        };
        self.paint(&state.to_string(), style)
    }

    /// A bare reading such as `21.5`.
    pub(crate) fn temperature(&self, value: Temperature) -> String {
        self.paint(&value.to_string(), OwoStyle::new().bold())
    }

    /// A reading with its unit, such as `21.5 °C`.
    pub(crate) fn celsius(&self, value: Temperature) -> String {
        format!("{} °C", self.temperature(value))
    }

    pub(crate) fn optional(&self, value: Option<&str>) -> String {
        match value {
            Some(value) => value.to_string(),
            None => self.muted("<unknown>"),
        }
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}
