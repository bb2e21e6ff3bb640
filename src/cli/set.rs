use std::io;

use anyhow::{Result, bail};
use bon::Builder;
use clap::{Args, ValueEnum};
use tracing::{debug, instrument};

use crate::climate::FieldChange;
use crate::cli::OutputFormat;
use crate::config::ControllerConfig;
use crate::handlers::{TargetMode, Temperature};
use crate::hw::DeviceTransport;
use crate::session::{ClimateSession, CycleOutcomeKind};
use crate::terminal::TerminalClient;

use super::status::{run_reported_cycle, write_snapshot};

/// Arguments for `set`. At least one change is required.
#[derive(Debug, Clone, Default, Args, Builder)]
#[group(required = true, multiple = true)]
pub struct SetArgs {
    /// Turn the unit on or off.
    #[arg(long, value_enum)]
    power: Option<PowerState>,
    /// Target mode: `auto`, `heat` or `cool`.
    #[arg(long)]
    mode: Option<TargetMode>,
    /// Cooling setpoint in °C.
    #[arg(long, value_parser = parse_setpoint)]
    cool: Option<Temperature>,
    /// Heating setpoint in °C.
    #[arg(long, value_parser = parse_setpoint)]
    heat: Option<Temperature>,
}

impl SetArgs {
    /// Requested changes in push order.
    #[must_use]
    pub fn changes(&self) -> Vec<FieldChange> {
        [
            self.power.map(|power| FieldChange::Power(power.is_on())),
            self.mode.map(FieldChange::TargetMode),
            self.cool.map(FieldChange::CoolingSetpoint),
            self.heat.map(FieldChange::HeatingSetpoint),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Requested power state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum PowerState {
    /// Turn the unit off.
    Off,
    /// Turn the unit on.
    On,
}

impl PowerState {
    fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
        }
    }
}

/// Executes the `set` command.
///
/// The first cycle syncs the local mirror so that only values that differ
/// from the controller are marked for pushing; the second cycle pushes them.
#[instrument(
    skip(transport, config, args, out, terminal_client),
    level = "info",
    fields(?output_format, changes = args.changes().len())
)]
pub(crate) async fn run<W>(
    transport: Box<dyn DeviceTransport>,
    config: &ControllerConfig,
    args: &SetArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let mut session = ClimateSession::new(transport, config)?;
    let synced = run_reported_cycle(&mut session).await?;
    if synced != CycleOutcomeKind::Updated {
        bail!("controller status unavailable ({synced}); no changes were sent");
    }

    for change in args.changes() {
        let changed = session.apply_change(change)?;
        debug!(field = %change.field(), changed, "applied requested change");
    }

    let outcome = if session.pending_changes().is_empty() {
        synced
    } else {
        run_reported_cycle(&mut session).await?
    };
    write_snapshot(out, terminal_client, output_format, session.snapshot(), outcome)
}

fn parse_setpoint(value: &str) -> Result<Temperature, String> {
    let celsius: f64 = value
        .parse()
        .map_err(|error: std::num::ParseFloatError| error.to_string())?;
    Temperature::from_celsius(celsius).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn changes_follow_push_order() {
        let args = SetArgs::builder()
            .heat(Temperature::from_tenths(215))
            .power(PowerState::On)
            .mode(TargetMode::Heat)
            .build();

        assert_eq!(
            vec![
                FieldChange::Power(true),
                FieldChange::TargetMode(TargetMode::Heat),
                FieldChange::HeatingSetpoint(Temperature::from_tenths(215)),
            ],
            args.changes()
        );
    }

    #[rstest]
    #[case("21.5", Ok(Temperature::from_tenths(215)))]
    #[case("0", Ok(Temperature::from_tenths(0)))]
    #[case("99.9", Ok(Temperature::from_tenths(999)))]
    fn setpoints_parse_as_celsius(
        #[case] input: &str,
        #[case] expected: Result<Temperature, String>,
    ) {
        assert_eq!(expected, parse_setpoint(input));
    }

    #[rstest]
    #[case::not_a_number("warm")]
    #[case::too_hot("100.0")]
    #[case::negative("-1")]
    fn invalid_setpoints_are_rejected(#[case] input: &str) {
        assert!(parse_setpoint(input).is_err());
    }
}
