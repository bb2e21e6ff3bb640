use std::io;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::climate::ClimateSnapshot;
use crate::cli::OutputFormat;
use crate::cli::write_json_line;
use crate::config::ControllerConfig;
use crate::hw::DeviceTransport;
use crate::session::{ClimateSession, CycleOutcome, CycleOutcomeKind};
use crate::terminal::TerminalClient;

use super::ui::{Painter, SnapshotView};

/// JSON shape printed by `status` and `set`.
#[derive(Debug, Serialize)]
struct CycleResult<'a> {
    outcome: CycleOutcomeKind,
    snapshot: &'a ClimateSnapshot,
}

/// Executes the `status` command.
#[instrument(
    skip(transport, config, out, terminal_client),
    level = "info",
    fields(?output_format)
)]
pub(crate) async fn run<W>(
    transport: Box<dyn DeviceTransport>,
    config: &ControllerConfig,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let mut session = ClimateSession::new(transport, config)?;
    let outcome = run_reported_cycle(&mut session).await?;
    write_snapshot(out, terminal_client, output_format, session.snapshot(), outcome)
}

/// Runs one cycle, turning link-level failures into command errors.
///
/// A busy or malformed status still yields the previous snapshot.
#[instrument(skip_all, level = "info")]
pub(super) async fn run_reported_cycle(session: &mut ClimateSession) -> Result<CycleOutcomeKind> {
    tracing::Span::current().pb_set_message("Updating MA Touch controller");
    let outcome = session.run_cycle().await;
    let kind = outcome.kind();
    match outcome {
        CycleOutcome::Updated => {
            info!("controller status refreshed");
            Ok(kind)
        }
        CycleOutcome::DeviceBusy => {
            warn!("controller menu is open; status not refreshed");
            Ok(kind)
        }
        CycleOutcome::MalformedStatus(error) => {
            warn!(%error, "status reply could not be decoded");
            Ok(kind)
        }
        CycleOutcome::ConnectFailed(error) => {
            Err(anyhow!(error)).context("could not reach the MA Touch controller")
        }
        CycleOutcome::Aborted { stage, error } => {
            Err(anyhow!(error)).with_context(|| format!("update cycle aborted while {stage}"))
        }
    }
}

pub(super) fn write_snapshot<W>(
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
    snapshot: &ClimateSnapshot,
    outcome: CycleOutcomeKind,
) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", SnapshotView::new(snapshot, outcome, &painter))?;
        }
        OutputFormat::Json => write_json_line(out, &CycleResult { outcome, snapshot })?,
    }
    Ok(())
}
