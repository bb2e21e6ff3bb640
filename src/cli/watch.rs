use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::{info, instrument};

use crate::climate::ClimateSnapshot;
use crate::cli::{OutputFormat, write_json_record};
use crate::config::ControllerConfig;
use crate::controller::{ClimateController, CycleReport};
use crate::hw::DeviceTransport;
use crate::session::CycleOutcomeKind;
use crate::terminal::TerminalClient;

use super::ui::{CycleLineView, Painter};

/// Arguments for `watch`.
#[derive(Debug, Clone, Default, Args)]
pub struct WatchArgs {
    /// Stop after this many update cycles instead of waiting for Ctrl+C.
    #[arg(long, value_name = "N")]
    cycles: Option<u64>,
}

impl WatchArgs {
    #[must_use]
    pub fn new(cycles: Option<u64>) -> Self {
        Self { cycles }
    }

    fn is_last(&self, report: CycleReport) -> bool {
        self.cycles.is_some_and(|limit| report.number >= limit)
    }
}

/// One streamed JSON record per finished cycle.
#[derive(Debug, Serialize)]
struct CycleRecord<'a> {
    cycle: u64,
    outcome: CycleOutcomeKind,
    snapshot: &'a ClimateSnapshot,
}

/// Executes the `watch` command.
#[instrument(
    skip(transport, config, out, terminal_client),
    level = "info",
    fields(cycles = ?args.cycles, ?output_format)
)]
pub(crate) async fn run<W>(
    transport: Box<dyn DeviceTransport>,
    config: ControllerConfig,
    args: &WatchArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let handle = ClimateController::spawn(transport, config)?;
    let mut reports = handle.cycle_reports();
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            signal = &mut interrupted => {
                signal?;
                info!("watch interrupted");
                break;
            }
            changed = reports.changed() => {
                if changed.is_err() {
                    info!("controller stopped");
                    break;
                }
                let Some(report) = *reports.borrow_and_update() else {
                    continue;
                };
                let snapshot = handle.snapshot();
                match output_format {
                    OutputFormat::Pretty => {
                        writeln!(
                            out,
                            "{}",
                            CycleLineView::new(report.number, report.outcome, &snapshot, &painter)
                        )?;
                        out.flush()?;
                    }
                    OutputFormat::Json => write_json_record(
                        out,
                        &CycleRecord {
                            cycle: report.number,
                            outcome: report.outcome,
                            snapshot: &snapshot,
                        },
                    )?,
                }
                if args.is_last(report) {
                    break;
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}
