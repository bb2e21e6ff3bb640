use std::io;

use anyhow::Result;
use bon::Builder;
use tracing::instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::config::ControllerConfig;
use crate::hw::{BtleplugTransport, BtleplugTransportConfig, DeviceTransport, FakeThermostat};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Settings shared by every command.
#[derive(Debug, Clone, Default, Builder)]
pub struct RunSettings {
    #[builder(default)]
    controller: ControllerConfig,
    /// Falls back to `pretty` when stdout is a terminal and `json` otherwise.
    output_format: Option<OutputFormat>,
    log_level: Option<LogLevel>,
}

/// Creates a transport backed by the simulated thermostat.
#[must_use]
pub fn fake_transport(fake_args: FakeArgs) -> Box<dyn DeviceTransport> {
    Box::new(FakeThermostat::new(fake_args.into_thermostat_config()))
}

/// Creates a transport over the first usable BLE adapter.
///
/// # Errors
///
/// Returns an error if no BLE adapter is available.
#[instrument(level = "info", skip(config))]
pub async fn real_transport(config: BtleplugTransportConfig) -> Result<Box<dyn DeviceTransport>> {
    tracing::Span::current().pb_set_message("Opening BLE adapter");
    let transport = BtleplugTransport::new(config).await?;
    Ok(Box::new(transport))
}

/// Runs a CLI command against `transport`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = matouch::Args::try_parse_from(["matouch", "--fake", "--output", "json", "status"])?;
/// let settings = matouch::RunSettings::builder()
///     .maybe_output_format(args.output_format())
///     .build();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args();
/// let transport = matouch::fake_transport(maybe_fake_args.unwrap_or_default());
/// let mut out = Vec::new();
/// matouch::run(command, &mut out, transport, settings).await?;
/// assert!(String::from_utf8(out)?.contains("\"outcome\": \"updated\""));
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the controller cannot be
/// reached, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    transport: Box<dyn DeviceTransport>,
    settings: RunSettings,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, transport, settings).await
}

/// Runs a CLI command with an injected terminal client.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl matouch::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = matouch::Args::try_parse_from([
///     "matouch",
///     "--log-level",
///     "debug",
///     "--fake",
///     "set",
///     "--heat",
///     "19.5",
/// ])?;
/// let settings = matouch::RunSettings::builder()
///     .maybe_log_level(args.log_level())
///     .build();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args();
/// let transport = match maybe_fake_args {
///     Some(fake_args) => matouch::fake_transport(fake_args),
///     None => matouch::real_transport(matouch::BtleplugTransportConfig::default()).await?,
/// };
/// let mut out = Vec::new();
/// matouch::run_with_clients(command, &mut out, &FakeTerminal, transport, settings).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the controller cannot be
/// reached, or output writing fails.
#[instrument(
    skip(out, terminal_client, transport, settings),
    level = "info",
    fields(command = %command_name(&command), log_level = ?settings.log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    transport: Box<dyn DeviceTransport>,
    settings: RunSettings,
) -> Result<()>
where
    W: io::Write,
{
    let RunSettings {
        controller,
        output_format,
        log_level,
    } = settings;

    telemetry::initialise_tracing(
        "matouch",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let output_format = output_format.unwrap_or(if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });

    match command {
        Command::Status => {
            crate::cli::status::run(transport, &controller, out, terminal_client, output_format)
                .await
        }
        Command::Set(args) => {
            crate::cli::set::run(
                transport,
                &controller,
                &args,
                out,
                terminal_client,
                output_format,
            )
            .await
        }
        Command::Watch(args) => {
            crate::cli::watch::run(
                transport,
                controller,
                &args,
                out,
                terminal_client,
                output_format,
            )
            .await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Status => "status",
        Command::Set(_args) => "set",
        Command::Watch(_args) => "watch",
    }
}
