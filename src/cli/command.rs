use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::app::RunSettings;
use crate::cli::set::SetArgs;
use crate::cli::watch::WatchArgs;
use crate::config::ControllerConfig;
use crate::error::{ConfigError, FixtureError};
use crate::hw::{BtleplugTransportConfig, FakeThermostatConfig, StatusFixture};

/// Command-line options for the MA Touch BLE tool.
#[derive(Debug, Parser)]
#[command(
    name = "matouch",
    about = "Monitor and control Mitsubishi MA Touch thermostats over BLE."
)]
pub struct Args {
    /// Uses the simulated thermostat instead of a BLE adapter.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake status reply payload as hexadecimal bytes.
    #[arg(long, global = true, requires = "fake")]
    fake_status: Option<StatusFixture>,
    /// Makes the fake controller answer status queries as busy.
    #[arg(long, global = true, requires = "fake")]
    fake_busy: bool,
    /// Makes the fake controller swallow every command.
    #[arg(long, global = true, requires = "fake")]
    fake_silent: bool,
    /// Number of connection attempts the fake controller refuses.
    #[arg(long, global = true, requires = "fake", value_name = "COUNT")]
    fake_connect_failures: Option<u32>,
    /// JSON config file; defaults to the per-user config location.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Four-digit controller PIN.
    #[arg(long, global = true)]
    pin: Option<u16>,
    /// Time between update cycles (e.g. `30s`, `2m`).
    #[arg(long, global = true, value_parser = parse_duration)]
    update_interval: Option<Duration>,
    /// Bounded wait for each command reply (e.g. `5s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    reply_timeout: Option<Duration>,
    /// Local-name prefix the controller must advertise.
    #[arg(long, global = true, default_value = "")]
    name_prefix: String,
    /// How long to scan for the controller.
    #[arg(long, global = true, value_parser = parse_duration, default_value = "10s")]
    scan_timeout: Duration,
    /// Overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long = "output", global = true, value_enum)]
    output_format: Option<OutputFormat>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use matouch::{Args, Command, WatchArgs};
    ///
    /// let status = Args::new(Command::Status);
    /// let watch = Args::new(Command::Watch(WatchArgs::new(Some(3))));
    /// let _ = (status, watch);
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            fake: false,
            fake_status: None,
            fake_busy: false,
            fake_silent: false,
            fake_connect_failures: None,
            config: None,
            pin: None,
            update_interval: None,
            reply_timeout: None,
            name_prefix: String::new(),
            scan_timeout: Duration::from_secs(10),
            log_level: None,
            output_format: None,
            command,
        }
    }

    /// Enables the simulated thermostat with pre-parsed settings.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            status,
            busy,
            silent,
            failing_connects,
        } = fake;

        self.fake = true;
        self.fake_status = status;
        self.fake_busy = busy;
        self.fake_silent = silent;
        self.fake_connect_failures = Some(failing_connects);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }

    /// Scan settings for the real BLE transport.
    #[must_use]
    pub fn transport_config(&self) -> BtleplugTransportConfig {
        BtleplugTransportConfig::builder()
            .name_prefix(self.name_prefix.as_str())
            .scan_timeout(self.scan_timeout)
            .build()
    }

    /// Loads the config file and applies flag overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, or when the
    /// merged settings do not validate.
    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let mut config = ControllerConfig::load_or_default(self.config.as_deref())?;
        if let Some(pin) = self.pin {
            config.pin = pin;
        }
        if let Some(update_interval) = self.update_interval {
            config.update_interval = update_interval;
        }
        if let Some(reply_timeout) = self.reply_timeout {
            config.reply_timeout = reply_timeout;
        }
        config.validate()?;
        Ok(config)
    }

    /// Settings for [`crate::run`] resolved from these arguments.
    ///
    /// # Errors
    ///
    /// Propagates [`Args::controller_config`] failures.
    pub fn run_settings(&self) -> Result<RunSettings, ConfigError> {
        Ok(RunSettings::builder()
            .controller(self.controller_config()?)
            .maybe_output_format(self.output_format)
            .maybe_log_level(self.log_level)
            .build())
    }

    /// Splits parsed CLI arguments into command and optional fake-thermostat settings.
    #[must_use]
    pub fn into_command_and_fake_args(self) -> (Command, Option<FakeArgs>) {
        let Args {
            fake,
            fake_status,
            fake_busy,
            fake_silent,
            fake_connect_failures,
            command,
            ..
        } = self;

        let fake_args = fake.then(|| FakeArgs {
            status: fake_status,
            busy: fake_busy,
            silent: fake_silent,
            failing_connects: fake_connect_failures.unwrap_or_default(),
        });

        (command, fake_args)
    }
}

/// Simulated thermostat arguments for programmatic runs.
#[derive(Debug, Default, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    status: Option<StatusFixture>,
    #[builder(default)]
    busy: bool,
    #[builder(default)]
    silent: bool,
    #[builder(default)]
    failing_connects: u32,
}

impl FakeArgs {
    pub(crate) fn into_thermostat_config(self) -> FakeThermostatConfig {
        let Self {
            status,
            busy,
            silent,
            failing_connects,
        } = self;

        FakeThermostatConfig::builder()
            .maybe_status(status)
            .busy(busy)
            .silent(silent)
            .failing_connects(failing_connects)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect once, read the controller status, and print the snapshot.
    Status,
    /// Push new settings to the controller, then print the resulting snapshot.
    Set(SetArgs),
    /// Run the periodic update loop and print every new snapshot.
    Watch(WatchArgs),
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables for humans.
    Pretty,
    /// JSON documents for scripts.
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
