pub(crate) mod command;
pub(crate) mod set;
pub(crate) mod status;
pub(crate) mod ui;
pub(crate) mod watch;

use std::io;

use anyhow::Result;
use serde::Serialize;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::set::{PowerState, SetArgs};
pub use self::watch::WatchArgs;

/// Writes one pretty-printed JSON document.
pub(crate) fn write_json_line(out: &mut impl io::Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Writes one compact JSON record per line, for streamed output.
pub(crate) fn write_json_record(out: &mut impl io::Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
