//! Opt-in process-global logging setup. The core never calls into this
//! module itself — it only ever emits `tracing` events — so that a host
//! application can install whatever subscriber it likes. This module
//! exists so tests and example binaries have one to reach for.

use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::common::{Result, Status};
use crate::config::LoggingConfig;

/// Colors an entire formatted log line by its level, with no timestamp or
/// level prefix — meant for interactive terminals, not for piping into log
/// aggregation.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut buffer = String::new();
        let buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer, event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Installs a global `tracing` subscriber filtered at `config.level`,
/// using [`ColorizedFormatter`] when `config.colorize` is set and the
/// default formatter otherwise. Intended to be called once, near process
/// start.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let result = if config.colorize {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .event_format(ColorizedFormatter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| Status::operation_failure(e.to_string()))
}
