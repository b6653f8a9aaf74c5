// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Diagnostics on the scheduler back-channel.
//
// A backend talks to its scheduler by writing `SEVERITY: message` lines to
// stderr; stdout belongs to payload bytes and must stay clean. Rather than
// maintaining a second logging path, the tracing subscriber itself renders
// every event in that wire format, so ordinary `info!`/`error!` calls
// throughout the pipeline double as scheduler messages.

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Renders events as `SEVERITY: message` lines.
pub struct SchedulerFormat;

impl<S, N> FormatEvent<S, N> for SchedulerFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let level = *event.metadata().level();
        let severity = if level == Level::ERROR {
            "ERROR"
        } else if level == Level::WARN {
            "WARNING"
        } else if level == Level::INFO {
            "INFO"
        } else {
            "DEBUG"
        };

        write!(writer, "{severity}: ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the scheduler-format subscriber, writing to stderr only.
pub fn init() {
    tracing_subscriber::fmt()
        .event_format(SchedulerFormat)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
