//! Logging setup for the miner.
//!
//! Call [`init_journald_or_stdout`] once at startup. Everything else uses
//! `use crate::tracing::prelude::*` for the `trace!()` .. `error!()` macros.

use std::env;
use std::fmt;
use std::io::IsTerminal;

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{
        format::{DefaultFields, Writer},
        time::FormatTime,
        FmtContext, FormatEvent, FormatFields,
    },
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

const CRATE_PREFIX: &str = "cpuminer::";

/// Install the global subscriber.
///
/// Under systemd (`JOURNAL_STREAM` set) events go to journald; otherwise to
/// stdout, filtered by `RUST_LOG` with a default level of INFO.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => tracing_subscriber::registry().with(layer).init(),
            Err(e) => {
                use_stdout();
                error!(error = %e, "Failed to initialize journald logging, using stdout.");
            }
        }
    } else {
        use_stdout();
    }
}

fn use_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    let formatter = CompactFormatter {
        ansi: std::io::stdout().is_terminal(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(formatter.ansi)
                .fmt_fields(DefaultFields::new())
                .event_format(formatter),
        )
        .init();
}

/// One line per event: time, level, short target, message, then fields.
///
/// ```text
/// 14:03:11 INFO  daemon: Share accepted job_id=875b4b7 latency_ms=41
/// ```
struct CompactFormatter {
    ansi: bool,
}

impl CompactFormatter {
    fn paint(&self, w: &mut Writer<'_>, color: &str, text: &str) -> fmt::Result {
        if self.ansi {
            write!(w, "\x1b[{}m{}\x1b[0m", color, text)
        } else {
            w.write_str(text)
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let formatted = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(formatted);
        } else {
            self.fields.push((field.name(), formatted));
        }
    }
}

/// Drop the crate name from our own targets; use the real target for
/// events bridged from the `log` crate.
fn short_target<'a>(target: &'a str, fields: &'a [(&'static str, String)]) -> &'a str {
    if let Some(stripped) = target.strip_prefix(CRATE_PREFIX) {
        stripped
    } else if target == "log" {
        fields
            .iter()
            .find(|(k, _)| *k == "log.target")
            .map(|(_, v)| v.as_str())
            .unwrap_or(target)
    } else {
        target
    }
}

impl<S, N> FormatEvent<S, N> for CompactFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;
        writer.write_char(' ')?;

        let (color, text) = match *event.metadata().level() {
            Level::ERROR => ("31", "ERROR"),
            Level::WARN => ("33", "WARN "),
            Level::INFO => ("32", "INFO "),
            Level::DEBUG => ("34", "DEBUG"),
            Level::TRACE => ("35", "TRACE"),
        };
        self.paint(&mut writer, color, text)?;

        let target = short_target(event.metadata().target(), &visitor.fields);
        write!(writer, " {}: ", target)?;

        if let Some(msg) = &visitor.message {
            writer.write_str(msg)?;
        }

        for (key, value) in visitor.fields.iter().filter(|(k, _)| !k.starts_with("log.")) {
            writer.write_char(' ')?;
            self.paint(&mut writer, "90", &format!("{}={}", key, value))?;
        }

        writeln!(writer)
    }
}

/// Local wall-clock time to the second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| fmt::Error)?;
        w.write_str(&formatted)
    }
}
