//! Logging setup for applications, benchmarks and tests using apex-sfm.
//!
//! The library itself only emits `tracing` events: per-iteration tables at debug level, a summary
//! at info/warn level when a run ends, and errors from the `log()` helpers of the error types.
//! These functions install a `tracing-subscriber` that prints them as
//!
//! ```text
//! [INFO 2026-01-05 14:03:11 apex_sfm::optimizer::levenberg_marquardt] Levenberg-Marquardt converged ...
//! [DEBUG 2026-01-05 14:03:11 levenberg_marquardt.rs:512] ...
//! ```
//!
//! The default level can be overridden with `RUST_LOG`, e.g. `RUST_LOG=apex_sfm=debug`.
//! Colors are disabled when `NO_COLOR` is set.

use chrono::Local;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    EnvFilter,
    fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
    registry::LookupSpan,
};

/// Install the apex-sfm subscriber with INFO as the default level.
///
/// # Panics
/// If a global subscriber is already set; use [`try_init_logger_with_level`] where that can
/// happen.
///
/// ```no_run
/// apex_sfm::init_logger();
/// tracing::info!("Application started");
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the apex-sfm subscriber with a custom default level.
///
/// ```no_run
/// use tracing::Level;
///
/// apex_sfm::init_logger_with_level(Level::DEBUG);
/// tracing::debug!("Debug logging enabled");
/// ```
pub fn init_logger_with_level(default_level: Level) {
    subscriber(default_level).init();
}

/// Like [`init_logger_with_level`], but returns `false` instead of panicking when a global
/// subscriber is already installed. Safe to call from every test.
pub fn try_init_logger_with_level(default_level: Level) -> bool {
    subscriber(default_level).try_init().is_ok()
}

fn subscriber(
    default_level: Level,
) -> tracing_subscriber::fmt::SubscriberBuilder<
    tracing_subscriber::fmt::format::DefaultFields,
    SfmFormatter,
    EnvFilter,
> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .event_format(SfmFormatter {
            ansi: std::env::var_os("NO_COLOR").is_none(),
        })
}

/// `[LEVEL timestamp location] message`
pub struct SfmFormatter {
    ansi: bool,
}

fn level_label(level: Level, ansi: bool) -> String {
    let color = match level {
        Level::ERROR => 31,
        Level::WARN => 33,
        Level::INFO => 32,
        Level::DEBUG => 34,
        Level::TRACE => 35,
    };
    if ansi {
        format!("\x1b[{color}m{level}\x1b[0m")
    } else {
        level.to_string()
    }
}

/// `file:line` for DEBUG/TRACE events, the module target otherwise.
fn location(level: Level, target: &str, file: Option<&str>, line: Option<u32>) -> String {
    match (level, file) {
        (Level::DEBUG | Level::TRACE, Some(file)) => {
            let name = file.rsplit(['/', '\\']).next().unwrap_or(file);
            match line {
                Some(line) => format!("{name}:{line}"),
                None => name.to_string(),
            }
        }
        _ => target.to_string(),
    }
}

impl<S, N> FormatEvent<S, N> for SfmFormatter
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
        let metadata = event.metadata();
        let level = *metadata.level();
        write!(
            writer,
            "[{} {} {}] ",
            level_label(level, self.ansi),
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            location(level, metadata.target(), metadata.file(), metadata.line())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
