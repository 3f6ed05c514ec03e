//! Logger initialization.

use std::{io::IsTerminal, str::FromStr, sync::Once};

use jiff::{Zoned, tz::TimeZone};
use logforth::{
    append::Stderr,
    filter::EnvFilter,
    layout::Layout,
};

static INIT: Once = Once::new();

/// Single-line stderr layout: UTC timestamp, right-aligned level, message.
#[derive(Debug)]
struct UtcLayout {
    no_color: bool,
}

/// ANSI SGR color code for a level, used only on terminals.
fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "31",
        log::Level::Warn => "33",
        log::Level::Info => "32",
        log::Level::Debug => "34",
        log::Level::Trace => "35",
    }
}

impl Layout for UtcLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let timestamp = Zoned::now().with_time_zone(TimeZone::UTC).strftime("%FT%T%.6fZ");
        let level = record.level();

        let line = if self.no_color {
            format!("{timestamp} {level:>5}  {}", record.args())
        } else {
            format!(
                "{timestamp} \x1b[{}m{level:>5}\x1b[0m  {}",
                level_color(level),
                record.args()
            )
        };

        Ok(line.into_bytes())
    }
}

/// Install the process logger. The filter string is an env-filter expression
/// such as `info` or `gateway=debug,server=debug`.
pub fn init(log_filter: &str) {
    let log_filter = log_filter.to_owned();

    INIT.call_once(move || {
        logforth::builder()
            .dispatch(move |dispatch| {
                let filter = EnvFilter::from_str(&log_filter)
                    .unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter should be valid"));

                let layout = UtcLayout {
                    no_color: !std::io::stderr().is_terminal(),
                };

                dispatch.filter(filter).append(Stderr::default().with_layout(layout))
            })
            .apply();
    });
}
