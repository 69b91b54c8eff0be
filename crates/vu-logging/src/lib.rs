//! Log output for the venv-update index server and test harness.
//!
//! Lines go to stderr, which index server processes share with the test runner, so the default
//! layout is a padded level column followed by the message. Verbose output adds a timestamp and
//! the emitting module, which tells server and harness lines apart in interleaved output.

use std::env;
use std::fmt;
use std::io;

use anstream::ColorChoice;
use anyhow::Context;
use jiff::Timestamp;
use owo_colors::{OwoColorize, Style};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use vu_static::EnvVars;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// `INFO` and above, e.g., one line per served request.
    #[default]
    Default,
    /// `DEBUG` and above, with timestamps and module names.
    Verbose,
}

/// The layout of a log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VuFormat {
    /// Prefix each line with the time the event was recorded.
    pub timestamps: bool,
    /// Name the module that emitted the event, e.g., `vu_index_server::server`.
    pub targets: bool,
}

impl VuFormat {
    pub fn for_level(level: Level) -> Self {
        match level {
            Level::Default => Self::default(),
            Level::Verbose => Self {
                timestamps: true,
                targets: true,
            },
        }
    }
}

fn level_style(level: tracing::Level) -> Style {
    match level {
        tracing::Level::ERROR => Style::new().red().bold(),
        tracing::Level::WARN => Style::new().yellow().bold(),
        tracing::Level::INFO => Style::new().green(),
        tracing::Level::DEBUG => Style::new().blue(),
        tracing::Level::TRACE => Style::new().purple(),
    }
}

impl<S, N> FormatEvent<S, N> for VuFormat
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
        let meta = event.metadata();
        let ansi = writer.has_ansi_escapes();

        if self.timestamps {
            let now = Timestamp::now();
            if ansi {
                write!(writer, "{} ", now.dimmed())?;
            } else {
                write!(writer, "{now} ")?;
            }
        }

        let level = *meta.level();
        let label = format!("{:>5}", level.as_str());
        if ansi {
            write!(writer, "{} ", label.style(level_style(level)))?;
        } else {
            write!(writer, "{label} ")?;
        }

        if self.targets {
            if ansi {
                write!(writer, "{} ", format!("{}:", meta.target()).dimmed())?;
            } else {
                write!(writer, "{}: ", meta.target())?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// The filter for `level`, unless `directives` (the value of `RUST_LOG`) say otherwise.
pub fn env_filter(level: Level, directives: Option<&str>) -> anyhow::Result<EnvFilter> {
    let default_directive = match level {
        Level::Default => LevelFilter::INFO,
        Level::Verbose => LevelFilter::DEBUG,
    };
    EnvFilter::builder()
        .with_default_directive(default_directive.into())
        .parse(directives.unwrap_or_default())
        .with_context(|| format!("Invalid `{}` directives", EnvVars::RUST_LOG))
}

/// Install a stderr subscriber for `level`, honoring `RUST_LOG`.
pub fn setup_logging(level: Level) -> anyhow::Result<()> {
    let directives = env::var(EnvVars::RUST_LOG).ok();
    let filter = env_filter(level, directives.as_deref())?;
    let ansi = !matches!(
        anstream::Stderr::choice(&io::stderr()),
        ColorChoice::Never
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(VuFormat::for_level(level))
                .with_writer(io::stderr)
                .with_ansi(ansi)
                .with_filter(filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}
