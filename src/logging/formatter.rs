//! Console line format: `[2024-05-01 12:00:00,123] [INFO    ] [ * message key=value]`.

use crate::poker::POKE_TARGET;
use chrono::Local;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use yansi::{Paint, Style};

/// Pretty event formatter. Successful pokes are tagged `POKE` instead of their level.
pub struct PacemakerFormatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Poke,
    Level(Level),
}

impl Tag {
    fn of(level: &Level, target: &str) -> Self {
        if target == POKE_TARGET {
            Tag::Poke
        } else {
            Tag::Level(*level)
        }
    }

    fn label(self) -> &'static str {
        match self {
            Tag::Poke => "POKE",
            Tag::Level(Level::ERROR) => "ERROR",
            Tag::Level(Level::WARN) => "WARNING",
            Tag::Level(Level::INFO) => "INFO",
            Tag::Level(Level::DEBUG) => "DEBUG",
            Tag::Level(_) => "TRACE",
        }
    }

    fn style(self) -> Style {
        match self {
            Tag::Poke => Style::new().magenta().bold(),
            Tag::Level(Level::ERROR) => Style::new().red().bold(),
            Tag::Level(Level::WARN) => Style::new().yellow(),
            Tag::Level(Level::INFO) => Style::new().green(),
            Tag::Level(Level::DEBUG) => Style::new().blue(),
            Tag::Level(_) => Style::new().dim(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for PacemakerFormatter
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
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S,%3f").to_string();
        let tag = Tag::of(meta.level(), meta.target());
        let label = format!("{:<8}", tag.label());

        if writer.has_ansi_escapes() {
            write!(writer, "[{}] [{}] [ * ", timestamp.dim(), label.paint(tag.style()))?;
        } else {
            write!(writer, "[{timestamp}] [{label}] [ * ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer, "]")
    }
}
