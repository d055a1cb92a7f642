use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Keep idle database connections alive with a periodic trivial query.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file. Environment variables override its values.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Poke every bind once and exit instead of scheduling.
    #[arg(long)]
    pub once: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console lines
    Pretty,
    /// One JSON object per event
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
