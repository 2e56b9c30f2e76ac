//! Command-line arguments.

use clap::{Parser, ValueEnum};

/// Output format for tracing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable colored output for development.
    Pretty,
    /// Newline-delimited JSON for log aggregation.
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "playout", about = "Broadcast playout schedule generator", version)]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value = "pretty")]
    pub tracing: TracingFormat,
}
