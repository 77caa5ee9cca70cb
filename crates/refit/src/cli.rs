//! CLI definition and dispatch

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::commands;

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convert Dockerfiles to hardened base images and apk
#[derive(Debug, Parser)]
#[command(
    name = "refit",
    version,
    about = "Convert Dockerfiles to hardened base images and apk",
    after_help = "Example: refit path/to/Dockerfile"
)]
pub struct Cli {
    /// Path to the Dockerfile to convert, or `-` to read stdin
    pub path: Option<PathBuf>,

    /// The organization for cgr.dev/<org>/<image> (defaults to ORG)
    #[arg(long, default_value = "ORG")]
    pub org: String,

    /// An alternate registry and root namespace (e.g. r.example.com/mirror)
    #[arg(long, default_value = "")]
    pub registry: String,

    /// Modify the Dockerfile in place (vs. stdout), saving the original in a .bak file
    #[arg(short = 'i', long)]
    pub in_place: bool,

    /// Print the converted Dockerfile as JSON
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Path to a custom mappings YAML file (instead of the default)
    #[arg(short = 'm', long)]
    pub mappings: Option<PathBuf>,

    /// Skip built-in package/image mappings, still apply default conversion logic
    #[arg(long)]
    pub no_builtin: bool,

    /// Check for and apply available catalog updates
    #[arg(long)]
    pub update: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Set up logging and run the conversion.
    pub async fn dispatch(self) -> Result<()> {
        refit_core::logging::init(Some(self.log_format.as_str()), Some(self.log_level.as_str()))?;
        commands::convert::execute(self).await
    }
}
