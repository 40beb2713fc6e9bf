use clap::{Args, Parser, Subcommand, ValueEnum};
use core_runtime::config::StrategySetting;
use core_runtime::logging::LogFormat;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "jellyplex", version)]
#[command(about = "Synchronize watched state between Jellyfin and Plex", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one reconciliation pass and print the report
    Sync(SyncArgs),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Configuration file; defaults to $JELLYPLEX_CONFIG
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Conflict strategy, overriding the configuration file
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Compute and report actions without writing to either server
    #[arg(long)]
    pub dry_run: bool,

    /// Jellyfin library to include (repeatable)
    #[arg(long = "jellyfin-library", value_name = "NAME")]
    pub jellyfin_libraries: Vec<String>,

    /// Plex library to include (repeatable)
    #[arg(long = "plex-library", value_name = "NAME")]
    pub plex_libraries: Vec<String>,

    /// How to print the run report on stdout
    #[arg(long, value_enum, default_value_t = ReportFormat::Summary)]
    pub report: ReportFormat,

    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,

    /// Debug logging with module targets
    #[arg(short, long)]
    pub verbose: bool,

    /// Trace logging, including HTTP plumbing, span events and thread names
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    MoreAdvancedWins,
    JellyfinAuthoritative,
    PlexAuthoritative,
    Bidirectional,
}

impl From<StrategyArg> for StrategySetting {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::MoreAdvancedWins => StrategySetting::MoreAdvancedWins,
            StrategyArg::JellyfinAuthoritative => StrategySetting::JellyfinAuthoritative,
            StrategyArg::PlexAuthoritative => StrategySetting::PlexAuthoritative,
            StrategyArg::Bidirectional => StrategySetting::Bidirectional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Full report as JSON
    Json,
    /// One summary line plus failed items
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}
