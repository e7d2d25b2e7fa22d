use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    Critical,
    High,
    Medium,
    Low,
    Background,
}

impl From<PriorityArg> for corelib::Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Critical => corelib::Priority::Critical,
            PriorityArg::High => corelib::Priority::High,
            PriorityArg::Medium => corelib::Priority::Medium,
            PriorityArg::Low => corelib::Priority::Low,
            PriorityArg::Background => corelib::Priority::Background,
        }
    }
}

#[derive(Debug, Parser)]
#[clap(name = "ingest-cli", version, about = "One-shot driver for the market-data ingestion service")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch a single symbol through the full cache/quota/fallback stack.
    Fetch {
        #[clap(long, value_enum)]
        data_type: DataTypeArg,
        #[clap(long)]
        symbol: String,
        #[clap(long, value_enum, default_value = "medium")]
        priority: PriorityArg,
        /// Skip the cache step and go straight to the degradation plan.
        #[clap(long)]
        no_cache: bool,
    },
    /// Start or inspect a historical back-fill.
    #[clap(subcommand)]
    Historical(HistoricalCommand),
    /// Print per-provider quota usage and cache counters.
    Stats,
}

#[derive(Debug, Subcommand)]
pub enum HistoricalCommand {
    /// Splits `[start, end)` into chunks and submits each through the
    /// Governor as a low-priority, permanent-cache request.
    Load {
        #[clap(long)]
        symbol: String,
        #[clap(long)]
        provider: String,
        #[clap(long)]
        timeframe: String,
        /// RFC 3339 timestamp, e.g. 2023-01-01T00:00:00Z.
        #[clap(long)]
        start: chrono::DateTime<chrono::Utc>,
        #[clap(long)]
        end: chrono::DateTime<chrono::Utc>,
    },
    /// Reports progress for a previously started load.
    Status {
        #[clap(long)]
        id: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DataTypeArg {
    Price,
    Historical,
    News,
    Sentiment,
}

impl From<DataTypeArg> for corelib::DataType {
    fn from(d: DataTypeArg) -> Self {
        match d {
            DataTypeArg::Price => corelib::DataType::Price,
            DataTypeArg::Historical => corelib::DataType::Historical,
            DataTypeArg::News => corelib::DataType::News,
            DataTypeArg::Sentiment => corelib::DataType::Sentiment,
        }
    }
}
