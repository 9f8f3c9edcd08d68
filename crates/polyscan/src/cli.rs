use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sets the level of tracing
    #[arg(long, default_value = "INFO", ignore_case = true)]
    pub trace: TraceLevel,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Page through the Polygon ticker listing & save it as a timestamped CSV.
    Fetch(FetchArgs),

    /// List run files, newest first.
    Ls {
        /// Directory holding the run files.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Headline numbers & distributions of a run file.
    Summary {
        #[command(flatten)]
        source: Source,

        /// Rows shown in the exchange table.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Filter, search & page through a run file.
    Search(SearchArgs),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Directory for the timestamped output file.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Exact output path, instead of a timestamped name in --dir.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// How the CSV header is built when records differ in their fields.
    #[arg(long, default_value = "union")]
    pub schema: Schema,

    #[arg(long, default_value_t = 1000)]
    pub page_size: u32,

    /// Pause between pages.
    #[arg(long, default_value_t = 500)]
    pub page_delay_ms: u64,

    /// Wait after a 429 before retrying the same page.
    #[arg(long, default_value_t = 60)]
    pub retry_delay_secs: u64,

    /// Give up on a page after this many 429s (default: never).
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Give up on a page after waiting this long on 429s (default: never).
    #[arg(long)]
    pub max_retry_wait_secs: Option<u64>,
}

/// Which run file to read.
#[derive(Args, Debug)]
pub struct Source {
    /// Run file to read; defaults to the newest one in --dir.
    pub file: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub source: Source,

    /// Keep rows listed on this primary exchange, e.g., XNAS.
    #[arg(long)]
    pub exchange: Option<String>,

    /// Keep rows of this security type, e.g., CS or ETF.
    #[arg(long = "type")]
    pub kind: Option<String>,

    #[arg(long)]
    pub market: Option<String>,

    /// Ticker symbol or company name to look for.
    #[arg(long, short)]
    pub query: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub page: usize,

    #[arg(long, default_value_t = 100)]
    pub page_size: usize,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Schema {
    /// Every field seen in the run.
    Union,
    /// Only the first record's fields; later extras are dropped.
    First,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceLevel {
    DEBUG,
    INFO,
    WARN,
    ERROR,
}
