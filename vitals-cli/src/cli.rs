use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use vitals_core::config::{
    DEFAULT_COUNT, DEFAULT_FALLBACK_SUBJECT, DEFAULT_SERVER_URL, DEFAULT_TIMEOUT,
};
use vitals_core::{ReadingFilter, VitalsConfig, VitalsError};

#[derive(Parser, Debug)]
#[command(
    name = "vitals",
    about = "Normalize FHIR vital signs and flag abnormal readings."
)]
pub struct Cli {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// FHIR server base URL.
    #[arg(long, env = "VITALS_FHIR_SERVER", default_value = DEFAULT_SERVER_URL, global = true)]
    pub server: String,

    /// Maximum number of observations per query.
    #[arg(long, env = "VITALS_COUNT", default_value_t = DEFAULT_COUNT, global = true)]
    pub count: u32,

    /// Subject id that always loads the fallback bundle.
    #[arg(
        long,
        env = "VITALS_FALLBACK_SUBJECT",
        default_value = DEFAULT_FALLBACK_SUBJECT,
        global = true
    )]
    pub fallback_subject: String,

    /// Local bundle used when the server is unavailable or untrustworthy.
    /// Defaults to the synthetic bundle built into the binary.
    #[arg(long, env = "VITALS_FALLBACK_BUNDLE", global = true)]
    pub fallback_bundle: Option<PathBuf>,

    /// Restrict queries to an observation category (e.g. `vital-signs`).
    #[arg(long, env = "VITALS_CATEGORY", global = true)]
    pub category: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, env = "VITALS_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs(), global = true)]
    pub timeout_secs: u64,
}

impl SourceArgs {
    pub fn to_config(&self) -> Result<VitalsConfig, VitalsError> {
        VitalsConfig::new(
            self.server.as_str(),
            self.count,
            self.fallback_subject.as_str(),
            self.fallback_bundle.clone(),
            self.category.clone(),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List subjects that have usable vital signs.
    Patients,
    /// Fetch, normalize and classify one subject's vital signs.
    Readings(ReadingsArgs),
    /// Normalize and classify a local bundle file.
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
pub struct ReadingsArgs {
    /// Subject (patient) id.
    #[arg(short, long)]
    pub subject: String,

    #[command(flatten)]
    pub view: ViewArgs,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Path to a FHIR Bundle JSON file.
    #[arg(short, long)]
    pub input: PathBuf,

    #[command(flatten)]
    pub view: ViewArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    /// Only show this vital sign (display name, e.g. "Heart Rate").
    #[arg(long)]
    pub vital: Option<String>,

    /// First calendar date to include (YYYY-MM-DD).
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last calendar date to include (YYYY-MM-DD).
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Rows shown in table output.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Write CSV/JSON here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ViewArgs {
    pub fn filter(&self) -> ReadingFilter {
        ReadingFilter {
            vital: self.vital.clone(),
            from: self.from,
            to: self.to,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}
