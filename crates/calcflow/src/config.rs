//! Application configuration from CLI flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// calcflow: start policy calculations and follow them to completion.
#[derive(Parser, Debug, Clone)]
#[command(name = "calcflow", version, about)]
pub struct AppConfig {
    /// Calculation kind: household or economy.
    #[arg(short, long, default_value = "household", env = "CALCFLOW_KIND")]
    pub kind: String,

    /// Number of reports to run.
    #[arg(short, long, default_value = "1", env = "CALCFLOW_REPORTS")]
    pub reports: u32,

    /// Simulations per household report.
    #[arg(short, long, default_value = "2")]
    pub simulations: u32,

    /// Country id.
    #[arg(long, default_value = "us", env = "CALCFLOW_COUNTRY")]
    pub country: String,

    /// Baseline policy id.
    #[arg(long, default_value = "1")]
    pub baseline: String,

    /// Reform policy id.
    #[arg(long)]
    pub reform: Option<String>,

    /// Region for economy calculations.
    #[arg(long)]
    pub region: Option<String>,

    /// Run time of a simulated job (e.g. "3s", "500ms").
    #[arg(long, default_value = "3s", env = "CALCFLOW_DURATION")]
    pub duration: String,

    /// Time a simulated job spends queued.
    #[arg(long, default_value = "0s")]
    pub queue: String,

    /// Calculation ids the simulated service fails, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub fail: Vec<String>,

    /// Give up after this long (e.g. "5m").
    #[arg(long, default_value = "10m")]
    pub timeout: String,

    /// Directory where results are persisted as JSON.
    #[arg(short, long, env = "CALCFLOW_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Settings file (JSON, durations in milliseconds).
    #[arg(long, env = "CALCFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the final aggregated status as JSON.
    #[arg(long)]
    pub json: bool,

    /// Verbose output and debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (only the final state).
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Generate shell completion.
    #[arg(long, value_enum)]
    pub completion: Option<clap_complete::Shell>,
}

impl AppConfig {
    /// Parse CLI arguments.
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Simulated job run time.
    pub fn duration(&self) -> Result<Duration, String> {
        parse_duration(&self.duration)
            .ok_or_else(|| format!("invalid duration: {:?}", self.duration))
    }

    /// Simulated queue time.
    pub fn queue_time(&self) -> Result<Duration, String> {
        parse_duration(&self.queue).ok_or_else(|| format!("invalid queue time: {:?}", self.queue))
    }

    /// Overall timeout.
    pub fn timeout_duration(&self) -> Result<Duration, String> {
        parse_duration(&self.timeout).ok_or_else(|| format!("invalid timeout: {:?}", self.timeout))
    }
}

/// Parse a duration string like "5m", "1h", "30s", "250ms".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let n: u64 = ms.parse().ok()?;
        Some(Duration::from_millis(n))
    } else if let Some(mins) = s.strip_suffix('m') {
        let n: u64 = mins.parse().ok()?;
        Some(Duration::from_secs(n.checked_mul(60)?))
    } else if let Some(hours) = s.strip_suffix('h') {
        let n: u64 = hours.parse().ok()?;
        Some(Duration::from_secs(n.checked_mul(3600)?))
    } else if let Some(secs) = s.strip_suffix('s') {
        let n: u64 = secs.parse().ok()?;
        Some(Duration::from_secs(n))
    } else {
        let n: u64 = s.parse().ok()?;
        Some(Duration::from_secs(n))
    }
}
