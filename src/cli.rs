use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "git-msync", version)]
#[command(about = "Fetch, fast-forward and optionally push or clone every Git repository under the given roots")]
pub struct CliArgs {
    /// Root directories to scan (overrides config)
    pub roots: Vec<PathBuf>,

    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of repositories synced in parallel
    #[arg(short, long, value_parser = parse_jobs)]
    pub jobs: Option<usize>,

    /// Per-repository timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Timeout for the whole run in seconds
    #[arg(long, value_name = "SECS")]
    pub run_timeout: Option<u64>,

    /// Push branches that are ahead of their upstream
    #[arg(long)]
    pub push: bool,

    /// Fetch only, never update working trees
    #[arg(long)]
    pub fetch_only: bool,

    /// Do not clone declared repositories that are missing
    #[arg(long)]
    pub no_clone: bool,

    /// Prune remote-tracking branches while fetching
    #[arg(long)]
    pub prune: bool,

    /// Also clone GitHub repositories of the account that are missing locally (needs `gh`)
    #[arg(long)]
    pub github: bool,

    /// How many directory levels below each root to search
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Accepted for compatibility; runs are never interactive
    #[arg(long, hide = true)]
    pub cli: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_jobs(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(jobs) => Ok(jobs),
        Err(e) => Err(e.to_string()),
    }
}
