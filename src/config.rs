use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::cli::CliArgs;
use crate::domain::{DeclaredRepo, SyncMode};
use crate::engine::SyncFlags;
use crate::github::CloneProtocol;

const APP_NAME: &str = "git-msync";
const CONFIG_FILE: &str = "config.toml";
/// One path per line, as written by the interactive path editor
const PLAIN_CONFIG_FILE: &str = "config";

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    pub roots: Vec<PathBuf>,
    /// Worker count; defaults to the number of CPUs
    pub jobs: Option<usize>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub run_timeout: Option<Duration>,
    pub push: bool,
    pub fetch_only: bool,
    pub clone_missing: bool,
    pub prune: bool,
    pub max_depth: usize,
    pub github: GithubConfig,
    pub repos: Vec<DeclaredRepo>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct GithubConfig {
    /// Clone the account's repositories that are missing under the first root
    pub enabled: bool,
    pub owner: Option<String>,
    pub limit: usize,
    pub protocol: CloneProtocol,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            roots: vec![PathBuf::from("~/GitHub")],
            jobs: None,
            timeout: Duration::from_secs(300),
            run_timeout: None,
            push: false,
            fetch_only: false,
            clone_missing: true,
            prune: false,
            max_depth: 3,
            github: GithubConfig::default(),
            repos: Vec::new(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            owner: None,
            limit: 200,
            protocol: CloneProtocol::default(),
        }
    }
}

pub fn get_default_config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", APP_NAME)
        .context("Failed to determine project directories")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

pub fn get_default_config_path() -> Result<PathBuf> {
    Ok(get_default_config_dir()?.join(CONFIG_FILE))
}

/// Files read when no `--config` is given, in priority order.
///
/// `~/.config/git-msync` comes first on every platform, then the platform config dir.
pub fn default_config_candidates() -> Result<Vec<PathBuf>> {
    let home = dirs::home_dir();
    let project_dir = get_default_config_dir().ok();
    let candidates = config_candidates(home.as_deref(), project_dir.as_deref());
    if candidates.is_empty() {
        anyhow::bail!("Failed to determine configuration directories");
    }
    Ok(candidates)
}

fn config_candidates(home: Option<&Path>, project_dir: Option<&Path>) -> Vec<PathBuf> {
    let search_dirs = home
        .map(|h| h.join(".config").join(APP_NAME))
        .into_iter()
        .chain(project_dir.map(Path::to_path_buf));

    let mut candidates = Vec::new();
    for dir in search_dirs {
        for file in [CONFIG_FILE, PLAIN_CONFIG_FILE] {
            let path = dir.join(file);
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
    }
    candidates
}

fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|path| path.is_file()).cloned()
}

impl Config {
    /// Load from `config_path`, or from the first default candidate that exists. A missing file yields defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p,
            None => match first_existing(&default_config_candidates()?) {
                Some(p) => p,
                None => {
                    debug!("no config file found, using defaults");
                    return Ok(Config::default());
                }
            },
        };

        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Config {
                roots: parse_plain_roots(&contents),
                ..Config::default()
            })
        }
    }

    pub fn from_cli_and_file(cli_args: &CliArgs) -> Result<Self> {
        let mut config = Self::load(cli_args.config.clone())?;

        // CLI args override config file
        if !cli_args.roots.is_empty() {
            config.roots = cli_args.roots.clone();
        }
        if let Some(jobs) = cli_args.jobs {
            config.jobs = Some(jobs);
        }
        if let Some(secs) = cli_args.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = cli_args.run_timeout {
            config.run_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(depth) = cli_args.max_depth {
            config.max_depth = depth;
        }
        config.push |= cli_args.push;
        config.fetch_only |= cli_args.fetch_only;
        config.prune |= cli_args.prune;
        config.github.enabled |= cli_args.github;
        if cli_args.no_clone {
            config.clone_missing = false;
        }

        Ok(config)
    }

    /// Absolute roots with `~` expanded, deduplicated, in configured order.
    pub fn expanded_roots(&self) -> Vec<PathBuf> {
        dedup_paths(self.roots.iter().map(|p| absolutize(&expand_home(p))))
    }

    pub fn declared_repos(&self) -> Vec<DeclaredRepo> {
        self.repos
            .iter()
            .map(|repo| DeclaredRepo {
                path: absolutize(&expand_home(&repo.path)),
                url: repo.url.clone(),
            })
            .collect()
    }

    pub fn sync_flags(&self) -> SyncFlags {
        SyncFlags {
            mode: SyncMode {
                fetch_only: self.fetch_only,
                push: self.push,
                clone_missing: self.clone_missing,
                prune: self.prune,
            },
            jobs: self.jobs.unwrap_or_else(num_cpus::get).max(1),
            repo_timeout: self.timeout,
            run_timeout: self.run_timeout,
            max_depth: self.max_depth,
        }
    }
}

fn parse_plain_roots(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Anchor a relative path at the working directory.
pub fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Drop repeated paths, keeping the first occurrence. Existing paths are compared canonically.
pub fn dedup_paths(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    paths
        .into_iter()
        .filter(|path| {
            let key = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            seen.insert(key)
        })
        .collect()
}
