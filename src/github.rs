//! GitHub hosting capability through the `gh` CLI.

use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

use crate::cancel::OpContext;
use crate::error::{Result, SyncError};
use crate::ports::{HostingPort, RemoteRepo};
use crate::process::{self, ProcessError};

/// Which clone URL to hand to `git clone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneProtocol {
    #[default]
    Https,
    Ssh,
}

#[derive(Debug, Deserialize)]
struct GhRepo {
    name: String,
    url: String,
    #[serde(rename = "sshUrl")]
    ssh_url: String,
}

impl GhRepo {
    fn into_remote(self, protocol: CloneProtocol) -> RemoteRepo {
        let clone_url = match protocol {
            CloneProtocol::Https => format!("{}.git", self.url.trim_end_matches(".git")),
            CloneProtocol::Ssh => self.ssh_url,
        };
        RemoteRepo {
            name: self.name,
            clone_url,
        }
    }
}

/// `HostingPort` that shells out to an authenticated `gh`.
#[derive(Debug, Clone)]
pub struct GhCli {
    program: PathBuf,
    protocol: CloneProtocol,
}

impl GhCli {
    /// Locate `gh` on PATH. `None` means clone-of-missing by name is unavailable.
    pub fn detect(protocol: CloneProtocol) -> Option<Self> {
        match which::which("gh") {
            Ok(program) => {
                info!("using GitHub CLI at {}", program.display());
                Some(Self { program, protocol })
            }
            Err(e) => {
                debug!("GitHub CLI not available: {}", e);
                None
            }
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("GH_PROMPT_DISABLED", "1");
        cmd.env("NO_COLOR", "1");
        cmd
    }

    fn hosting_error(err: ProcessError) -> SyncError {
        SyncError::from_process(err, |reason| SyncError::Hosting { reason })
    }
}

impl HostingPort for GhCli {
    fn clone_url(&self, name: &str, ctx: &OpContext) -> Result<Option<String>> {
        let mut cmd = self.command();
        cmd.args(["repo", "view", name, "--json", "name,url,sshUrl"]);
        let output = match process::run(cmd, ctx) {
            Ok(output) => output,
            // gh exits 1 for an unknown repository
            Err(ProcessError::Failed { code: Some(1), stderr, .. }) => {
                debug!("gh has no repository named {}: {}", name, stderr);
                return Ok(None);
            }
            Err(e) => return Err(Self::hosting_error(e)),
        };
        let repo: GhRepo = serde_json::from_str(&output.stdout).map_err(|e| SyncError::Hosting {
            reason: format!("unexpected gh output: {e}"),
        })?;
        Ok(Some(repo.into_remote(self.protocol).clone_url))
    }

    fn list_repositories(
        &self,
        owner: Option<&str>,
        limit: usize,
        ctx: &OpContext,
    ) -> Result<Vec<RemoteRepo>> {
        let mut cmd = self.command();
        cmd.args(["repo", "list"]);
        if let Some(owner) = owner {
            cmd.arg(owner);
        }
        cmd.args(["--limit", &limit.to_string(), "--json", "name,url,sshUrl"]);

        let output = process::run(cmd, ctx).map_err(Self::hosting_error)?;
        parse_repo_list(&output.stdout, self.protocol)
    }
}

fn parse_repo_list(json: &str, protocol: CloneProtocol) -> Result<Vec<RemoteRepo>> {
    let repos: Vec<GhRepo> = serde_json::from_str(json).map_err(|e| SyncError::Hosting {
        reason: format!("unexpected gh output: {e}"),
    })?;
    Ok(repos
        .into_iter()
        .map(|repo| repo.into_remote(protocol))
        .collect())
}
