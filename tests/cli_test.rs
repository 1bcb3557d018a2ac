mod common;

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use common::{clone_into, create_remote, create_test_git_repo};

fn git_msync(config_dir: &TempDir) -> Result<Command> {
    let mut cmd = Command::cargo_bin("git-msync")?;
    cmd.arg("--config").arg(config_dir.path().join("absent.toml"));
    Ok(cmd)
}

#[test]
fn test_empty_root_reports_no_repositories() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path().join("empty");
    fs::create_dir_all(&root)?;

    git_msync(&temp_dir)?
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("No Git repositories found"));
    Ok(())
}

#[test]
fn test_cli_flag_runs_non_interactively() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path().join("empty");
    fs::create_dir_all(&root)?;

    git_msync(&temp_dir)?
        .arg("--cli")
        .arg(&root)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("No Git repositories found"));
    Ok(())
}

#[test]
fn test_missing_root_is_reported() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path().join("does-not-exist");

    git_msync(&temp_dir)?
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("path does not exist"))
        .stdout(predicate::str::contains("No Git repositories found"));
    Ok(())
}

#[test]
fn test_clean_run_exits_zero() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let base = temp_dir.path();
    let remote = create_remote(base, "tidy")?;
    clone_into(&remote, &base.join("workspace/tidy"))?;

    git_msync(&temp_dir)?
        .arg(base.join("workspace"))
        .args(["--jobs", "2"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("tidy"))
        .stdout(predicate::str::contains("up-to-date"));
    Ok(())
}

#[test]
fn test_partial_failure_exits_one() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let base = temp_dir.path();
    let remote = create_remote(base, "tidy")?;
    clone_into(&remote, &base.join("workspace/tidy"))?;
    create_test_git_repo(&base.join("workspace/orphan"))?;

    git_msync(&temp_dir)?
        .arg(base.join("workspace"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("no remote configured"));
    Ok(())
}

#[test]
fn test_zero_jobs_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;

    git_msync(&temp_dir)?
        .arg(temp_dir.path())
        .args(["--jobs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1"));
    Ok(())
}

#[test]
fn test_malformed_config_exits_two() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = temp_dir.path().join("config.toml");
    fs::write(&config, "roots = [unterminated")?;

    Command::cargo_bin("git-msync")?
        .arg("--config")
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to parse config file"));
    Ok(())
}

#[test]
fn test_roots_from_toml_config() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path().join("configured");
    fs::create_dir_all(&root)?;
    let config = temp_dir.path().join("config.toml");
    fs::write(&config, format!("roots = [{:?}]\nmax_depth = 2\n", root.to_string_lossy()))?;

    Command::cargo_bin("git-msync")?
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("No Git repositories found"));
    Ok(())
}
