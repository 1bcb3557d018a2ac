#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

pub fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .with_context(|| format!("failed to run git {:?}", args))?;
    if !output.status.success() {
        bail!(
            "git {:?} failed in {}: {}",
            args,
            dir.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn create_test_git_repo(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    git2::Repository::init(path)?;
    commit_file(path, "README.md", "# fixture\n", "Initial commit")
}

/// Write `file`, stage it and commit on top of HEAD.
pub fn commit_file(repo_path: &Path, file: &str, content: &str, message: &str) -> Result<()> {
    fs::write(repo_path.join(file), content)?;
    let git_repo = git2::Repository::open(repo_path)?;
    let signature = git2::Signature::now("Test User", "test@example.com")?;

    let tree_id = {
        let mut index = git_repo.index()?;
        index.add_path(Path::new(file))?;
        index.write()?;
        index.write_tree()?
    };
    let tree = git_repo.find_tree(tree_id)?;
    let parent = git_repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    git_repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
    Ok(())
}

/// Bare remote seeded with one commit, at `<base>/remotes/<name>.git`.
pub fn create_remote(base: &Path, name: &str) -> Result<PathBuf> {
    let seed = base.join("seeds").join(name);
    create_test_git_repo(&seed)?;
    let remote = base.join("remotes").join(format!("{name}.git"));
    fs::create_dir_all(base.join("remotes"))?;
    git(
        base,
        &["clone", "--quiet", "--bare", path_str(&seed)?, path_str(&remote)?],
    )?;
    Ok(remote)
}

pub fn clone_into(remote: &Path, dest: &Path) -> Result<()> {
    let parent = dest.parent().context("destination has no parent")?;
    fs::create_dir_all(parent)?;
    git(parent, &["clone", "--quiet", path_str(remote)?, path_str(dest)?])?;
    Ok(())
}

/// Advance `remote` by one commit made in a throwaway clone under `scratch`.
pub fn push_remote_commit(remote: &Path, scratch: &Path, file: &str) -> Result<()> {
    let name = remote
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let work = scratch.join(format!("{name}-{file}"));
    clone_into(remote, &work)?;
    commit_file(&work, file, "from upstream\n", "Upstream change")?;
    git(&work, &["push", "--quiet"])?;
    Ok(())
}

pub fn head_oid(repo_path: &Path) -> Result<git2::Oid> {
    let git_repo = git2::Repository::open(repo_path)?;
    let oid = git_repo.head()?.peel_to_commit()?.id();
    Ok(oid)
}

pub fn remote_head_oid(remote: &Path) -> Result<git2::Oid> {
    head_oid(remote)
}

/// File contents of a working tree, `.git` excluded.
pub fn snapshot(repo_path: &Path) -> Result<BTreeMap<PathBuf, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(repo_path).into_iter().filter_entry(|e| e.file_name() != ".git") {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(repo_path)?.to_path_buf();
            files.insert(relative, fs::read(entry.path())?);
        }
    }
    Ok(files)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().context("non-UTF-8 path in test fixture")
}

/// Point `origin` of `repo_path` at an `ext::` transport that just runs
/// `sh -c <script>`, so a fetch blocks for as long as the script does.
pub fn stall_origin(repo_path: &Path, script: &str) -> Result<()> {
    git(repo_path, &["config", "protocol.ext.allow", "always"])?;
    let url = format!("ext::sh -c {}", script.replace('%', "%%").replace(' ', "% "));
    git(repo_path, &["remote", "set-url", "origin", &url])?;
    Ok(())
}

/// Live (non-zombie) processes with `needle` among their arguments.
#[cfg(target_os = "linux")]
pub fn live_processes_with_arg(needle: &str) -> Vec<u32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            let Ok(cmdline) = fs::read(format!("/proc/{pid}/cmdline")) else {
                return false;
            };
            let matches = cmdline
                .split(|b| *b == 0)
                .any(|arg| String::from_utf8_lossy(arg).contains(needle));
            matches && !is_zombie(*pid)
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.trim_start().chars().next()
        })
        .is_none_or(|state| state == 'Z' || state == 'X')
}

/// Wait up to `limit` for every process carrying `needle` to disappear.
#[cfg(target_os = "linux")]
pub fn wait_for_no_processes_with_arg(needle: &str, limit: std::time::Duration) -> Vec<u32> {
    let deadline = std::time::Instant::now() + limit;
    loop {
        let live = live_processes_with_arg(needle);
        if live.is_empty() || std::time::Instant::now() >= deadline {
            return live;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
}
