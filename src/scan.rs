use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::{DeclaredRepo, RepositoryDescriptor, is_work_tree};
use crate::error::MissingRoot;

/// Result of scanning every configured root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    /// Sorted by path, no duplicates
    pub descriptors: Vec<RepositoryDescriptor>,
    pub missing_roots: Vec<MissingRoot>,
}

/// Find working trees below `base_path`, at most `max_depth` levels down.
/// A working tree's own subdirectories are not searched.
pub fn find_repos<P: AsRef<Path>>(base_path: P, max_depth: usize) -> Result<Vec<RepositoryDescriptor>> {
    let mut repositories = Vec::new();
    let base_path = base_path.as_ref();

    let walker = WalkDir::new(base_path)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if !e.file_type().is_dir() || e.file_name() == ".git" {
                return false;
            }
            // Don't descend into a repository's contents
            match e.path().parent() {
                Some(parent) if e.depth() > 0 => !is_work_tree(parent),
                _ => true,
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e).with_context(|| format!("Failed to read {}", base_path.display()));
            }
            Err(e) => {
                warn!("skipping unreadable entry under {}: {}", base_path.display(), e);
                continue;
            }
        };

        if is_work_tree(entry.path()) {
            let repo_path = entry.path().to_path_buf();
            let name = display_name(&repo_path, base_path);
            debug!("found repository {}", repo_path.display());
            repositories.push(RepositoryDescriptor::present(repo_path, name));
        }
    }

    Ok(repositories)
}

/// Scan all roots and merge in declared repositories.
pub fn locate(roots: &[PathBuf], declared: &[DeclaredRepo], max_depth: usize) -> Discovery {
    let scanned: Vec<std::result::Result<Vec<RepositoryDescriptor>, MissingRoot>> =
        roots.par_iter().map(|root| scan_root(root, max_depth)).collect();

    let mut by_path: BTreeMap<PathBuf, RepositoryDescriptor> = BTreeMap::new();
    let mut missing_roots = Vec::new();

    for result in scanned {
        match result {
            Ok(repos) => {
                for repo in repos {
                    by_path.entry(repo.path.clone()).or_insert(repo);
                }
            }
            Err(missing) => {
                warn!("{}", missing);
                missing_roots.push(missing);
            }
        }
    }

    for decl in declared {
        match by_path.get_mut(&decl.path) {
            Some(existing) => {
                if existing.remote_url.is_none() {
                    existing.remote_url = decl.url.clone();
                }
            }
            None => {
                let name = roots
                    .iter()
                    .find(|root| decl.path.starts_with(root))
                    .map(|root| display_name(&decl.path, root))
                    .unwrap_or_else(|| file_name(&decl.path));
                let descriptor = RepositoryDescriptor::declared(decl.path.clone(), name, decl.url.clone());
                if descriptor.missing {
                    debug!("declared repository {} is missing", decl.path.display());
                }
                by_path.insert(decl.path.clone(), descriptor);
            }
        }
    }

    Discovery {
        descriptors: by_path.into_values().collect(),
        missing_roots,
    }
}

fn scan_root(root: &Path, max_depth: usize) -> std::result::Result<Vec<RepositoryDescriptor>, MissingRoot> {
    let missing = |reason: String| MissingRoot {
        path: root.to_path_buf(),
        reason,
    };
    if !root.exists() {
        return Err(missing("path does not exist".to_string()));
    }
    if !root.is_dir() {
        return Err(missing("not a directory".to_string()));
    }
    find_repos(root, max_depth).map_err(|e| missing(format!("{:#}", e)))
}

/// Path relative to the root it was found under, or the directory name
/// when the root is itself the repository.
fn display_name(repo_path: &Path, base_path: &Path) -> String {
    match repo_path.strip_prefix(base_path) {
        Ok(relative) if relative != Path::new("") => relative.to_string_lossy().to_string(),
        _ => file_name(repo_path),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
