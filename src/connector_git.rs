use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;

use crate::connector_fs;
use crate::models::ItemRecord;

/// Collect the files git tracks under each root (or the whole work tree).
///
/// Workflow:
/// 1. Run `git ls-files -z` from the project base, once per root.
/// 2. Drop listed paths that no longer exist on disk or live in the
///    framework directory.
/// 3. Stat the remaining files into `not_reviewed` records.
///
/// If any listing fails (git missing, not a repository), the whole scan falls
/// back to the filesystem strategy and says so in the log.
pub fn scan_git(base: &Path, roots: &[String], skip: &Path) -> Result<Vec<ItemRecord>> {
    scan_git_with(base, roots, skip, |_| {})
}

/// [`scan_git`] with a hook applied to every spawned `git` command.
fn scan_git_with(
    base: &Path,
    roots: &[String],
    skip: &Path,
    configure: impl Fn(&mut Command),
) -> Result<Vec<ItemRecord>> {
    let listed = match list_tracked_files(base, roots, &configure) {
        Ok(listed) => listed,
        Err(e) => {
            tracing::warn!(
                "Git not available ({:#}), falling back to filesystem strategy",
                e
            );
            return connector_fs::scan_filesystem(base, roots, skip);
        }
    };

    let mut items = Vec::new();
    for relative in listed {
        let path = base.join(&relative);
        if path.starts_with(skip) || !path.is_file() {
            continue;
        }
        items.push(connector_fs::file_to_item(&path, &relative)?);
    }
    Ok(items)
}

fn list_tracked_files(
    base: &Path,
    roots: &[String],
    configure: &impl Fn(&mut Command),
) -> Result<Vec<String>> {
    if roots.is_empty() {
        return git_ls_files(base, None, configure);
    }

    let mut files = Vec::new();
    for root in roots {
        files.extend(git_ls_files(base, Some(root), configure)?);
    }
    Ok(files)
}

fn git_ls_files(
    base: &Path,
    root: Option<&str>,
    configure: &impl Fn(&mut Command),
) -> Result<Vec<String>> {
    let mut cmd = Command::new("git");
    cmd.args(["ls-files", "-z"]).current_dir(base);
    if let Some(root) = root {
        cmd.arg("--").arg(root);
    }
    configure(&mut cmd);

    let output = cmd
        .output()
        .with_context(|| "Failed to execute 'git ls-files'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git ls-files failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .split('\0')
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect())
}
