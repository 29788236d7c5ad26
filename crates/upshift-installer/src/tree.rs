use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Decides whether a source path that turned out to be missing may be
/// skipped instead of failing the whole walk.
pub type MissingSubtree<'a> = &'a dyn Fn(&Path) -> bool;

pub fn tolerate_nothing(_path: &Path) -> bool {
    false
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub files: u64,
    pub skipped: Vec<PathBuf>,
}

/// Recursively copies `source` (file or directory) onto `target`,
/// creating parents and overwriting existing files.
pub fn copy_tree(
    source: &Path,
    target: &Path,
    tolerate_missing: MissingSubtree<'_>,
) -> Result<CopyReport> {
    let mut report = CopyReport::default();
    copy_node(source, target, tolerate_missing, &mut report)?;
    Ok(report)
}

fn copy_node(
    source: &Path,
    target: &Path,
    tolerate_missing: MissingSubtree<'_>,
    report: &mut CopyReport,
) -> Result<()> {
    let metadata = match fs::symlink_metadata(source) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound && tolerate_missing(source) => {
            skip_missing(source, report);
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat {}", source.display()));
        }
    };

    if metadata.is_dir() {
        fs::create_dir_all(target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        let mut children = match fs::read_dir(source) {
            Ok(entries) => entries
                .collect::<io::Result<Vec<_>>>()
                .with_context(|| format!("failed to read {}", source.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound && tolerate_missing(source) => {
                skip_missing(source, report);
                return Ok(());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", source.display()));
            }
        };
        children.sort_by_key(|entry| entry.file_name());
        for child in children {
            copy_node(
                &child.path(),
                &target.join(child.file_name()),
                tolerate_missing,
                report,
            )?;
        }
        return Ok(());
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if fs::symlink_metadata(target).is_ok_and(|existing| existing.file_type().is_symlink()) {
        fs::remove_file(target)
            .with_context(|| format!("failed to replace symlink {}", target.display()))?;
    }

    #[cfg(unix)]
    if metadata.file_type().is_symlink() {
        let link = fs::read_link(source)
            .with_context(|| format!("failed to read symlink {}", source.display()))?;
        std::os::unix::fs::symlink(&link, target).with_context(|| {
            format!(
                "failed to create symlink {} -> {}",
                target.display(),
                link.display()
            )
        })?;
        report.files += 1;
        return Ok(());
    }

    match fs::copy(source, target) {
        Ok(_) => {
            report.files += 1;
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound && tolerate_missing(source) => {
            skip_missing(source, report);
            Ok(())
        }
        Err(err) => Err(err).with_context(|| {
            format!(
                "failed to copy {} to {}",
                source.display(),
                target.display()
            )
        }),
    }
}

fn skip_missing(source: &Path, report: &mut CopyReport) {
    debug!(path = %source.display(), "optional subtree is missing; skipping");
    report.skipped.push(source.to_path_buf());
}

/// Recursively deletes a file or directory. A path that does not exist,
/// or disappears mid-walk, is not an error.
pub fn delete_tree(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat {}", path.display()));
        }
    };

    if !metadata.is_dir() {
        return ignore_not_found(fs::remove_file(path))
            .with_context(|| format!("failed to delete {}", path.display()));
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    for entry in entries {
        match entry {
            Ok(entry) => delete_tree(&entry.path())?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        }
    }

    ignore_not_found(fs::remove_dir(path))
        .with_context(|| format!("failed to delete directory {}", path.display()))
}

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Copies `source` over `target` file by file, then deletes `source`.
pub fn move_tree(
    source: &Path,
    target: &Path,
    tolerate_missing: MissingSubtree<'_>,
) -> Result<CopyReport> {
    let report = copy_tree(source, target, tolerate_missing)?;
    delete_tree(source)?;
    Ok(report)
}

/// Atomically renames `source` to `target`. Both sit in the same
/// directory during swaps, so no cross-filesystem fallback is attempted;
/// a failed rename leaves both paths untouched. `target` must not exist.
pub fn rename_entry(source: &Path, target: &Path) -> Result<()> {
    if path_exists(target) {
        return Err(anyhow!(
            "refusing to move {} over existing {}",
            source.display(),
            target.display()
        ));
    }
    fs::rename(source, target).with_context(|| {
        format!(
            "failed to move {} to {}",
            source.display(),
            target.display()
        )
    })
}

/// True for files, directories and dangling symlinks alike.
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
