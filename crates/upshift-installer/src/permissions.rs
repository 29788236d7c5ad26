use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;
use upshift_core::{HostPlatform, MoveSet, SuffixVariant};

const EXECUTABLE_MODE: u32 = 0o755;
const ADMIN_SCRIPTS: [&str; 2] = ["nadmin", "nadmin.bat"];

/// Marks launcher scripts executable after files were copied out of a zip:
/// every file under a `bin` directory of a move entry, plus the `nadmin`
/// scripts in `lib`. Returns how many files were updated; no-op on Windows.
pub fn fix_permissions(
    root: &Path,
    move_set: &MoveSet,
    variant: SuffixVariant,
    platform: HostPlatform,
) -> Result<u64> {
    if platform.is_windows() {
        return Ok(0);
    }

    let mut updated = 0_u64;
    for entry in move_set.iter() {
        let path = entry.resolve_variant(root, variant);
        if !path.exists() {
            continue;
        }
        if entry.file_name() == "bin" {
            updated += mark_tree_executable(&path)?;
        } else if path.is_dir() {
            updated += mark_nested_bin_dirs(&path)?;
        }
    }

    if let Some(lib) = move_set.iter().find(|entry| entry.as_str() == "lib") {
        let lib = lib.resolve_variant(root, variant);
        for script in ADMIN_SCRIPTS {
            let path = lib.join(script);
            if path.is_file() {
                set_executable(&path)?;
                updated += 1;
            }
        }
    }

    debug!(updated, "executable permissions applied");
    Ok(updated)
}

fn mark_nested_bin_dirs(dir: &Path) -> Result<u64> {
    let mut updated = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        if entry.file_name() == "bin" {
            updated += mark_tree_executable(&path)?;
        } else {
            updated += mark_nested_bin_dirs(&path)?;
        }
    }
    Ok(updated)
}

fn mark_tree_executable(path: &Path) -> Result<u64> {
    let metadata =
        fs::symlink_metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    if metadata.is_file() {
        set_executable(path)?;
        return Ok(1);
    }
    if !metadata.is_dir() {
        return Ok(0);
    }

    let mut updated = 0;
    for entry in fs::read_dir(path).with_context(|| format!("failed to read {}", path.display()))? {
        updated += mark_tree_executable(&entry?.path())?;
    }
    Ok(updated)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(EXECUTABLE_MODE))
        .with_context(|| format!("failed to set executable mode on {}", path.display()))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    let _ = EXECUTABLE_MODE;
    Ok(())
}
