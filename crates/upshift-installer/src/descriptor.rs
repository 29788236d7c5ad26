use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::PathBuf;
use upshift_core::{HostPlatform, MoveSet};

use crate::InstallLayout;

pub fn write_move_set_descriptor(
    layout: &InstallLayout,
    move_set: &MoveSet,
    platform: HostPlatform,
) -> Result<PathBuf> {
    let path = layout.move_set_descriptor_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let content = format!(
        "# Paths replaced by the last upgrade; read by rollback and staged-apply\n{}",
        move_set.to_descriptor(platform.path_separator())
    );
    let part_path = path.with_extension("properties.part");
    fs::write(&part_path, content)
        .with_context(|| format!("failed to write move-set descriptor: {}", part_path.display()))?;
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("failed to replace move-set descriptor: {}", path.display()))?;
    }
    fs::rename(&part_path, &path).with_context(|| {
        format!(
            "failed to move move-set descriptor into place: {}",
            path.display()
        )
    })?;
    Ok(path)
}

pub fn read_move_set_descriptor(layout: &InstallLayout) -> Result<Option<MoveSet>> {
    let path = layout.move_set_descriptor_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read move-set descriptor: {}", path.display())
            });
        }
    };

    let move_set = MoveSet::parse_descriptor(&raw)
        .with_context(|| format!("failed parsing move-set descriptor: {}", path.display()))?;
    Ok(Some(move_set))
}

/// The move set a follow-up command (rollback, staged apply) must use:
/// the persisted descriptor when one exists, else `fallback`.
pub fn resolve_move_set(layout: &InstallLayout, fallback: &MoveSet) -> Result<MoveSet> {
    Ok(read_move_set_descriptor(layout)?.unwrap_or_else(|| fallback.clone()))
}
