use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files: u64,
    pub directories: u64,
}

/// Extracts a zip distribution into `dst`. Each file is streamed to a
/// sibling `.part` file and renamed into place once complete, so an
/// interrupted extraction never leaves a truncated file under its real name.
pub fn extract_zip(archive_path: &Path, dst: &Path) -> Result<ExtractReport> {
    info!(archive = %archive_path.display(), target = %dst.display(), "extracting distribution");
    let file = fs::File::open(archive_path)
        .with_context(|| format!("failed to open archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(io::BufReader::new(file))
        .with_context(|| format!("failed to read zip archive {}", archive_path.display()))?;
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;

    let mut report = ExtractReport::default();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read zip entry #{index}"))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| anyhow!("zip entry has an unsafe path: {}", entry.name()))?;
        let out_path = dst.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .with_context(|| format!("failed to create {}", out_path.display()))?;
            report.directories += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let part_path = part_path_for(&out_path);
        {
            let mut out = fs::File::create(&part_path)
                .with_context(|| format!("failed to create {}", part_path.display()))?;
            io::copy(&mut entry, &mut out)
                .with_context(|| format!("failed to extract {}", out_path.display()))?;
            out.sync_all()
                .with_context(|| format!("failed to flush {}", part_path.display()))?;
        }
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&part_path, fs::Permissions::from_mode(mode & 0o7777))
                .with_context(|| format!("failed to set mode on {}", part_path.display()))?;
        }
        if out_path.exists() {
            fs::remove_file(&out_path)
                .with_context(|| format!("failed to replace {}", out_path.display()))?;
        }
        fs::rename(&part_path, &out_path).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                part_path.display(),
                out_path.display()
            )
        })?;
        report.files += 1;
    }

    debug!(files = report.files, directories = report.directories, "extraction complete");
    Ok(report)
}

fn part_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "entry".to_string());
    path.with_file_name(format!("{name}.part"))
}

/// Finds the install root (`<top-level>/glassfish`) of an extracted
/// distribution. The archive must contain exactly one top-level folder.
pub fn locate_distribution_root(extracted: &Path) -> Result<PathBuf> {
    let mut top_level = Vec::new();
    for entry in
        fs::read_dir(extracted).with_context(|| format!("failed to read {}", extracted.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            top_level.push(entry.path());
        }
    }

    let top = match top_level.as_slice() {
        [single] => single.clone(),
        [] => {
            return Err(anyhow!(
                "extracted distribution has no top-level folder: {}",
                extracted.display()
            ))
        }
        _ => {
            return Err(anyhow!(
                "extracted distribution has {} top-level folders, expected one: {}",
                top_level.len(),
                extracted.display()
            ))
        }
    };

    let root = top.join("glassfish");
    if !root.is_dir() {
        return Err(anyhow!(
            "extracted distribution is missing its glassfish directory: {}",
            root.display()
        ));
    }
    Ok(root)
}
