use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::InstallLayout;

/// Exclusive claim on an install tree for the duration of one mutating
/// command.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
    released: bool,
}

impl InstallLock {
    pub fn acquire(layout: &InstallLayout, operation: &str) -> Result<Self> {
        let path = layout.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = read_lock_holder(&path).unwrap_or_default();
                let detail = if holder.is_empty() {
                    String::new()
                } else {
                    format!(" (held by {holder})")
                };
                return Err(anyhow!(
                    "another upgrade-tool command is running against this install{detail}; if that process is gone, rerun with --break-lock or delete {}",
                    path.display()
                ));
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to claim install lock: {}", path.display()));
            }
        };

        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system time is before unix epoch")?
            .as_secs();
        file.write_all(
            format!(
                "pid={}\noperation={operation}\nstarted_at_unix={started}\n",
                std::process::id()
            )
            .as_bytes(),
        )
        .with_context(|| format!("failed to write install lock: {}", path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush install lock: {}", path.display()))?;

        debug!(path = %path.display(), operation, "install lock acquired");
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_lock_file(&self.path)
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = remove_lock_file(&self.path) {
            warn!(
                path = %self.path.display(),
                error = format!("{err:#}"),
                "failed to release install lock"
            );
        }
    }
}

/// Removes a lock left behind by a killed process.
pub fn break_install_lock(layout: &InstallLayout) -> Result<bool> {
    let path = layout.lock_path();
    if !path.exists() {
        return Ok(false);
    }
    let holder = read_lock_holder(&path).unwrap_or_default();
    warn!(path = %path.display(), holder = %holder, "breaking install lock");
    remove_lock_file(&path)?;
    Ok(true)
}

fn read_lock_holder(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read install lock: {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

fn remove_lock_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to release install lock: {}", path.display()))
        }
    }
}
