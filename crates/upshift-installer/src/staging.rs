use anyhow::{anyhow, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use upshift_core::{HostPlatform, MoveEntry, MoveSet, SuffixVariant};

use crate::permissions;
use crate::tree::{copy_tree, delete_tree, move_tree, path_exists, rename_entry, tolerate_nothing};

/// Where `populate` writes the new distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageMode {
    /// Back up `current` to `.old`, then overwrite `current`.
    InPlace,
    /// Leave `current` alone and write `.new` next to it.
    Staged,
}

impl StageMode {
    pub fn target_variant(self) -> SuffixVariant {
        match self {
            Self::InPlace => SuffixVariant::Current,
            Self::Staged => SuffixVariant::Staged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryState {
    /// Untouched by this run.
    Current,
    /// Nothing on disk for this entry and nothing to install.
    Absent,
    BackedUp,
    Staged,
    Applied,
    Restored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub entry: MoveEntry,
    pub state: EntryState,
    /// `current` was renamed to `.old` during this run.
    pub backed_up: bool,
    /// `populate` started writing this entry's destination.
    pub populated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalOutcome {
    Applied,
    Staged,
    Restored,
    Partial,
}

/// On-disk presence of each suffix variant of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub entry: String,
    pub current: bool,
    pub backup: bool,
    pub staged: bool,
}

impl EntryStatus {
    pub fn is_missing(&self) -> bool {
        !self.current && !self.backup
    }
}

/// Drives the per-entry backup/populate/swap steps for one install root,
/// always walking the move set in its declared order, and keeps a ledger
/// of what was touched so a failed run can be unwound.
pub struct StagingEngine<'a> {
    root: &'a Path,
    move_set: &'a MoveSet,
    mode: StageMode,
    records: Vec<EntryRecord>,
}

impl<'a> StagingEngine<'a> {
    pub fn new(root: &'a Path, move_set: &'a MoveSet, mode: StageMode) -> Self {
        let records = move_set
            .iter()
            .map(|entry| EntryRecord {
                entry: entry.clone(),
                state: EntryState::Current,
                backed_up: false,
                populated: false,
            })
            .collect();
        Self {
            root,
            move_set,
            mode,
            records,
        }
    }

    pub fn mode(&self) -> StageMode {
        self.mode
    }

    pub fn records(&self) -> &[EntryRecord] {
        &self.records
    }

    fn path(&self, entry: &MoveEntry, variant: SuffixVariant) -> PathBuf {
        entry.resolve_variant(self.root, variant)
    }

    /// Removes `.new` and `.old` leftovers of an earlier run. Safe to call
    /// any number of times; returns how many trees were deleted.
    pub fn cleanup_prior_staged(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.move_set.iter() {
            for variant in [SuffixVariant::Staged, SuffixVariant::Backup] {
                let path = self.path(entry, variant);
                if !path_exists(&path) {
                    continue;
                }
                debug!(path = %path.display(), "deleting leftover from a previous run");
                delete_tree(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "cleaned up leftovers of a previous upgrade");
        }
        Ok(removed)
    }

    /// Renames every existing `current` entry to `.old`. Staged mode keeps
    /// `current` live, so this is a no-op there.
    pub fn backup(&mut self) -> Result<()> {
        if self.mode == StageMode::Staged {
            return Ok(());
        }

        info!("moving current installation to backup");
        for index in 0..self.records.len() {
            let entry = self.records[index].entry.clone();
            let current = self.path(&entry, SuffixVariant::Current);
            if !path_exists(&current) {
                debug!(entry = %entry, "nothing to back up");
                continue;
            }
            let old = self.path(&entry, SuffixVariant::Backup);
            rename_entry(&current, &old)?;
            let record = &mut self.records[index];
            record.backed_up = true;
            record.state = EntryState::BackedUp;
        }
        Ok(())
    }

    /// Copies each entry out of the extracted distribution rooted at
    /// `candidate_root`. Only the optional message-queue bundle may be
    /// missing from the candidate.
    pub fn populate(&mut self, candidate_root: &Path) -> Result<()> {
        let variant = self.mode.target_variant();
        info!(mode = ?self.mode, "installing new distribution files");

        for index in 0..self.records.len() {
            let entry = self.records[index].entry.clone();
            let source = entry.resolve(candidate_root);
            let target = self.path(&entry, variant);

            if !path_exists(&source) {
                if !entry.is_optional_bundle() {
                    return Err(anyhow!(
                        "new distribution is missing {}",
                        source.display()
                    ));
                }
                info!(entry = %entry, "not present in the new distribution; skipping");
                let record = &mut self.records[index];
                record.state = if record.backed_up {
                    EntryState::Applied
                } else {
                    EntryState::Absent
                };
                continue;
            }

            self.records[index].populated = true;
            let optional = entry.is_optional_bundle();
            let tolerate = |path: &Path| optional && path.starts_with(&source);
            let report = copy_tree(&source, &target, &tolerate)?;
            debug!(entry = %entry, files = report.files, "entry populated");

            self.records[index].state = match self.mode {
                StageMode::InPlace => EntryState::Applied,
                StageMode::Staged => EntryState::Staged,
            };
        }
        Ok(())
    }

    pub fn fix_permissions(&self, platform: HostPlatform) -> Result<u64> {
        permissions::fix_permissions(
            self.root,
            self.move_set,
            self.mode.target_variant(),
            platform,
        )
    }

    /// Puts the install back the way it was before this run. Keeps going
    /// past per-entry failures so as much as possible is restored; entries
    /// that could not be restored keep their state and make the terminal
    /// outcome `Partial`.
    pub fn rollback_on_failure(&mut self) -> Result<()> {
        warn!(mode = ?self.mode, "upgrade failed; restoring previous installation");
        let mut failures = Vec::new();

        for index in 0..self.records.len() {
            let record = self.records[index].clone();
            let result = match self.mode {
                StageMode::Staged => self.discard_staged(&record),
                StageMode::InPlace => self.restore_in_place(&record),
            };
            match result {
                Ok(Some(state)) => self.records[index].state = state,
                Ok(None) => {}
                Err(err) => {
                    error!(
                        entry = %record.entry,
                        error = format!("{err:#}"),
                        "failed to restore entry"
                    );
                    failures.push(record.entry.to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "failed to restore {} entries: {}",
                failures.len(),
                failures.join(", ")
            ))
        }
    }

    fn discard_staged(&self, record: &EntryRecord) -> Result<Option<EntryState>> {
        if !record.populated {
            return Ok(None);
        }
        delete_tree(&self.path(&record.entry, SuffixVariant::Staged))?;
        Ok(Some(EntryState::Restored))
    }

    fn restore_in_place(&self, record: &EntryRecord) -> Result<Option<EntryState>> {
        let current = self.path(&record.entry, SuffixVariant::Current);
        if record.backed_up {
            let old = self.path(&record.entry, SuffixVariant::Backup);
            delete_tree(&current)?;
            move_tree(&old, &current, &tolerate_nothing)?;
            delete_tree(&old)?;
            return Ok(Some(EntryState::Restored));
        }
        if record.populated {
            delete_tree(&current)?;
            return Ok(Some(EntryState::Restored));
        }
        Ok(None)
    }

    pub fn terminal_outcome(&self) -> TerminalOutcome {
        let states = self
            .records
            .iter()
            .map(|record| record.state)
            .filter(|state| *state != EntryState::Absent)
            .collect::<Vec<_>>();

        if states.iter().all(|state| *state == EntryState::Applied) {
            TerminalOutcome::Applied
        } else if states.iter().all(|state| *state == EntryState::Staged) {
            TerminalOutcome::Staged
        } else if states
            .iter()
            .all(|state| matches!(state, EntryState::Restored | EntryState::Current))
        {
            TerminalOutcome::Restored
        } else {
            TerminalOutcome::Partial
        }
    }

    /// Activates a staged upgrade: per entry `current -> .old` then
    /// `.new -> current`. A failed swap undoes the entries already swapped.
    /// Returns how many entries were activated.
    pub fn apply_staged(&mut self) -> Result<usize> {
        if !self.has_variant(SuffixVariant::Staged) {
            return Err(anyhow!(
                "no staged upgrade found under {}",
                self.root.display()
            ));
        }

        let mut swapped = Vec::new();
        for index in 0..self.records.len() {
            let entry = self.records[index].entry.clone();
            let staged = self.path(&entry, SuffixVariant::Staged);
            if !path_exists(&staged) {
                debug!(entry = %entry, "no staged copy; leaving current in place");
                continue;
            }

            if let Err(err) = self.swap_in(index) {
                error!(
                    entry = %entry,
                    error = format!("{err:#}"),
                    "failed to activate staged entry"
                );
                swapped.push(index);
                for undo in swapped.into_iter().rev() {
                    if let Err(undo_err) = self.swap_out(undo) {
                        error!(
                            entry = %self.records[undo].entry,
                            error = format!("{undo_err:#}"),
                            "failed to undo staged activation"
                        );
                    }
                }
                return Err(err);
            }
            swapped.push(index);
        }

        info!(entries = swapped.len(), "staged upgrade activated");
        Ok(swapped.len())
    }

    fn swap_in(&mut self, index: usize) -> Result<()> {
        let entry = self.records[index].entry.clone();
        let current = self.path(&entry, SuffixVariant::Current);
        let old = self.path(&entry, SuffixVariant::Backup);
        let staged = self.path(&entry, SuffixVariant::Staged);

        if path_exists(&current) {
            delete_tree(&old)?;
            rename_entry(&current, &old)?;
            let record = &mut self.records[index];
            record.backed_up = true;
            record.state = EntryState::BackedUp;
        }
        rename_entry(&staged, &current)?;
        self.records[index].state = EntryState::Applied;
        Ok(())
    }

    fn swap_out(&mut self, index: usize) -> Result<()> {
        let record = self.records[index].clone();
        let current = self.path(&record.entry, SuffixVariant::Current);
        let old = self.path(&record.entry, SuffixVariant::Backup);
        let staged = self.path(&record.entry, SuffixVariant::Staged);

        if record.state == EntryState::Applied {
            rename_entry(&current, &staged)?;
        }
        if record.backed_up && !path_exists(&current) {
            rename_entry(&old, &current)?;
        }
        let record = &mut self.records[index];
        record.backed_up = false;
        record.state = EntryState::Staged;
        Ok(())
    }

    /// Rollback path: brings every `.old` entry back as `current` and drops
    /// any staged `.new` trees. Returns how many entries were restored.
    pub fn restore_from_backup(&mut self) -> Result<usize> {
        if !self.has_backup() {
            return Err(anyhow!("No old version found to rollback"));
        }

        let mut restored = 0;
        for index in 0..self.records.len() {
            let entry = self.records[index].entry.clone();
            let old = self.path(&entry, SuffixVariant::Backup);
            if !path_exists(&old) {
                debug!(entry = %entry, "no backup for entry; leaving as is");
                continue;
            }
            let current = self.path(&entry, SuffixVariant::Current);
            let optional = entry.is_optional_bundle();
            let tolerate = |path: &Path| optional && path.starts_with(&old);

            delete_tree(&current)?;
            move_tree(&old, &current, &tolerate)?;
            delete_tree(&self.path(&entry, SuffixVariant::Staged))?;
            self.records[index].state = EntryState::Restored;
            restored += 1;
        }

        info!(restored, "previous installation restored");
        Ok(restored)
    }

    pub fn has_backup(&self) -> bool {
        self.has_variant(SuffixVariant::Backup)
    }

    pub fn has_staged(&self) -> bool {
        self.has_variant(SuffixVariant::Staged)
    }

    fn has_variant(&self, variant: SuffixVariant) -> bool {
        self.move_set
            .iter()
            .any(|entry| path_exists(&self.path(entry, variant)))
    }

    pub fn inspect(&self) -> Vec<EntryStatus> {
        self.move_set
            .iter()
            .map(|entry| EntryStatus {
                entry: entry.to_string(),
                current: path_exists(&self.path(entry, SuffixVariant::Current)),
                backup: path_exists(&self.path(entry, SuffixVariant::Backup)),
                staged: path_exists(&self.path(entry, SuffixVariant::Staged)),
            })
            .collect()
    }
}
