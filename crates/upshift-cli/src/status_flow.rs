use anyhow::Result;
use upshift_core::CommandOutcome;
use upshift_installer::{resolve_move_set, InstallLayout, StageMode, StagingEngine};

use crate::config::ToolConfig;
use crate::report::StatusReport;

/// Read-only view of the install: version, lock, and the suffix state of
/// every entry of the effective move set.
pub(crate) fn run_status(layout: &InstallLayout, config: &ToolConfig) -> Result<StatusReport> {
    let move_set = resolve_move_set(layout, &config.move_set)?;
    let engine = StagingEngine::new(layout.root(), &move_set, StageMode::InPlace);
    let entries = engine.inspect();

    let mut warnings = Vec::new();
    let (outcome, installed_version) = match layout.installed_version() {
        Ok(version) => (CommandOutcome::Success, Some(version.to_string())),
        Err(err) => {
            warnings.push(format!("installed version could not be read: {err:#}"));
            (CommandOutcome::Warning, None)
        }
    };

    let summary = if entries.iter().any(|entry| entry.staged) {
        "a staged upgrade is waiting; run apply-staged to activate it"
    } else if entries.iter().any(|entry| entry.backup) {
        "the previous installation is kept as backup; rollback-server restores it"
    } else {
        "no upgrade in progress"
    };

    Ok(StatusReport {
        outcome,
        summary: summary.to_string(),
        install_root: layout.root().display().to_string(),
        installed_version,
        lock_held: layout.lock_path().exists(),
        entries,
        warnings,
    })
}
