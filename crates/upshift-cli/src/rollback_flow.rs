use anyhow::{anyhow, Result};
use tracing::{info, warn};
use upshift_installer::{resolve_move_set, InstallLock, StageMode, StagingEngine};

use crate::report::{FlowReport, ROLLBACK_NODES_REMEDIATION};
use crate::FlowContext;

/// Restores the `.old` trees of the last upgrade, then domain
/// configuration, then the SSH nodes. Only the file restore is fatal.
pub(crate) fn run_rollback(context: &FlowContext<'_>) -> Result<FlowReport> {
    let move_set = resolve_move_set(context.layout, &context.config.move_set)?;
    let lock = InstallLock::acquire(context.layout, "rollback-server")?;

    let mut engine = StagingEngine::new(context.layout.root(), &move_set, StageMode::InPlace);
    if !engine.has_backup() {
        return Err(anyhow!("No old version found to rollback"));
    }
    info!("rolling back server");
    let restored = engine.restore_from_backup()?;

    let mut report = FlowReport::success(
        "rollback-server",
        format!("restored {restored} entries from the previous installation"),
    );
    restore_domains(context, &mut report);

    info!("rolling back remote nodes");
    context.propagate_into(&mut report, None, ROLLBACK_NODES_REMEDIATION);

    lock.release()?;
    Ok(report)
}

fn restore_domains(context: &FlowContext<'_>, report: &mut FlowReport) {
    let domains = match context.store.list_domains() {
        Ok(domains) => domains,
        Err(err) => {
            warn!(error = format!("{err:#}"), "could not list domains to restore");
            report.warn(format!("domain configuration was not restored: {err:#}"));
            return;
        }
    };
    for domain in domains {
        if let Err(err) = context.store.restore_domain(&domain) {
            warn!(
                domain = %domain.name,
                error = format!("{err:#}"),
                "failed to restore domain configuration"
            );
            report.warn(format!(
                "domain '{}' configuration was not restored; run restore-domain manually: {err:#}",
                domain.name
            ));
        }
    }
}
