use anyhow::{Context, Result};
use tracing::info;
use upshift_core::SuffixVariant;
use upshift_installer::{fix_permissions, resolve_move_set, InstallLock, StageMode, StagingEngine};

use crate::report::{FlowReport, ROLLBACK_NODES_REMEDIATION, UPGRADE_NODES_REMEDIATION};
use crate::FlowContext;

/// Re-runs node propagation alone. Unreadable domain configuration is an
/// error; failed nodes are a warning.
pub(crate) fn run_upgrade_nodes(context: &FlowContext<'_>, rollback: bool) -> Result<FlowReport> {
    let (command, remediation, verb) = if rollback {
        ("upgrade-nodes --rollback", ROLLBACK_NODES_REMEDIATION, "rolled back")
    } else {
        ("upgrade-nodes", UPGRADE_NODES_REMEDIATION, "upgraded")
    };

    let nodes = context
        .dispatcher
        .propagate(context.store, None)
        .context("Error upgrading server nodes")?;
    let summary = if nodes.attempted.is_empty() {
        "no SSH nodes to update".to_string()
    } else {
        format!(
            "{} of {} SSH nodes {verb}",
            nodes.attempted.len() - nodes.failed.len(),
            nodes.attempted.len()
        )
    };
    let mut report = FlowReport::success(command, summary);
    report.record_nodes(nodes, remediation);
    Ok(report)
}

/// Activates a staged upgrade and pushes it to the SSH nodes.
pub(crate) fn run_apply_staged(context: &FlowContext<'_>) -> Result<FlowReport> {
    let move_set = resolve_move_set(context.layout, &context.config.move_set)?;
    let lock = InstallLock::acquire(context.layout, "apply-staged")?;

    let mut engine = StagingEngine::new(context.layout.root(), &move_set, StageMode::Staged);
    let activated = engine.apply_staged()?;
    fix_permissions(
        context.layout.root(),
        &move_set,
        SuffixVariant::Current,
        context.platform,
    )?;
    info!(activated, "staged upgrade applied");

    let mut report = FlowReport::success(
        "apply-staged",
        format!("activated {activated} staged entries"),
    );
    context.propagate_into(&mut report, None, UPGRADE_NODES_REMEDIATION);

    lock.release()?;
    Ok(report)
}
