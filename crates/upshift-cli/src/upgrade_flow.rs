use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};
use upshift_core::{prevent_version_downgrade, Distribution, HostPlatform, ServerVersion};
use upshift_installer::{
    delete_tree, extract_zip, locate_distribution_root, make_scratch_dir,
    write_move_set_descriptor, InstallLock, StageMode, StagingEngine, TerminalOutcome,
};

use crate::fetch::DistributionSource;
use crate::report::{FlowReport, UPGRADE_NODES_REMEDIATION};
use crate::FlowContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpgradeRequest {
    pub(crate) version: String,
    pub(crate) distribution: Distribution,
    pub(crate) stage: bool,
    pub(crate) use_downloaded: Option<PathBuf>,
}

/// Checks everything that can be rejected before touching the network or
/// the install tree. Returns the parsed target version.
pub(crate) fn validate_upgrade(
    request: &UpgradeRequest,
    context: &FlowContext<'_>,
) -> Result<ServerVersion> {
    if context.platform.is_windows() && !request.stage {
        return Err(anyhow!(
            "in-place upgrades are not supported on Windows; rerun with --stage and activate the staged upgrade with apply-staged"
        ));
    }
    let installed = context.layout.installed_version()?;
    let selected = prevent_version_downgrade(&installed, &request.version)?;
    if let Some(archive) = &request.use_downloaded {
        if !archive.is_file() {
            return Err(anyhow!(
                "downloaded archive does not exist: {}",
                archive.display()
            ));
        }
    }
    info!(
        installed = %installed,
        selected = %selected,
        distribution = request.distribution.as_str(),
        "upgrade validated"
    );
    Ok(selected)
}

pub(crate) fn run_upgrade(
    request: &UpgradeRequest,
    context: &FlowContext<'_>,
    source: &dyn DistributionSource,
) -> Result<FlowReport> {
    let selected = validate_upgrade(request, context)?;
    let lock = InstallLock::acquire(context.layout, "upgrade-server")?;
    let scratch = make_scratch_dir("upgrade")?;

    let result = upgrade_in_scratch(request, context, source, &selected, &scratch);

    if let Err(err) = delete_tree(&scratch) {
        warn!(
            path = %scratch.display(),
            error = format!("{err:#}"),
            "failed to remove scratch directory"
        );
    }
    lock.release()?;
    result
}

fn upgrade_in_scratch(
    request: &UpgradeRequest,
    context: &FlowContext<'_>,
    source: &dyn DistributionSource,
    selected: &ServerVersion,
    scratch: &Path,
) -> Result<FlowReport> {
    let archive = match &request.use_downloaded {
        Some(archive) => {
            info!(archive = %archive.display(), "using downloaded distribution");
            archive.clone()
        }
        None => {
            let url = request
                .distribution
                .download_url(&context.config.repository_url, selected);
            let archive = scratch.join(request.distribution.archive_file_name(selected));
            source.fetch(&url, &archive)?;
            archive
        }
    };

    let extracted = scratch.join("extracted");
    extract_zip(&archive, &extracted)?;
    let candidate = locate_distribution_root(&extracted)?;

    for domain in context.store.list_domains()? {
        context.store.backup_domain(&domain).with_context(|| {
            format!(
                "failed to back up domain '{}'; the installation was not changed",
                domain.name
            )
        })?;
    }

    let move_set = &context.config.move_set;
    write_move_set_descriptor(context.layout, move_set, context.platform)?;

    let mode = if request.stage {
        StageMode::Staged
    } else {
        StageMode::InPlace
    };
    let mut engine = StagingEngine::new(context.layout.root(), move_set, mode);
    engine.cleanup_prior_staged()?;

    if let Err(err) = stage_files(&mut engine, &candidate, context.platform) {
        error!(error = format!("{err:#}"), "error upgrading server");
        let rollback = engine.rollback_on_failure();
        let state = match (rollback, engine.terminal_outcome()) {
            (Ok(()), TerminalOutcome::Restored) => "the previous installation was restored",
            _ => "the previous installation could not be fully restored; run rollback-server",
        };
        return Err(err.context(format!("upgrade to {selected} failed and {state}")));
    }

    if request.stage {
        return Ok(FlowReport::success(
            "upgrade-server",
            format!("upgrade to {selected} staged; run apply-staged to activate it"),
        ));
    }

    let mut report =
        FlowReport::success("upgrade-server", format!("server upgraded to {selected}"));
    context.propagate_into(&mut report, Some(&archive), UPGRADE_NODES_REMEDIATION);
    Ok(report)
}

fn stage_files(
    engine: &mut StagingEngine<'_>,
    candidate: &Path,
    platform: HostPlatform,
) -> Result<()> {
    engine.backup()?;
    engine.populate(candidate)?;
    engine.fix_permissions(platform)?;
    Ok(())
}
