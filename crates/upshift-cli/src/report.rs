use serde::Serialize;
use upshift_core::CommandOutcome;
use upshift_installer::EntryStatus;
use upshift_nodes::PropagationReport;

pub(crate) const UPGRADE_NODES_REMEDIATION: &str = "Failed to upgrade all nodes: inspect the logs from this command for the reasons. You can rollback the server upgrade and all of its nodes using the rollback-server command, upgrade the nodes installs individually using the upgrade-server command on each node, or attempt to upgrade them all again using the upgrade-nodes command.";

pub(crate) const ROLLBACK_NODES_REMEDIATION: &str = "Failed to roll back all nodes: inspect the logs from this command for the reasons. You can roll back the nodes installs individually using the rollback-server command on each node, or attempt to roll them all back again using the upgrade-nodes --rollback command.";

/// Final result of a mutating command, printed as text or `--json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct FlowReport {
    pub(crate) command: &'static str,
    pub(crate) outcome: CommandOutcome,
    pub(crate) summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) nodes: Option<PropagationReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) remediation: Option<String>,
}

impl FlowReport {
    pub(crate) fn success(command: &'static str, summary: impl Into<String>) -> Self {
        Self {
            command,
            outcome: CommandOutcome::Success,
            summary: summary.into(),
            nodes: None,
            warnings: Vec::new(),
            remediation: None,
        }
    }

    pub(crate) fn warn(&mut self, warning: impl Into<String>) {
        self.outcome = self.outcome.worst(CommandOutcome::Warning);
        self.warnings.push(warning.into());
    }

    /// Folds a node propagation result in; any failed node downgrades the
    /// outcome to a warning carrying `remediation`.
    pub(crate) fn record_nodes(&mut self, nodes: PropagationReport, remediation: &str) {
        if !nodes.is_success() {
            self.outcome = self.outcome.worst(CommandOutcome::Warning);
            self.remediation = Some(remediation.to_string());
        }
        self.nodes = Some(nodes);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StatusReport {
    pub(crate) outcome: CommandOutcome,
    pub(crate) summary: String,
    pub(crate) install_root: String,
    pub(crate) installed_version: Option<String>,
    pub(crate) lock_held: bool,
    pub(crate) entries: Vec<EntryStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) warnings: Vec<String>,
}
