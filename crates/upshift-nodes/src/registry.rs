use anyhow::Result;
use tracing::warn;

use crate::model::{DomainRecord, NodeDescriptor};
use crate::store::DomainConfigStore;

/// The SSH nodes of one domain, plus the names of nodes left for manual upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainNodes {
    pub domain: DomainRecord,
    pub nodes: Vec<NodeDescriptor>,
    pub skipped: Vec<String>,
}

pub fn ssh_nodes(domain: &DomainRecord, nodes: Vec<NodeDescriptor>) -> Vec<NodeDescriptor> {
    nodes
        .into_iter()
        .filter(|node| {
            if node.is_ssh() {
                return true;
            }
            warn!(
                domain = %domain.name,
                "only SSH nodes are upgraded by this tool, upgrade node {} of type {} manually",
                node.name,
                node.node_type
            );
            false
        })
        .collect()
}

pub fn collect_domain_nodes(store: &dyn DomainConfigStore) -> Result<Vec<DomainNodes>> {
    let mut collected = Vec::new();
    for domain in store.list_domains()? {
        let nodes = store.parse_domain_nodes(&domain)?;
        let skipped = nodes
            .iter()
            .filter(|node| !node.is_ssh())
            .map(|node| node.name.clone())
            .collect();
        let nodes = ssh_nodes(&domain, nodes);
        collected.push(DomainNodes {
            domain,
            nodes,
            skipped,
        });
    }
    Ok(collected)
}
