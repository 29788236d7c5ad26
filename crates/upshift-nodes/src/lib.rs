mod dispatch;
mod model;
mod registry;
mod store;

pub use dispatch::{
    build_remote_install_command, AdminCommand, CommandExecutor, CommandOutput, DispatchError,
    ProcessExecutor, PropagationReport, RemoteDispatcher, DEFAULT_FAILURE_MARKER,
    DEFAULT_REMOTE_TIMEOUT,
};
pub use model::{DomainRecord, NodeDescriptor, Secret, SSH_NODE_TYPE};
pub use registry::{collect_domain_nodes, ssh_nodes, DomainNodes};
pub use store::{parse_domain_xml, AdminScriptDomainStore, DomainConfigStore};

#[cfg(test)]
mod tests;
