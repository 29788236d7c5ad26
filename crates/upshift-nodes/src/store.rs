use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::dispatch::{AdminCommand, CommandExecutor, DEFAULT_REMOTE_TIMEOUT};
use crate::model::{DomainRecord, NodeDescriptor, Secret};

const PRODUCT_ROOT_TOKEN: &str = "${com.sun.aas.productRoot}";
const USER_NAME_TOKEN: &str = "${user.name}";
const DEFAULT_SSH_PORT: &str = "22";

/// Read/backup/restore access to the domains of one install.
pub trait DomainConfigStore {
    /// Domains in name order.
    fn list_domains(&self) -> Result<Vec<DomainRecord>>;
    fn parse_domain_nodes(&self, domain: &DomainRecord) -> Result<Vec<NodeDescriptor>>;
    fn backup_domain(&self, domain: &DomainRecord) -> Result<()>;
    fn restore_domain(&self, domain: &DomainRecord) -> Result<()>;
}

/// Reads `domain.xml` directly and delegates backup/restore to the
/// server's admin script.
pub struct AdminScriptDomainStore<'a> {
    admin_script: PathBuf,
    domains_dir: PathBuf,
    product_root: PathBuf,
    executor: &'a dyn CommandExecutor,
    timeout: Duration,
}

impl<'a> AdminScriptDomainStore<'a> {
    pub fn new(
        admin_script: impl Into<PathBuf>,
        domains_dir: impl Into<PathBuf>,
        product_root: impl Into<PathBuf>,
        executor: &'a dyn CommandExecutor,
    ) -> Self {
        Self {
            admin_script: admin_script.into(),
            domains_dir: domains_dir.into(),
            product_root: product_root.into(),
            executor,
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run_domain_command(&self, subcommand: &str, domain: &DomainRecord) -> Result<()> {
        let command = AdminCommand {
            program: self.admin_script.clone(),
            args: vec![
                "--interactive=false".to_string(),
                subcommand.to_string(),
                "--domaindir".to_string(),
                self.domains_dir.display().to_string(),
                domain.name.clone(),
            ],
            stdin_lines: Vec::new(),
            timeout: self.timeout,
        };
        let context_message = format!("{subcommand} for domain '{}'", domain.name);
        let output = self
            .executor
            .execute(&command)
            .with_context(|| format!("{context_message}: command failed to run"))?;
        if output.success {
            return Ok(());
        }
        Err(anyhow!(
            "{context_message}: status={} stdout='{}' stderr='{}'",
            output
                .status
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            output.stdout.trim(),
            output.stderr.trim()
        ))
    }
}

impl DomainConfigStore for AdminScriptDomainStore<'_> {
    fn list_domains(&self) -> Result<Vec<DomainRecord>> {
        let entries = match fs::read_dir(&self.domains_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %self.domains_dir.display(), "no domains directory");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read domains dir: {}", self.domains_dir.display())
                });
            }
        };

        let mut domains = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("failed to read domains dir: {}", self.domains_dir.display())
            })?;
            let record = DomainRecord {
                name: entry.file_name().to_string_lossy().into_owned(),
                dir: entry.path(),
            };
            if record.domain_xml_path().is_file() {
                domains.push(record);
            }
        }
        domains.sort();
        Ok(domains)
    }

    fn parse_domain_nodes(&self, domain: &DomainRecord) -> Result<Vec<NodeDescriptor>> {
        let path = domain.domain_xml_path();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read domain configuration: {}", path.display()))?;
        parse_domain_xml(&raw, &self.product_root)
            .with_context(|| format!("failed parsing domain configuration: {}", path.display()))
    }

    fn backup_domain(&self, domain: &DomainRecord) -> Result<()> {
        info!(domain = %domain.name, "backing up domain configuration");
        self.run_domain_command("backup-domain", domain)
    }

    fn restore_domain(&self, domain: &DomainRecord) -> Result<()> {
        info!(domain = %domain.name, "restoring domain configuration");
        self.run_domain_command("restore-domain", domain)
    }
}

/// Extracts `<domain><nodes><node>` entries, expanding the product-root
/// and user-name tokens the server writes into node attributes.
pub fn parse_domain_xml(raw: &str, product_root: &Path) -> Result<Vec<NodeDescriptor>> {
    let document = roxmltree::Document::parse(raw).context("invalid domain.xml")?;
    let Some(nodes) = document
        .root_element()
        .children()
        .find(|child| child.has_tag_name("nodes"))
    else {
        return Ok(Vec::new());
    };

    let product_root = product_root.display().to_string();
    let expand = |value: &str| expand_tokens(value, &product_root);

    let mut descriptors = Vec::new();
    for node in nodes.children().filter(|child| child.has_tag_name("node")) {
        let name = node
            .attribute("name")
            .ok_or_else(|| anyhow!("node element is missing its name attribute"))?;
        let connector = node
            .children()
            .find(|child| child.has_tag_name("ssh-connector"));
        let auth = connector.and_then(|connector| {
            connector
                .children()
                .find(|child| child.has_tag_name("ssh-auth"))
        });
        let auth_attribute = |key: &str| {
            auth.and_then(|auth| auth.attribute(key))
                .filter(|value| !value.is_empty())
        };

        descriptors.push(NodeDescriptor {
            name: name.to_string(),
            node_type: node.attribute("type").unwrap_or("CONFIG").to_string(),
            install_dir: expand(node.attribute("install-dir").unwrap_or(PRODUCT_ROOT_TOKEN)),
            host: node.attribute("node-host").unwrap_or_default().to_string(),
            ssh_port: connector
                .and_then(|connector| connector.attribute("ssh-port"))
                .unwrap_or(DEFAULT_SSH_PORT)
                .to_string(),
            ssh_user: expand(auth_attribute("user-name").unwrap_or(USER_NAME_TOKEN)),
            ssh_key_file: auth_attribute("key-file").map(expand),
            ssh_password: auth_attribute("password").map(Secret::new),
            ssh_key_passphrase: auth_attribute("key-passphrase").map(Secret::new),
        });
    }
    Ok(descriptors)
}

fn expand_tokens(value: &str, product_root: &str) -> String {
    let mut expanded = value.replace(PRODUCT_ROOT_TOKEN, product_root);
    if expanded.contains(USER_NAME_TOKEN) {
        if let Some(user) = current_user() {
            expanded = expanded.replace(USER_NAME_TOKEN, &user);
        }
    }
    expanded
}

fn current_user() -> Option<String> {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|value| !value.is_empty()))
}
