use std::fmt;
use std::path::PathBuf;

/// Node type upgraded over SSH; every other type is reported and skipped.
pub const SSH_NODE_TYPE: &str = "SSH";

/// A domain directory under the install's domains dir.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DomainRecord {
    pub name: String,
    pub dir: PathBuf,
}

impl DomainRecord {
    pub fn domain_xml_path(&self) -> PathBuf {
        self.dir.join("config").join("domain.xml")
    }
}

/// A credential read from domain configuration. Only ever written to a
/// child's stdin; never formatted into logs or argument lists.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub name: String,
    pub node_type: String,
    pub install_dir: String,
    pub host: String,
    pub ssh_port: String,
    pub ssh_user: String,
    pub ssh_key_file: Option<String>,
    pub ssh_password: Option<Secret>,
    pub ssh_key_passphrase: Option<Secret>,
}

impl NodeDescriptor {
    pub fn is_ssh(&self) -> bool {
        self.node_type == SSH_NODE_TYPE
    }
}
