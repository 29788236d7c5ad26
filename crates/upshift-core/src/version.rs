use std::fmt;

use anyhow::{anyhow, Context};
use semver::Version;
use thiserror::Error;

use crate::properties::parse_properties;

/// A `major.minor.update` server release number.
///
/// Only plain numeric components are accepted; qualifiers such as
/// `-SNAPSHOT` or `-RC1` make a version malformed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion(Version);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionCheckError {
    #[error("Empty selected version")]
    Empty,
    #[error("Invalid selected version '{0}': expected three dot-separated numbers such as 5.24.0")]
    Malformed(String),
    #[error("It was selected the same version as the installed one ({0})")]
    SameVersion(ServerVersion),
    #[error("The version indicated is incorrect: {selected} is older than the installed {installed}")]
    Downgrade {
        selected: ServerVersion,
        installed: ServerVersion,
    },
}

impl ServerVersion {
    pub fn new(major: u64, minor: u64, update: u64) -> Self {
        Self(Version::new(major, minor, update))
    }

    pub fn parse(input: &str) -> Result<Self, VersionCheckError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionCheckError::Empty);
        }

        let components = trimmed.split('.').collect::<Vec<_>>();
        if components.len() != 3 {
            return Err(VersionCheckError::Malformed(trimmed.to_string()));
        }

        let mut numbers = [0_u64; 3];
        for (slot, component) in numbers.iter_mut().zip(&components) {
            *slot = parse_component(component)
                .ok_or_else(|| VersionCheckError::Malformed(trimmed.to_string()))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn update(&self) -> u64 {
        self.0.patch
    }

    pub fn as_semver(&self) -> &Version {
        &self.0
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.update())
    }
}

fn parse_component(component: &str) -> Option<u64> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    component.parse::<u64>().ok()
}

/// Rejects a selected version that is malformed, equal to, or older than
/// the installed one. Returns the parsed selection on success.
pub fn prevent_version_downgrade(
    installed: &ServerVersion,
    selected: &str,
) -> Result<ServerVersion, VersionCheckError> {
    let selected = ServerVersion::parse(selected)?;
    match selected.cmp(installed) {
        std::cmp::Ordering::Greater => Ok(selected),
        std::cmp::Ordering::Equal => Err(VersionCheckError::SameVersion(selected)),
        std::cmp::Ordering::Less => Err(VersionCheckError::Downgrade {
            selected,
            installed: installed.clone(),
        }),
    }
}

/// Reads the installed release from the branding properties shipped in
/// `config/branding/glassfish-version.properties`.
pub fn parse_installed_version(raw: &str) -> anyhow::Result<ServerVersion> {
    let properties = parse_properties(raw);
    let component = |key: &str| -> anyhow::Result<u64> {
        let value = properties
            .get(key)
            .ok_or_else(|| anyhow!("missing version property: {key}"))?;
        parse_component(value.trim())
            .with_context(|| format!("invalid numeric version property {key}='{value}'"))
    };

    Ok(ServerVersion::new(
        component("major_version")?,
        component("minor_version")?,
        component("update_version")?,
    ))
}
