use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::properties::{format_property, parse_properties};

/// Property key of the persisted move-set descriptor.
pub const UPGRADE_DIRS_PROPERTY: &str = "PAYARA_UPGRADE_DIRS";

/// Install-relative paths replaced by an upgrade, in processing order.
/// Entries starting with `../` live next to the install root.
const BUILTIN_ENTRIES: [&str; 13] = [
    "common",
    "config/branding",
    "h2db",
    "../h2db",
    "legal",
    "modules",
    "osgi",
    "lib",
    "../README.txt",
    "../LICENSE.txt",
    "../mq",
    "bin",
    "../bin",
];

const OPTIONAL_BUNDLE: &str = "../mq";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuffixVariant {
    Current,
    Backup,
    Staged,
}

impl SuffixVariant {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Current => "",
            Self::Backup => ".old",
            Self::Staged => ".new",
        }
    }
}

/// One forward-slash separated entry of a [`MoveSet`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MoveEntry(String);

impl MoveEntry {
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().replace('\\', "/");
        let mut parts = Vec::new();
        let mut seen_normal = false;
        for part in normalized.split('/') {
            match part {
                "" | "." => continue,
                ".." if seen_normal => {
                    return Err(anyhow!(
                        "invalid move entry '{raw}': '..' is only allowed as a leading component"
                    ));
                }
                ".." => parts.push(part),
                _ if part.contains(':') => {
                    return Err(anyhow!("invalid move entry '{raw}': must be a relative path"));
                }
                _ => {
                    seen_normal = true;
                    parts.push(part);
                }
            }
        }

        if !seen_normal {
            return Err(anyhow!("invalid move entry '{raw}': names no file or directory"));
        }
        if normalized.starts_with('/') {
            return Err(anyhow!("invalid move entry '{raw}': must be a relative path"));
        }

        Ok(Self(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component, e.g. `branding` for `config/branding`.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn is_optional_bundle(&self) -> bool {
        self.0 == OPTIONAL_BUNDLE || self.0.starts_with("../mq/")
    }

    /// Joins the entry onto `base` lexically; `..` removes one component.
    pub fn resolve(&self, base: &Path) -> PathBuf {
        let mut resolved = base.to_path_buf();
        for part in self.0.split('/') {
            if part == ".." {
                let popped = matches!(resolved.components().next_back(), Some(Component::Normal(_)))
                    && resolved.pop();
                if !popped {
                    resolved.push("..");
                }
            } else {
                resolved.push(part);
            }
        }
        resolved
    }

    pub fn resolve_variant(&self, base: &Path, variant: SuffixVariant) -> PathBuf {
        let current = self.resolve(base);
        if variant == SuffixVariant::Current {
            return current;
        }
        current.with_file_name(format!("{}{}", self.file_name(), variant.suffix()))
    }

    pub fn to_host_string(&self, separator: char) -> String {
        self.0.replace('/', &separator.to_string())
    }
}

impl fmt::Display for MoveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The ordered, duplicate-free set of subtrees an upgrade replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveSet {
    entries: Vec<MoveEntry>,
}

impl MoveSet {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_ENTRIES
                .iter()
                .map(|entry| MoveEntry((*entry).to_string()))
                .collect(),
        }
    }

    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut parsed = Vec::new();
        for raw in entries {
            let entry = MoveEntry::parse(raw.as_ref())?;
            if !seen.insert(entry.clone()) {
                return Err(anyhow!("duplicate move entry '{entry}'"));
            }
            parsed.push(entry);
        }
        if parsed.is_empty() {
            return Err(anyhow!("move set must name at least one entry"));
        }
        Ok(Self { entries: parsed })
    }

    pub fn entries(&self) -> &[MoveEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &MoveEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.iter().any(|existing| existing.as_str() == entry)
    }

    pub fn parse_descriptor(raw: &str) -> Result<Self> {
        let properties = parse_properties(raw);
        let value = properties
            .get(UPGRADE_DIRS_PROPERTY)
            .ok_or_else(|| anyhow!("move-set descriptor is missing {UPGRADE_DIRS_PROPERTY}"))?;
        Self::from_entries(
            value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty()),
        )
    }

    /// Serialises the set with `separator` between path components, so
    /// scripts on the same host can read the paths verbatim.
    pub fn to_descriptor(&self, separator: char) -> String {
        let joined = self
            .entries
            .iter()
            .map(|entry| entry.to_host_string(separator))
            .collect::<Vec<_>>()
            .join(",");
        format_property(UPGRADE_DIRS_PROPERTY, &joined)
    }
}
