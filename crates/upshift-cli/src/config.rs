use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use upshift_core::{HostPlatform, MoveSet};
use upshift_installer::InstallLayout;
use upshift_nodes::{DEFAULT_FAILURE_MARKER, DEFAULT_REMOTE_TIMEOUT};

pub const DEFAULT_REPOSITORY_URL: &str =
    "https://nexus.payara.fish/repository/payara-enterprise/fish/payara/distributions";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolConfigFile {
    #[serde(default = "config_file_version")]
    version: u32,
    repository_url: Option<String>,
    remote_timeout_ms: Option<u64>,
    admin_script: Option<PathBuf>,
    failure_marker: Option<String>,
    move_set: Option<Vec<String>>,
}

fn config_file_version() -> u32 {
    1
}

/// Effective settings for one invocation: file values over built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub repository_url: String,
    pub remote_timeout: Duration,
    pub admin_script: PathBuf,
    pub failure_marker: String,
    pub move_set: MoveSet,
}

impl ToolConfig {
    pub fn defaults(layout: &InstallLayout, platform: HostPlatform) -> Self {
        Self {
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            admin_script: layout.default_admin_script(platform),
            failure_marker: DEFAULT_FAILURE_MARKER.to_string(),
            move_set: MoveSet::builtin(),
        }
    }

    /// Loads `explicit` if given (it must exist), else the optional
    /// `config/upgrade-tool.toml` of the install.
    pub fn load(
        layout: &InstallLayout,
        explicit: Option<&Path>,
        platform: HostPlatform,
    ) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => layout.tool_config_path(),
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound && explicit.is_none() => {
                return Ok(Self::defaults(layout, platform));
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };
        Self::parse(&content, layout, platform)
            .with_context(|| format!("failed parsing config: {}", path.display()))
    }

    pub fn parse(content: &str, layout: &InstallLayout, platform: HostPlatform) -> Result<Self> {
        let file = toml::from_str::<ToolConfigFile>(content)?;
        let expected = config_file_version();
        if file.version != expected {
            anyhow::bail!(
                "unsupported config version {} (expected {expected})",
                file.version
            );
        }

        let mut config = Self::defaults(layout, platform);
        if let Some(url) = file.repository_url {
            config.repository_url = url;
        }
        if let Some(timeout_ms) = file.remote_timeout_ms {
            if timeout_ms == 0 {
                anyhow::bail!("remote_timeout_ms must be greater than zero");
            }
            config.remote_timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(script) = file.admin_script {
            config.admin_script = if script.is_absolute() {
                script
            } else {
                layout.root().join(script)
            };
        }
        if let Some(marker) = file.failure_marker {
            config.failure_marker = marker;
        }
        if let Some(entries) = file.move_set {
            config.move_set = MoveSet::from_entries(&entries).context("invalid move_set")?;
        }
        Ok(config)
    }
}
