use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use upshift_core::{parse_installed_version, HostPlatform, MoveEntry, ServerVersion, SuffixVariant};

/// Environment variable the server's own scripts use for the install root.
pub const INSTALL_ROOT_ENV: &str = "AS_INSTALL";

/// Paths inside one server install tree (the `glassfish` directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
    domains_dir: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let domains_dir = root.join("domains");
        Self { root, domains_dir }
    }

    pub fn with_domains_dir(mut self, domains_dir: impl Into<PathBuf>) -> Self {
        self.domains_dir = domains_dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the install root and its `../` siblings.
    pub fn product_root(&self) -> PathBuf {
        self.root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone())
    }

    pub fn domains_dir(&self) -> &Path {
        &self.domains_dir
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn version_properties_path(&self) -> PathBuf {
        self.config_dir()
            .join("branding")
            .join("glassfish-version.properties")
    }

    pub fn move_set_descriptor_path(&self) -> PathBuf {
        self.config_dir().join("upgrade-tool.properties")
    }

    pub fn tool_config_path(&self) -> PathBuf {
        self.config_dir().join("upgrade-tool.toml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.config_dir().join(".upgrade-tool.lock")
    }

    pub fn default_admin_script(&self, platform: HostPlatform) -> PathBuf {
        let name = if platform.is_windows() {
            "asadmin.bat"
        } else {
            "asadmin"
        };
        self.root.join("bin").join(name)
    }

    pub fn entry_path(&self, entry: &MoveEntry, variant: SuffixVariant) -> PathBuf {
        entry.resolve_variant(&self.root, variant)
    }

    pub fn installed_version(&self) -> Result<ServerVersion> {
        let path = self.version_properties_path();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read installed version: {}", path.display()))?;
        parse_installed_version(&raw)
            .with_context(|| format!("failed parsing installed version: {}", path.display()))
    }

    pub fn ensure_exists(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(anyhow!(
                "install root is not a directory: {}",
                self.root.display()
            ));
        }
        Ok(())
    }
}

pub fn default_install_root() -> Result<PathBuf> {
    let value = std::env::var(INSTALL_ROOT_ENV).with_context(|| {
        format!("{INSTALL_ROOT_ENV} is not set; pass --install-root to locate the server install")
    })?;
    Ok(PathBuf::from(value))
}

/// Creates a unique scratch directory under the system temp dir.
pub fn make_scratch_dir(prefix: &str) -> Result<PathBuf> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "upshift-{}-{}-{}",
        prefix,
        std::process::id(),
        nanos
    ));
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed creating scratch dir: {}", dir.display()))?;
    Ok(dir)
}
