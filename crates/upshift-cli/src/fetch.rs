use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::render::TerminalRenderer;

pub(crate) const PASSWORD_ENV: &str = "UPSHIFT_REPOSITORY_PASSWORD";

/// Produces the distribution archive for an upgrade.
pub(crate) trait DistributionSource {
    fn fetch(&self, url: &str, destination: &Path) -> Result<()>;
}

#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub(crate) username: String,
    pub(crate) password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Resolves repository credentials. The password comes from the first
/// line of `password_file`, else from the environment, never from argv.
pub(crate) fn resolve_credentials(
    username: Option<&str>,
    password_file: Option<&Path>,
) -> Result<Option<Credentials>> {
    let password = match password_file {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read password file: {}", path.display()))?;
            Some(raw.lines().next().unwrap_or_default().trim_end().to_string())
        }
        None => std::env::var(PASSWORD_ENV).ok(),
    };

    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(Credentials {
            username: username.to_string(),
            password,
        })),
        (Some(username), None) => Err(anyhow!(
            "no repository password for user '{username}': pass --password-file or set {PASSWORD_ENV}"
        )),
        (None, Some(_)) if password_file.is_some() => {
            Err(anyhow!("--password-file requires --username"))
        }
        _ => Ok(None),
    }
}

/// Downloads over HTTP(S) with optional basic authentication.
pub(crate) struct HttpDistributionSource {
    client: reqwest::blocking::Client,
    credentials: Option<Credentials>,
    renderer: TerminalRenderer,
}

impl HttpDistributionSource {
    pub(crate) fn new(
        credentials: Option<Credentials>,
        renderer: TerminalRenderer,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            credentials,
            renderer,
        })
    }
}

impl DistributionSource for HttpDistributionSource {
    fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
        info!(url, "downloading distribution");
        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        let mut response = request
            .send()
            .with_context(|| format!("failed to connect to {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Error connecting to server: {status} for {url}"));
        }

        let part_path = part_path_for(destination);
        let total = response.content_length().unwrap_or(0);
        let mut progress = self.renderer.start_progress("download", total);
        let result = stream_to_file(&mut response, &part_path, &mut |written| {
            progress.set(written)
        });
        let written = match result {
            Ok(written) => written,
            Err(err) => {
                progress.finish_abandon();
                let _ = fs::remove_file(&part_path);
                return Err(err).with_context(|| format!("failed to download {url}"));
            }
        };
        progress.finish_success();

        if destination.exists() {
            fs::remove_file(destination).with_context(|| {
                format!("failed to replace {}", destination.display())
            })?;
        }
        fs::rename(&part_path, destination).with_context(|| {
            format!(
                "failed to move downloaded archive into place: {}",
                destination.display()
            )
        })?;
        debug!(bytes = written, path = %destination.display(), "distribution downloaded");
        Ok(())
    }
}

fn stream_to_file(
    reader: &mut dyn Read,
    path: &Path,
    on_progress: &mut dyn FnMut(u64),
) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut buffer = vec![0_u8; 64 * 1024];
    let mut written = 0_u64;
    loop {
        let read = reader.read(&mut buffer).context("failed reading response body")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .with_context(|| format!("failed to write {}", path.display()))?;
        written += read as u64;
        on_progress(written);
    }
    file.sync_all()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(written)
}

fn part_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        "{}.part",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("distribution.zip")
    ))
}
