use anyhow::Result;
use serde::Serialize;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::model::{NodeDescriptor, Secret};
use crate::registry::collect_domain_nodes;
use crate::store::DomainConfigStore;

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_millis(300_000);
/// Printed by the admin script when a remote install fails, even in
/// cases where it still exits successfully.
pub const DEFAULT_FAILURE_MARKER: &str = "Command install-node-ssh failed";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ECHO_TARGET: &str = "upshift::remote";

/// One invocation of the admin script. Secrets travel in `stdin_lines`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin_lines: Vec<Secret>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to start {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} did not finish within {timeout_ms} ms and was killed")]
    Timeout { program: String, timeout_ms: u128 },

    #[error("I/O error while running admin command: {0}")]
    Io(#[from] io::Error),
}

pub trait CommandExecutor {
    fn execute(&self, command: &AdminCommand) -> Result<CommandOutput, DispatchError>;
}

/// Builds the `install-node-ssh` invocation that reinstalls one SSH node.
/// `archive` is only passed on when it can be opened for reading.
pub fn build_remote_install_command(
    admin_script: &Path,
    node: &NodeDescriptor,
    archive: Option<&Path>,
    timeout: Duration,
) -> AdminCommand {
    let mut args = vec![
        "--interactive=false".to_string(),
        "--passwordfile".to_string(),
        "-".to_string(),
        "install-node-ssh".to_string(),
        "--installdir".to_string(),
        node.install_dir.clone(),
        "--force".to_string(),
        "--sshport".to_string(),
        node.ssh_port.clone(),
        "--sshuser".to_string(),
        node.ssh_user.clone(),
    ];
    if let Some(key_file) = &node.ssh_key_file {
        args.push("--sshkeyfile".to_string());
        args.push(key_file.clone());
    }
    if let Some(archive) = archive.filter(|path| is_readable_file(path)) {
        args.push("--archive".to_string());
        args.push(archive.display().to_string());
    }
    args.push(node.host.clone());

    let mut stdin_lines = Vec::new();
    if let Some(password) = &node.ssh_password {
        stdin_lines.push(Secret::new(format!(
            "AS_ADMIN_SSHPASSWORD={}",
            password.expose()
        )));
    }
    if let Some(passphrase) = &node.ssh_key_passphrase {
        stdin_lines.push(Secret::new(format!(
            "AS_ADMIN_SSHKEYPASSPHRASE={}",
            passphrase.expose()
        )));
    }

    AdminCommand {
        program: admin_script.to_path_buf(),
        args,
        stdin_lines,
        timeout,
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}

/// Runs commands as child processes, bounded by each command's timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor {
    echo: bool,
}

impl ProcessExecutor {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }

    /// Echoes child output only when debug logging is on for the remote target.
    pub fn from_log_level() -> Self {
        Self::new(tracing::enabled!(target: ECHO_TARGET, tracing::Level::DEBUG))
    }
}

impl CommandExecutor for ProcessExecutor {
    fn execute(&self, command: &AdminCommand) -> Result<CommandOutput, DispatchError> {
        let program = command.program.display().to_string();
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                program: program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading its input closes the pipe early.
            if let Err(err) = write_stdin_lines(&mut stdin, &command.stdin_lines) {
                if err.kind() != io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(err.into());
                }
            }
        }

        let stdout = spawn_reader(child.stdout.take(), "stdout", self.echo);
        let stderr = spawn_reader(child.stderr.take(), "stderr", self.echo);

        let deadline = Instant::now() + command.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(err.into());
                }
            }
            if Instant::now() >= deadline {
                if let Err(err) = child.kill() {
                    warn!(program = %program, error = %err, "failed to kill timed out command");
                }
                let _ = child.wait();
                return Err(DispatchError::Timeout {
                    program,
                    timeout_ms: command.timeout.as_millis(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(CommandOutput {
            status: status.code(),
            success: status.success(),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        })
    }
}

fn write_stdin_lines(stdin: &mut impl Write, lines: &[Secret]) -> io::Result<()> {
    for line in lines {
        writeln!(stdin, "{}", line.expose())?;
    }
    stdin.flush()
}

fn spawn_reader<R>(stream: Option<R>, name: &'static str, echo: bool) -> Option<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    stream.map(|stream| {
        thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut collected = String::new();
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(stream = name, error = %err, "stopped reading command output");
                        break;
                    }
                }
                // Output in a non-UTF-8 locale must still be scanned for the failure marker.
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\n', '\r']);
                if echo {
                    debug!(target: ECHO_TARGET, stream = name, "{line}");
                }
                collected.push_str(line);
                collected.push('\n');
            }
            collected
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default()
}

/// Outcome of pushing the local install out to every SSH node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub attempted: Vec<String>,
    pub failed: Vec<String>,
    /// Non-SSH nodes that must be upgraded by hand.
    pub skipped: Vec<String>,
}

impl PropagationReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Reinstalls SSH nodes from the local install, one node at a time.
pub struct RemoteDispatcher<'a> {
    executor: &'a dyn CommandExecutor,
    admin_script: PathBuf,
    timeout: Duration,
    failure_marker: String,
}

impl<'a> RemoteDispatcher<'a> {
    pub fn new(executor: &'a dyn CommandExecutor, admin_script: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            admin_script: admin_script.into(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
            failure_marker: DEFAULT_FAILURE_MARKER.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failure_marker(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = marker.into();
        self
    }

    /// Reinstalls one node. Any spawn error, timeout, non-zero exit or
    /// failure marker in the output counts as a failure; there is no retry.
    pub fn run_remote_install(&self, node: &NodeDescriptor, archive: Option<&Path>) -> bool {
        info!(
            node = %node.name,
            host = %node.host,
            install_dir = %node.install_dir,
            "reinstalling SSH node"
        );
        let command =
            build_remote_install_command(&self.admin_script, node, archive, self.timeout);

        let output = match self.executor.execute(&command) {
            Ok(output) => output,
            Err(err) => {
                error!(node = %node.name, error = %err, "error while executing command");
                return false;
            }
        };
        if !output.success {
            error!(
                node = %node.name,
                status = ?output.status,
                "install-node-ssh exited with failure"
            );
            return false;
        }
        if output.stdout.contains(&self.failure_marker)
            || output.stderr.contains(&self.failure_marker)
        {
            error!(node = %node.name, "install-node-ssh reported failure");
            return false;
        }
        debug!(node = %node.name, "node reinstalled");
        true
    }

    /// Visits every SSH node of every domain in order. Failing nodes are
    /// recorded and never stop the remaining nodes; only a failure to read
    /// domain configuration is returned as an error.
    pub fn propagate(
        &self,
        store: &dyn DomainConfigStore,
        archive: Option<&Path>,
    ) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        for domain_nodes in collect_domain_nodes(store)? {
            info!(
                domain = %domain_nodes.domain.name,
                nodes = domain_nodes.nodes.len(),
                "reinstalling nodes for domain"
            );
            report.skipped.extend(domain_nodes.skipped);
            for node in &domain_nodes.nodes {
                report.attempted.push(node.name.clone());
                if !self.run_remote_install(node, archive) {
                    report.failed.push(node.name.clone());
                }
            }
        }

        if !report.is_success() {
            warn!(failed = %report.failed.join(", "), "error reinstalling nodes");
        }
        Ok(report)
    }
}
