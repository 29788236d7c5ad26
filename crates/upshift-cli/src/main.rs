mod completion;
mod config;
mod fetch;
mod node_flows;
mod render;
mod report;
mod rollback_flow;
mod status_flow;
mod upgrade_flow;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use clap_complete::Shell;
use tracing::{error, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use upshift_core::{CommandOutcome, Distribution, HostPlatform};
use upshift_installer::{break_install_lock, default_install_root, InstallLayout};
use upshift_nodes::{AdminScriptDomainStore, DomainConfigStore, ProcessExecutor, RemoteDispatcher};

use crate::completion::write_completions_script;
use crate::config::ToolConfig;
use crate::fetch::{resolve_credentials, HttpDistributionSource};
use crate::node_flows::{run_apply_staged, run_upgrade_nodes};
use crate::render::{
    render_report_lines, render_status_line, render_status_report_lines, TerminalRenderer,
};
use crate::report::FlowReport;
use crate::rollback_flow::run_rollback;
use crate::status_flow::run_status;
use crate::upgrade_flow::{run_upgrade, UpgradeRequest};

const LOG_ENV: &str = "UPSHIFT_LOG";

#[derive(Parser, Debug)]
#[command(name = "upshift")]
#[command(about = "Upgrade, stage and roll back an application server install", long_about = None)]
struct Cli {
    /// Server install root (the `glassfish` directory); defaults to $AS_INSTALL.
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,
    /// Domains directory; defaults to `<install-root>/domains`.
    #[arg(long, global = true)]
    domaindir: Option<PathBuf>,
    /// Tool configuration; defaults to `<install-root>/config/upgrade-tool.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Print the final report as JSON.
    #[arg(long, global = true)]
    json: bool,
    /// Remove a lock left behind by a killed run before starting.
    #[arg(long, global = true)]
    break_lock: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a newer release and install it in place, or stage it with --stage.
    UpgradeServer {
        #[arg(long)]
        version: String,
        #[arg(long, default_value = "payara", value_parser = parse_distribution)]
        distribution: Distribution,
        /// Write the new release next to the current one (`.new`) instead of replacing it.
        #[arg(long)]
        stage: bool,
        /// Use a distribution zip that was already downloaded.
        #[arg(long, value_name = "ZIP")]
        use_downloaded: Option<PathBuf>,
        #[arg(long)]
        username: Option<String>,
        /// File whose first line is the repository password.
        #[arg(long)]
        password_file: Option<PathBuf>,
        #[arg(long)]
        repository_url: Option<String>,
    },
    /// Restore the installation kept as backup by the last upgrade.
    RollbackServer,
    /// Reinstall every SSH node from the local installation.
    UpgradeNodes {
        #[arg(long)]
        rollback: bool,
    },
    /// Activate an upgrade staged with `upgrade-server --stage`.
    ApplyStaged,
    Status,
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_distribution(value: &str) -> Result<Distribution, String> {
    Distribution::parse(value).ok_or_else(|| {
        let accepted = Distribution::ALL
            .iter()
            .map(|distribution| distribution.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown distribution '{value}' (expected one of: {accepted})")
    })
}

/// Collaborators shared by the mutating commands.
pub(crate) struct FlowContext<'a> {
    pub(crate) layout: &'a InstallLayout,
    pub(crate) config: &'a ToolConfig,
    pub(crate) store: &'a dyn DomainConfigStore,
    pub(crate) dispatcher: &'a RemoteDispatcher<'a>,
    pub(crate) platform: HostPlatform,
}

impl FlowContext<'_> {
    /// Reinstalls the SSH nodes and folds the result into `report`. Node
    /// problems never fail the command; they downgrade it to a warning.
    pub(crate) fn propagate_into(
        &self,
        report: &mut FlowReport,
        archive: Option<&Path>,
        remediation: &str,
    ) {
        match self.dispatcher.propagate(self.store, archive) {
            Ok(nodes) => report.record_nodes(nodes, remediation),
            Err(err) => {
                warn!(error = format!("{err:#}"), "could not read node configuration");
                report.warn(format!("nodes were not updated: {err:#}"));
                report.remediation = Some(remediation.to_string());
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    let outcome = match run_cli(cli) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("{err:#}");
            if json {
                let report = serde_json::json!({
                    "outcome": CommandOutcome::Error,
                    "error": format!("{err:#}"),
                });
                println!("{report}");
            } else {
                let style = TerminalRenderer::current().style();
                eprintln!(
                    "{}",
                    render_status_line(style, CommandOutcome::Error, &format!("{err:#}"))
                );
            }
            CommandOutcome::Error
        }
    };
    ExitCode::from(u8::try_from(outcome.exit_code()).unwrap_or(1))
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_cli(cli: Cli) -> Result<CommandOutcome> {
    if let Commands::Completions { shell } = cli.command {
        write_completions_script(shell, &mut std::io::stdout().lock())?;
        return Ok(CommandOutcome::Success);
    }

    let platform = HostPlatform::current();
    let root = match cli.install_root {
        Some(root) => root,
        None => default_install_root()?,
    };
    let mut layout = InstallLayout::new(root);
    if let Some(domains_dir) = cli.domaindir {
        layout = layout.with_domains_dir(domains_dir);
    }
    layout.ensure_exists()?;

    let mut config = ToolConfig::load(&layout, cli.config.as_deref(), platform)?;
    if let Commands::UpgradeServer {
        repository_url: Some(url),
        ..
    } = &cli.command
    {
        config.repository_url = url.clone();
    }

    if cli.break_lock {
        break_install_lock(&layout)?;
    }

    let renderer = TerminalRenderer::current();
    if let Commands::Status = cli.command {
        let report = run_status(&layout, &config)?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status")?
            );
        } else {
            renderer.print_lines(&render_status_report_lines(renderer.style(), &report));
        }
        return Ok(report.outcome);
    }

    let executor = ProcessExecutor::from_log_level();
    let store = AdminScriptDomainStore::new(
        &config.admin_script,
        layout.domains_dir(),
        layout.product_root(),
        &executor,
    )
    .with_timeout(config.remote_timeout);
    let dispatcher = RemoteDispatcher::new(&executor, &config.admin_script)
        .with_timeout(config.remote_timeout)
        .with_failure_marker(config.failure_marker.clone());
    let context = FlowContext {
        layout: &layout,
        config: &config,
        store: &store,
        dispatcher: &dispatcher,
        platform,
    };

    let report = match cli.command {
        Commands::UpgradeServer {
            version,
            distribution,
            stage,
            use_downloaded,
            username,
            password_file,
            repository_url: _,
        } => {
            let credentials = if use_downloaded.is_some() {
                None
            } else {
                resolve_credentials(username.as_deref(), password_file.as_deref())?
            };
            let source = HttpDistributionSource::new(credentials, renderer)?;
            let request = UpgradeRequest {
                version,
                distribution,
                stage,
                use_downloaded,
            };
            run_upgrade(&request, &context, &source)?
        }
        Commands::RollbackServer => run_rollback(&context)?,
        Commands::UpgradeNodes { rollback } => run_upgrade_nodes(&context, rollback)?,
        Commands::ApplyStaged => run_apply_staged(&context)?,
        Commands::Status | Commands::Completions { .. } => return Ok(CommandOutcome::Success),
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        renderer.print_lines(&render_report_lines(renderer.style(), &report));
    }
    Ok(report.outcome)
}
