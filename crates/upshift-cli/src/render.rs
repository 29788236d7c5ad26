use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use upshift_core::CommandOutcome;

use crate::report::{FlowReport, StatusReport};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    if no_color || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    /// `total` of zero means the size is unknown and a spinner is shown.
    pub(crate) fn start_progress(self, label: &str, total: u64) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = if total == 0 {
                ProgressBar::new_spinner()
            } else {
                ProgressBar::new(total)
            };
            let template = if total == 0 {
                "{spinner:.cyan.bold} {msg:<10} {bytes} {elapsed_precise}"
            } else {
                "{spinner:.cyan.bold} {msg:<10} [{bar:24.cyan/blue}] {bytes}/{total_bytes} {elapsed_precise}"
            };
            if let Ok(style) = ProgressStyle::with_template(template) {
                progress_bar.set_style(style.progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }
}

impl TerminalProgress {
    pub(crate) fn set(&mut self, current: u64) {
        self.current = current;
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_position(current);
        }
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            self.started_at.elapsed(),
        ) {
            println!("{line}");
        }
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn outcome_style(outcome: CommandOutcome) -> Style {
    let color = match outcome {
        CommandOutcome::Success => AnsiColor::BrightGreen,
        CommandOutcome::Warning => AnsiColor::BrightYellow,
        CommandOutcome::Error => AnsiColor::BrightRed,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Duration,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }
    let size = if total == 0 {
        HumanBytes(current).to_string()
    } else {
        format!("{}/{}", HumanBytes(current), HumanBytes(total))
    };
    Some(format!(
        "{} {} complete in {}",
        colorize(progress_label_style(), label),
        size,
        format_elapsed(elapsed)
    ))
}

pub(crate) fn render_status_line(
    style: OutputStyle,
    outcome: CommandOutcome,
    message: &str,
) -> String {
    let badge = format!("[{}]", outcome.as_str());
    match style {
        OutputStyle::Plain => format!("{badge} {message}"),
        OutputStyle::Rich => format!("{} {message}", colorize(outcome_style(outcome), &badge)),
    }
}

pub(crate) fn render_report_lines(style: OutputStyle, report: &FlowReport) -> Vec<String> {
    let mut lines = vec![render_status_line(style, report.outcome, &report.summary)];
    if let Some(nodes) = &report.nodes {
        if !nodes.attempted.is_empty() {
            let reinstalled = nodes.attempted.len() - nodes.failed.len();
            lines.push(format!("nodes reinstalled: {reinstalled}"));
        }
        if !nodes.failed.is_empty() {
            lines.push(format!("nodes failed: {}", nodes.failed.join(", ")));
        }
        if !nodes.skipped.is_empty() {
            lines.push(format!("nodes to upgrade manually: {}", nodes.skipped.join(", ")));
        }
    }
    lines.extend(report.warnings.iter().map(|warning| format!("warning: {warning}")));
    if let Some(remediation) = &report.remediation {
        lines.push(remediation.clone());
    }
    lines
}

pub(crate) fn render_status_report_lines(style: OutputStyle, report: &StatusReport) -> Vec<String> {
    let header = "install status";
    let mut lines = vec![match style {
        OutputStyle::Plain => header.to_string(),
        OutputStyle::Rich => colorize(section_style(), &format!("== {header} ==")),
    }];
    lines.push(format!("install root: {}", report.install_root));
    lines.push(format!(
        "installed version: {}",
        report.installed_version.as_deref().unwrap_or("unknown")
    ));
    if report.lock_held {
        lines.push("lock: held by another command".to_string());
    }
    for entry in &report.entries {
        let mut flags = Vec::new();
        if entry.backup {
            flags.push("backup");
        }
        if entry.staged {
            flags.push("staged");
        }
        if entry.is_missing() {
            flags.push("MISSING");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };
        lines.push(format!("- {}{}", entry.entry, flags));
    }
    lines.extend(report.warnings.iter().map(|warning| format!("warning: {warning}")));
    lines.push(render_status_line(style, report.outcome, &report.summary));
    lines
}
