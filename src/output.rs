//! Terminal output: colour policy and user-facing messages.
//!
//! Colours follow the NO_COLOR standard (https://no-color.org/) and the
//! CLICOLOR conventions:
//! - `NO_COLOR`: if set (to any value), disable colours
//! - `CLICOLOR`: if set to 0, disable colours
//! - `CLICOLOR_FORCE`: if set to non-zero, force colours even when not a TTY
//!
//! Otherwise colours are used only when stdout is a terminal.

use crate::catalog::ReleaseEntry;
use crate::error::PourError;
use crate::installer::{InstallError, InstallReport, InstallStatus};
use crate::selfcheck::InstalledStatus;
use colored::{Colorize, control};
use std::error::Error as _;

/// Colour decision for the given environment.
pub fn color_choice(lookup: impl Fn(&str) -> Option<String>, is_tty: bool) -> bool {
    // NO_COLOR takes precedence over everything
    if lookup("NO_COLOR").is_some() {
        return false;
    }
    if lookup("CLICOLOR_FORCE").is_some_and(|v| v != "0") {
        return true;
    }
    if lookup("CLICOLOR").is_some_and(|v| v == "0") {
        return false;
    }
    is_tty
}

/// Configure colour output for the whole program. Call early in `main`.
pub fn init_colors() {
    let is_tty = std::io::IsTerminal::is_terminal(&std::io::stdout());
    control::set_override(color_choice(|key| std::env::var(key).ok(), is_tty));
}

pub fn print_install_report(report: &InstallReport) {
    let path = report.binary.path.display().to_string();
    match report.status {
        InstallStatus::AlreadyInstalled => println!(
            "{} {} {} already installed at {} (checksum verified)",
            "✓".green(),
            report_name(report).bold(),
            report.binary.version.cyan(),
            path.dimmed()
        ),
        InstallStatus::Installed | InstallStatus::Replaced => {
            let verb = if report.status == InstallStatus::Replaced {
                "Replaced"
            } else {
                "Installed"
            };
            println!(
                "{} {} {} {} → {}",
                "✓".green(),
                verb,
                report_name(report).bold(),
                report.binary.version.cyan(),
                path
            );
            println!(
                "  ├ {} {}",
                "sha256".dimmed(),
                report.sha256.as_str().dimmed()
            );
            println!(
                "  └ {} {} in {} attempt(s)",
                "fetched".dimmed(),
                report.url.dimmed(),
                report.fetch_attempts
            );
        }
    }
}

fn report_name(report: &InstallReport) -> String {
    report
        .binary
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn print_entry(binary: &str, entry: &ReleaseEntry) {
    println!(
        "{} {} ({})",
        binary.bold(),
        entry.version.cyan(),
        entry.platform
    );
    println!("  url:    {}", entry.url);
    println!("  sha256: {}", entry.sha256);
}

pub fn print_versions(binary: &str, versions: &[&str], latest: Option<&str>) {
    if versions.is_empty() {
        println!("{} No published versions of {}", "⚠".yellow(), binary.bold());
        return;
    }
    for version in versions {
        if Some(*version) == latest {
            println!("{} {}", version.cyan(), "(latest)".dimmed());
        } else {
            println!("{version}");
        }
    }
}

pub fn print_status(binary: &str, status: &InstalledStatus) {
    match status {
        InstalledStatus::NotInstalled { path } => println!(
            "{} {} is not installed at {}",
            "⚠".yellow(),
            binary.bold(),
            path.display()
        ),
        InstalledStatus::Intact { path, version } => println!(
            "{} {} {} at {} (checksum verified)",
            "✓".green(),
            binary.bold(),
            version.cyan(),
            path.display()
        ),
        InstalledStatus::Modified {
            path,
            version,
            expected,
            actual,
        } => {
            println!(
                "{} {} at {} reports {} but does not match the catalog",
                "✗".red(),
                binary.bold(),
                path.display(),
                version.cyan()
            );
            println!("  expected sha256 {}", expected.dimmed());
            println!("  actual   sha256 {}", actual.dimmed());
            println!("  Run {} to restore it", "pour install --force".cyan());
        }
        InstalledStatus::Unknown {
            path,
            version,
            actual,
        } => {
            println!(
                "{} {} at {} reports {}, which the catalog does not list for this platform",
                "⚠".yellow(),
                binary.bold(),
                path.display(),
                version.cyan()
            );
            println!("  sha256 {}", actual.dimmed());
            println!("  Run {} to see published versions", "pour list".cyan());
        }
    }
}

/// Error line, cause chain, and a hint for what to do next.
pub fn print_install_error(err: &InstallError) {
    eprintln!("{} {}", "✗".red(), err.to_string().bold());
    print_causes(&err.cause);
    print_hint(&err.cause);
}

pub fn print_error(err: &PourError) {
    eprintln!("{} {}", "✗".red(), err.to_string().bold());
    print_causes(err);
    print_hint(err);
}

pub fn print_anyhow(err: &anyhow::Error) {
    eprintln!("{} {}", "✗".red(), err.to_string().bold());
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

fn print_causes(err: &PourError) {
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}

fn print_hint(err: &PourError) {
    if let Some(hint) = err.hint() {
        eprintln!("  {} {}", "hint:".yellow(), hint);
    }
}
