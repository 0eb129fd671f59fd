use clap::{Parser, Subcommand};
use colored::Colorize;
use pour::catalog::VersionCatalog;
use pour::config::Settings;
use pour::download::{HttpTransport, RetryingFetcher};
use pour::error::{PourError, exit_code};
use pour::installer::{InstallError, InstallRequest, Installer, VersionRequest};
use pour::output;
use pour::platform::Platform;
use pour::selfcheck::{self, InstalledStatus};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pour")]
#[command(author, version, about = "Install verified prebuilt binaries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, verify and install a release
    Install {
        /// Version to install, or `latest`
        #[arg(default_value = "latest")]
        version: String,

        /// Directory to install into
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Release catalog file
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Install the build for another platform (e.g. linux-x86_64)
        #[arg(long)]
        platform: Option<Platform>,

        /// Let `latest` pick the newest pre-release
        #[arg(long)]
        pre: bool,

        /// Download again even if the installed binary already matches
        #[arg(long)]
        force: bool,
    },

    /// Show the URL and checksum a version resolves to
    Resolve {
        /// Version, or `latest`
        version: String,

        #[arg(long)]
        platform: Option<Platform>,

        #[arg(long)]
        catalog: Option<PathBuf>,

        #[arg(long)]
        pre: bool,
    },

    /// List versions published for a platform
    List {
        #[arg(long)]
        platform: Option<Platform>,

        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Check the installed binary against the catalog
    Status {
        #[arg(long)]
        dest: Option<PathBuf>,

        #[arg(long)]
        catalog: Option<PathBuf>,

        #[arg(long)]
        platform: Option<Platform>,
    },

    /// Remove the installed binary
    Uninstall {
        #[arg(long)]
        dest: Option<PathBuf>,

        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Validate a release catalog file
    CheckCatalog {
        /// Catalog file to validate
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    output::init_colors();

    // Ctrl-C aborts downloads and any publish that has not renamed yet
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(code) => code,
        Err(err) => report_failure(&err),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "pour=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn report_failure(err: &anyhow::Error) -> ExitCode {
    let code = if let Some(err) = err.downcast_ref::<InstallError>() {
        output::print_install_error(err);
        err.exit_code()
    } else if let Some(err) = err.downcast_ref::<PourError>() {
        output::print_error(err);
        err.exit_code()
    } else {
        output::print_anyhow(err);
        exit_code::GENERAL
    };
    exit_status(code)
}

fn exit_status(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<ExitCode> {
    let json = cli.json;

    match cli.command {
        Commands::Install {
            version,
            dest,
            catalog,
            platform,
            pre,
            force,
        } => {
            let settings = Settings::load().map_err(PourError::from)?;
            let catalog = load_catalog(catalog.as_deref(), &settings)?;
            let request = InstallRequest {
                version: VersionRequest::parse(&version, pre),
                platform: target_platform(platform)?,
                destination_dir: dest.unwrap_or_else(|| settings.install_dir()),
                force,
            };

            let progress = !json && std::io::stderr().is_terminal();
            let installer = installer(catalog, &settings, cancel, progress)?;

            let report = installer.install(&request).await?;
            if json {
                print_json(&report)?;
            } else {
                output::print_install_report(&report);
            }
        }

        Commands::Resolve {
            version,
            platform,
            catalog,
            pre,
        } => {
            let settings = Settings::load().map_err(PourError::from)?;
            let catalog = load_catalog(catalog.as_deref(), &settings)?;
            let platform = target_platform(platform)?;
            let entry = match VersionRequest::parse(&version, pre) {
                VersionRequest::Exact(version) => catalog.resolve(&version, platform),
                VersionRequest::Latest(channel) => catalog.resolve_channel(channel, platform),
            }
            .map_err(PourError::from)?;

            if json {
                print_json(entry)?;
            } else {
                output::print_entry(catalog.binary(), entry);
            }
        }

        Commands::List { platform, catalog } => {
            let settings = Settings::load().map_err(PourError::from)?;
            let catalog = load_catalog(catalog.as_deref(), &settings)?;
            let platform = target_platform(platform)?;
            let versions = catalog.versions_for(platform);
            let latest = catalog.latest(pour::Channel::Stable);

            if json {
                print_json(&serde_json::json!({
                    "binary": catalog.binary(),
                    "platform": platform.to_string(),
                    "latest": latest,
                    "versions": versions,
                }))?;
            } else {
                output::print_versions(catalog.binary(), &versions, latest);
            }
        }

        Commands::Status {
            dest,
            catalog,
            platform,
        } => {
            let settings = Settings::load().map_err(PourError::from)?;
            let catalog = load_catalog(catalog.as_deref(), &settings)?;
            let platform = target_platform(platform)?;
            let dir = dest.unwrap_or_else(|| settings.install_dir());

            let status = selfcheck::check_installed(&catalog, &dir, platform).await?;
            if json {
                print_json(&status)?;
            } else {
                output::print_status(catalog.binary(), &status);
            }
            return Ok(match status {
                InstalledStatus::Intact { .. } => ExitCode::SUCCESS,
                InstalledStatus::NotInstalled { .. } => exit_status(exit_code::GENERAL),
                InstalledStatus::Modified { .. } => exit_status(exit_code::CHECKSUM),
                InstalledStatus::Unknown { .. } => exit_status(exit_code::RESOLUTION),
            });
        }

        Commands::Uninstall { dest, catalog } => {
            let settings = Settings::load().map_err(PourError::from)?;
            let catalog = load_catalog(catalog.as_deref(), &settings)?;
            let dir = dest.unwrap_or_else(|| settings.install_dir());
            let installer = installer(catalog, &settings, cancel, false)?;

            match installer.uninstall(&dir).await? {
                Some(path) => println!("{} Removed {}", "✓".green(), path.display()),
                None => println!(
                    "  {} {} not installed at {}",
                    "⚠".yellow(),
                    installer.catalog().binary().bold(),
                    installer.destination(&dir).display()
                ),
            }
        }

        Commands::CheckCatalog { file } => {
            let catalog = VersionCatalog::load(&file).map_err(PourError::from)?;
            println!(
                "{} {}: {} release entries for {}",
                "✓".green(),
                file.display(),
                catalog.len().to_string().bold(),
                catalog.binary().cyan()
            );
            if catalog.is_empty() {
                println!("  {} catalog lists no releases", "⚠".yellow());
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn installer(
    catalog: VersionCatalog,
    settings: &Settings,
    cancel: CancellationToken,
    progress: bool,
) -> Result<Installer<RetryingFetcher<HttpTransport>>, PourError> {
    let transport = HttpTransport::new()?.with_progress(progress);
    let fetcher = RetryingFetcher::new(transport, settings.retry.policy());
    Ok(Installer::new(catalog, fetcher).with_cancellation(cancel))
}

/// `--catalog`, then the configured catalog, then the built-in one.
fn load_catalog(flag: Option<&Path>, settings: &Settings) -> Result<VersionCatalog, PourError> {
    let catalog = match flag.or(settings.catalog.as_deref()) {
        Some(path) => {
            tracing::debug!("loading catalog {}", path.display());
            VersionCatalog::load(path)?
        }
        None => VersionCatalog::builtin()?,
    };
    Ok(catalog)
}

fn target_platform(requested: Option<Platform>) -> Result<Platform, PourError> {
    match requested {
        Some(platform) => Ok(platform),
        None => Ok(Platform::current()?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
