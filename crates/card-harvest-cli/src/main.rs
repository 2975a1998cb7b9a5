//! card-harvest entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;

use card_harvest::{resolve_config_path, HarvestConfig};
use card_harvest_cli::commands::{self, RunStatus};

#[derive(Parser)]
#[command(
    name = "card-harvest",
    about = "Harvest card images from web catalogs and extract their fields into manifests",
    version
)]
struct Cli {
    /// Path to the TOML config (default: $CARD_HARVEST_CONFIG or ./harvest.toml).
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render web targets, download their images and write JSON manifests.
    Web {
        /// Only run the named targets (repeatable).
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Read targets from a `folder, url` list instead of the config.
        #[arg(long = "targets", requires = "profile")]
        target_list: Option<PathBuf>,

        /// Profile applied to every entry of --targets.
        #[arg(long)]
        profile: Option<String>,
    },

    /// Recognize card fields in a local image tree and write a CSV.
    Scan {
        /// Image root (default: local.root).
        dir: Option<PathBuf>,

        /// Output CSV (default: local.manifest).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a `{ folder: [cards] }` JSON listing of an image tree.
    Catalog {
        /// Image root (default: local.root).
        dir: Option<PathBuf>,

        #[arg(short, long, default_value = "cards.json")]
        output: PathBuf,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   card-harvest completions bash > ~/.local/share/bash-completion/completions/card-harvest
    ///   card-harvest completions zsh > ~/.zfunc/_card-harvest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(RunStatus::Failed.exit_code())
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunStatus> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "card-harvest", &mut std::io::stdout());
        return Ok(RunStatus::Complete);
    }

    let config = load_config(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing current step");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Web {
            targets,
            target_list,
            profile,
        } => {
            let list = target_list.as_deref().zip(profile.as_deref());
            let selected = commands::select_targets(&config, &targets, list)?;
            commands::run_web(&config, &selected, &cancel).await
        }

        Commands::Scan { dir, output } => {
            // Recognition is CPU-bound; keep it off the async workers.
            tokio::task::spawn_blocking(move || commands::run_scan(&config, dir, output, &cancel))
                .await
                .context("scan task panicked")?
        }

        Commands::Catalog { dir, output } => {
            let root = dir.unwrap_or_else(|| config.local.root.clone());
            commands::run_catalog(&root, &output)
        }

        Commands::Completions { .. } => Ok(RunStatus::Complete),
    }
}

/// Load the config file, or defaults when the implicit one is absent.
fn load_config(explicit: Option<&str>) -> anyhow::Result<HarvestConfig> {
    let path = resolve_config_path(explicit);
    if path.exists() {
        return HarvestConfig::load(&path).with_context(|| format!("loading {}", path.display()));
    }
    if explicit.is_some() || std::env::var_os(card_harvest::config::CONFIG_ENV).is_some() {
        anyhow::bail!("config file {} not found", path.display());
    }
    tracing::debug!("No {} found, using defaults", path.display());
    Ok(HarvestConfig::default())
}
