use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fms_bridge::api::AppState;
use fms_bridge::automation::core::{ChromeLauncher, SessionFactory};
use fms_bridge::automation::PortalDriver;
use fms_bridge::config::Settings;
use fms_bridge::models::ActionOutcome;

#[derive(Parser)]
#[command(name = "fms-bridge")]
#[command(about = "Task board bridge for the FMS portal", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config, rosters, token and snapshots
    #[arg(long, global = true, env = "FMS_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the background sweep
    Serve,

    /// Scrape roster accounts once and exit
    Scrape {
        /// Only this account
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Assign a worker to a task
    Assign {
        task: String,
        worker: String,
    },

    /// Upload a file onto the card matching a board filter
    Upload {
        filter: String,
        file: PathBuf,
    },

    /// Log in with the action account and refresh token.json
    Token,

    /// Delete every snapshot file
    PurgeSnapshots,
}

fn report(outcome: ActionOutcome) -> anyhow::Result<()> {
    println!("{}", outcome.output);
    if !outcome.success {
        bail!("action failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let settings = Settings::load(&cli.data_dir)
        .with_context(|| format!("loading settings from {}", cli.data_dir.display()))?;

    if let Commands::Serve = cli.command {
        fms_bridge::run_server(settings).await?;
        return Ok(());
    }

    let sessions = Arc::new(ChromeLauncher::new(&settings));
    let (shutdown, _) = broadcast::channel(1);
    let state = AppState::new(settings.clone(), sessions.clone(), shutdown);

    match cli.command {
        Commands::Serve => {}
        Commands::Scrape { username } => {
            let accounts: Vec<_> = state
                .roster
                .load()?
                .into_iter()
                .filter(|a| username.as_deref().map_or(true, |u| a.username == u))
                .collect();
            if accounts.is_empty() {
                bail!("no matching accounts in {}", settings.accounts_file().display());
            }
            for account in &accounts {
                let columns = state.arbiter.scrape_now(account).await?;
                println!(
                    "{}: {} new, {} pending, {} in progress",
                    account.username,
                    columns.new.len(),
                    columns.pending.len(),
                    columns.in_progress.len()
                );
            }
        }
        Commands::Assign { task, worker } => {
            let account = state.action_account()?;
            report(state.executor.assign_worker(&task, &worker, &account).await)?;
        }
        Commands::Upload { filter, file } => {
            let account = state.action_account()?;
            report(state.executor.upload_media(&filter, &file, &account).await)?;
        }
        Commands::Token => {
            let account = state.action_account()?;
            let driver = PortalDriver::new(&settings);
            let page = sessions.open().await?;
            let auth = driver.authenticate(page.as_ref(), &account).await;
            let token = driver.extract_token(page.as_ref()).await;
            page.close().await;
            auth?;
            match token {
                Some(token) => {
                    let record = state.tokens.save(&token)?;
                    info!(observed_at = %record.observed_at, "Token refreshed");
                    println!("{}", settings.token_file().display());
                }
                None => bail!("no bearer token found after login"),
            }
        }
        Commands::PurgeSnapshots => {
            println!("{}", state.snapshots.purge_all());
        }
    }
    Ok(())
}
