use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dualsync::config::Config;
use dualsync::daemon;
use dualsync::engine::Engine;
use dualsync::remote::http::HttpDriveApi;
use dualsync::remote::RemoteClient;
use dualsync::state_store::FileStateStore;

#[derive(Parser)]
#[command(name = "dualsync")]
#[command(about = "Bidirectional sync between a local folder and a cloud-drive account", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file (account id, local folder, API URL, token)
    Setup,
    /// Start syncing in the background
    Start {
        /// Run in the foreground instead of daemonizing
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the background daemon
    Down,
    /// Show the configured root and whether the daemon is running
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    // `down` and a backgrounding `start` don't need a subscriber at all;
    // everything else initializes logging before doing real work.
    match &cli.command {
        Some(Commands::Down) => return down(),
        Some(Commands::Start { foreground: false }) => {
            if !config.is_configured() {
                println!("not configured. run: dualsync setup");
                return Ok(());
            }
            return start_daemon();
        }
        None => {
            if config.is_configured() {
                return status(&config);
            }
            println!("not configured. run: dualsync setup");
            return Ok(());
        }
        _ => {}
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dualsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Some(Commands::Setup) => setup()?,
        Some(Commands::Start { foreground: true }) => start_foreground(&config).await?,
        Some(Commands::Status) => status(&config)?,
        Some(Commands::Down) | Some(Commands::Start { foreground: false }) | None => unreachable!(),
    }

    Ok(())
}

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn setup() -> anyhow::Result<()> {
    let mut config = Config::load()?;

    let account_id = prompt("account id")?;
    let local_root = prompt("local folder to sync")?;
    let api_base_url = prompt("API base URL")?;
    let token = prompt("bearer token")?;

    config.account_id = Some(account_id);
    config.local_root = Some(local_root);
    config.api_base_url = Some(api_base_url);
    config.token = Some(token);
    config.save()?;

    println!("saved config to {}", Config::config_path()?.display());
    Ok(())
}

fn start_daemon() -> anyhow::Result<()> {
    let pid = daemon::start()?;
    println!("dualsync syncing (pid {pid})");
    Ok(())
}

fn down() -> anyhow::Result<()> {
    daemon::stop()
}

fn status(config: &Config) -> anyhow::Result<()> {
    if !config.is_configured() {
        println!("not configured");
        println!("run: dualsync setup");
        return Ok(());
    }

    println!(
        "account: {}",
        config.account_id.as_deref().unwrap_or("unknown")
    );
    println!(
        "folder: {}",
        config.local_root.as_deref().unwrap_or("unknown")
    );

    match daemon::check_running()? {
        Some(pid) => println!("sync: running (pid {pid})"),
        None => println!("sync: stopped"),
    }
    Ok(())
}

async fn start_foreground(config: &Config) -> anyhow::Result<()> {
    config.require_auth()?;
    let account_id = config
        .account_id
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no account id configured. Run: dualsync setup"))?;
    let local_root = config
        .local_root
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no local folder configured. Run: dualsync setup"))?;
    let api_base_url = config
        .api_base_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no API base URL configured. Run: dualsync setup"))?;
    let token = config
        .token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("not logged in. Run: dualsync setup"))?;

    daemon::write_pid(std::process::id())?;

    let api = HttpDriveApi::new(api_base_url, token);
    let remote = Arc::new(RemoteClient::new(Box::new(api)));
    let state_dir = Config::config_path()?
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    let store: Arc<dyn dualsync::state_store::StateStore> = Arc::new(FileStateStore::new(state_dir));

    let engine = Engine::new(
        account_id,
        local_root.into(),
        remote,
        store,
        Duration::from_secs(config.poll_interval_secs),
        Duration::from_millis(config.debounce_millis),
    )
    .await?;

    let shutdown = engine.shutdown_sender();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown.send(true);
    });

    let notify: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(|msg: &str| println!("{msg}"));
    let result = engine.start(notify).await;

    let _ = daemon::remove_pid();
    result
}
