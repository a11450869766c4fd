// Courier - Main Entry Point
//
// Bootstrap only: env loading, tracing, CLI dispatch and the serve loop.
// Handlers, routes and ledger logic live in the library crates.

use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use courier_core::{AppConfig, DocumentStore};
use courier_server::{build_state, github::GithubContentsStore, keep_alive::KeepAlive, router};
use dotenvy::{Error as DotenvError, dotenv, from_filename};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_appender::non_blocking;
use tracing_subscriber::EnvFilter;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static TRACING_FILE_GUARD: OnceLock<non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(author, version, about = "Courier relay server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server and the keep-alive task
    Serve,
    /// Validate configuration and print the non-secret summary
    CheckConfig,
    /// Ping the companion endpoint once and report the status
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_status = load_env_file();
    init_tracing();
    report_env_status(&env_status);

    let cli = Cli::parse();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %format!("{err:#}"), "invalid configuration");
            return Err(err);
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(config).await,
        Command::CheckConfig => run_check_config(&config),
        Command::Ping => run_ping(&config).await,
    }
}

fn log_config_summary(config: &AppConfig) {
    info!(
        github_owner = %config.github.owner,
        github_repo = %config.github.repo,
        github_branch = %config.github.branch,
        github_api_url = %config.github.api_url,
        ledger_path = %config.ledger_path,
        upload_dir = %config.upload_dir,
        keep_alive_target = %config.keep_alive.target(),
        keep_alive_interval_secs = config.keep_alive.interval.as_secs(),
        allowed_origin = %config.allowed_origin,
        bind_address = %config.bind_address,
        "loaded configuration"
    );
}

async fn run_serve(config: AppConfig) -> anyhow::Result<()> {
    log_config_summary(&config);
    let config = Arc::new(config);

    let store: Arc<dyn DocumentStore> = Arc::new(GithubContentsStore::new(
        config.github.clone(),
        config.store_timeout,
    )?);
    let state = build_state(config.clone(), store);
    let app = router::build_router(state)?;

    let keep_alive = KeepAlive::new(&config.keep_alive)?.spawn();

    let listener = TcpListener::bind(config.bind_address)
        .await
        .context("failed to bind socket")?;
    let actual_addr = listener
        .local_addr()
        .context("failed to read local address")?;

    info!("listening on {actual_addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(error) = &served {
        error!(?error, "server terminated with error");
    }

    // Stop the keep-alive task before reporting a serve failure.
    match keep_alive.shutdown().await {
        Ok(cycles) => info!(cycles, "server stopped"),
        Err(error) => warn!(
            error = %format!("{error:#}"),
            "keep-alive task did not stop cleanly"
        ),
    }

    served.context("server terminated with error")
}

fn run_check_config(config: &AppConfig) -> anyhow::Result<()> {
    log_config_summary(config);
    println!("configuration OK");
    println!(
        "  repository:  {}/{}@{}",
        config.github.owner, config.github.repo, config.github.branch
    );
    println!("  ledger:      {}", config.ledger_path);
    println!("  uploads:     {}/", config.upload_dir);
    println!(
        "  keep-alive:  {} every {:?}",
        config.keep_alive.target(),
        config.keep_alive.interval
    );
    println!("  listen:      {}", config.bind_address);
    println!("  cors origin: {}", config.allowed_origin);
    Ok(())
}

async fn run_ping(config: &AppConfig) -> anyhow::Result<()> {
    let keep_alive = KeepAlive::new(&config.keep_alive)?;
    let status = keep_alive.ping_once().await?;
    println!("{} -> {status}", keep_alive.target());
    Ok(())
}

fn init_tracing() {
    // JSON to stdout by default; COURIER_LOG_DIR switches to a daily rolling
    // file. RUST_LOG controls the level.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = env::var("COURIER_LOG_DIR")
        .ok()
        .map(|dir| dir.trim().to_owned())
        .filter(|dir| !dir.is_empty());

    if let Some(log_dir) = log_dir {
        match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::daily(&log_dir, "courier.log");
                let (writer, guard) = non_blocking(file_appender);
                if tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .json()
                    .with_writer(writer)
                    .try_init()
                    .is_ok()
                {
                    let _ = TRACING_FILE_GUARD.set(guard);
                }
                return;
            }
            Err(err) => {
                eprintln!("failed to create log dir '{log_dir}': {err}; logging to stdout");
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .json()
        .with_writer(std::io::stdout)
        .try_init();
}

enum EnvLoadStatus {
    Loaded(PathBuf),
    NotFound,
    Failed(DotenvError),
}

fn load_env_file() -> EnvLoadStatus {
    if let Ok(env_file) = env::var("COURIER_ENV_FILE") {
        let trimmed = env_file.trim();
        if !trimmed.is_empty() {
            let path = PathBuf::from(trimmed);
            return match from_filename(&path) {
                Ok(_) => EnvLoadStatus::Loaded(make_relative(&path).unwrap_or(path)),
                Err(err) => EnvLoadStatus::Failed(err),
            };
        }
    }

    match dotenv() {
        Ok(path) => EnvLoadStatus::Loaded(make_relative(&path).unwrap_or(path)),
        Err(DotenvError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            EnvLoadStatus::NotFound
        }
        Err(err) => EnvLoadStatus::Failed(err),
    }
}

fn report_env_status(status: &EnvLoadStatus) {
    match status {
        EnvLoadStatus::Loaded(path) => {
            info!("Loaded environment variables from {}", path.display());
        }
        EnvLoadStatus::NotFound => {
            info!("No .env file found; using process environment only");
        }
        EnvLoadStatus::Failed(err) => {
            warn!("Failed to load .env file: {err:?}");
        }
    }
}

fn make_relative(path: &Path) -> Option<PathBuf> {
    let cwd = env::current_dir().ok()?;
    path.strip_prefix(&cwd).map(Path::to_path_buf).ok()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut term, mut int) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(err), _) | (_, Err(err)) => {
                warn!(?err, "failed to install signal handlers; falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = term.recv() => info!("received SIGTERM"),
            _ = int.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
