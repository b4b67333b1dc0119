//! livexec server
//!
//! HTTP and WebSocket front for running submitted programs interactively.

mod handlers;
mod routes;
mod ws;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livexec::process::resolve_program;
use livexec::{Config, EXAMPLE_CONFIG, SessionManager};
use tokio::net::TcpListener;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for sessions to finish cleaning up
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct AppState {
    pub manager: SessionManager,
    pub started: Instant,
}

#[derive(Parser)]
#[command(name = "livexec")]
#[command(about = "Run submitted programs with a live, interactive console")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path (default: livexec.toml)
        #[arg(short, long, default_value = "livexec.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    if let Some(path) = &cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using default configuration");
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Serve { listen } => serve(config, listen).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Init { .. } => Ok(()),
    }
}

async fn serve(config: Config, listen: Option<String>) -> Result<()> {
    check_program("interpreter", &config.interpreter.program);
    if config.guard.enabled {
        check_program("timeout guard", &config.guard.program);
    }

    let addr = listen.unwrap_or_else(|| config.listen.clone());
    let manager = SessionManager::new(config);
    let state = Arc::new(AppState {
        manager: manager.clone(),
        started: Instant::now(),
    });
    let app = routes::routes().with_state(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "livexec listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(manager))
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

/// Resolve on Ctrl-C once every session has been cancelled and cleaned up.
///
/// Cancelling first lets open WebSocket connections receive their terminal
/// message and close, which graceful shutdown waits for.
async fn shutdown_signal(manager: SessionManager) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    if !manager.shutdown(SHUTDOWN_GRACE).await {
        warn!("some sessions did not finish cleaning up in time");
    }
}

fn check_program(role: &str, program: &str) {
    match resolve_program(program) {
        Ok(path) => debug!(role, path = %path.display(), "found program"),
        Err(e) => warn!(role, "{e}; submissions will fail until it is installed"),
    }
}

fn show_config(config: &Config) {
    println!("Listen address: {}", config.listen);
    println!("Max concurrent sessions: {}", config.max_concurrent);
    match config.max_queued {
        Some(max) => println!("Max queued submissions: {max}"),
        None => println!("Max queued submissions: unbounded"),
    }
    println!("Time limit: {}s", config.time_limit);
    println!("Attach timeout: {}s", config.attach_timeout);
    println!("Scratch directory: {}", config.scratch_dir().display());
    println!();
    println!(
        "Interpreter: {} {} (*.{})",
        config.interpreter.program,
        config.interpreter.args.join(" "),
        config.interpreter.extension
    );
    if config.guard.enabled {
        println!(
            "Timeout guard: {} (kill after {}s, exit code {})",
            config.guard.program, config.guard.kill_after, config.guard.timeout_exit_code
        );
    } else {
        println!("Timeout guard: disabled");
    }
    println!();
    println!("Sentinel: {:?}", config.channel.sentinel);
    println!("Stderr prefix: {:?}", config.channel.stderr_prefix);
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
