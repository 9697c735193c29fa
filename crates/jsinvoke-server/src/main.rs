//! jsinvoke service CLI
//!
//! Serves the script execution API over HTTP, or runs a single script from
//! the command line.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jsinvoke::{Config, EXAMPLE_CONFIG, ExecutionRequest, InputData, Runner};
use tokio::net::TcpListener;
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

mod http;

#[derive(Parser)]
#[command(name = "jsinvoke")]
#[command(about = "Run untrusted JavaScript snippets in pooled sandboxes")]
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
    /// Start the HTTP service
    Serve {
        /// Address to listen on (overrides the configuration)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Run a single script and print the response body
    Run {
        /// Script file to run
        #[arg(value_name = "FILE")]
        script: PathBuf,

        /// File whose contents are bound as `data`
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path (default: jsinvoke.toml)
        #[arg(short, long, default_value = "jsinvoke.toml")]
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

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::from_env().context("failed to load configuration")?
    };

    match cli.command {
        Commands::Serve { listen } => serve(config, listen).await,
        Commands::Run { script, data } => run_script(config, &script, data.as_deref()).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Init { .. } => Ok(()),
    }
}

async fn serve(mut config: Config, listen: Option<String>) -> Result<()> {
    if let Some(listen) = listen {
        config.listen = listen;
    }
    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid listen address '{}'", config.listen))?;

    let runner = Runner::start(config)
        .await
        .context("failed to start runner")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, http::create_router(runner.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    runner.stop().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}

async fn run_script(mut config: Config, script: &Path, data: Option<&Path>) -> Result<()> {
    let source = tokio::fs::read_to_string(script)
        .await
        .context("failed to read script file")?;

    let data = match data {
        Some(path) => Some(InputData::Text(
            tokio::fs::read_to_string(path)
                .await
                .context("failed to read data file")?,
        )),
        None => None,
    };

    // One script needs one isolate
    config.pool_size = 1;
    config.concurrency = 1;
    let runner = Runner::start(config)
        .await
        .context("failed to start runner")?;

    let outcome = runner
        .execute(ExecutionRequest {
            script: source,
            data,
        })
        .await
        .context("script was not executed")?;
    runner.stop().await;

    let success = outcome.is_success();
    let body = serde_json::to_string_pretty(&outcome.into_body())
        .context("failed to serialize response")?;
    println!("{body}");

    if success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn show_config(config: &Config) {
    println!("Listen address: {}", config.listen);
    println!("Pool size: {}", config.pool_size);
    println!("Concurrency: {}", config.concurrency);
    if config.rate_limit > 0.0 {
        println!(
            "Rate limit: {}/s (burst {})",
            config.rate_limit,
            config.effective_burst()
        );
    } else {
        println!("Rate limit: disabled");
    }
    match config.acquire_timeout() {
        Some(timeout) => println!("Acquire timeout: {timeout:?}"),
        None => println!("Acquire timeout: unbounded"),
    }
    println!();
    match &config.library_dir {
        Some(dir) => println!("Library: {}", dir.display()),
        None => println!("Library: embedded"),
    }
    println!("Memory limit: {:?} KB", config.limits.memory_limit);
    println!("Stack limit: {:?} KB", config.limits.stack_limit);
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
