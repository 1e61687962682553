mod collectors;
mod config;
mod crypto;
mod http;
mod metrics;
mod monitor;
mod registry;
mod remote;

use axum::serve;
use clap::Parser;
use config::Config;
use crypto::CredentialCipher;
use metrics::Metrics;
use monitor::{jobs_from_registry, Monitor, MonitorSettings};
use registry::RegistryStore;
use remote::ssh::SshConnector;
use reqwest::Client;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "fleetwatch")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Print a fresh hex encryption key and exit.
    #[arg(long)]
    generate_key: bool,
    /// Drop and recreate the registry tables before anything else.
    #[arg(long)]
    reset: bool,
    /// Load the systems from the config file into the registry.
    #[arg(long)]
    load: bool,
    /// Mark a system as retired so monitoring skips it.
    #[arg(long, value_name = "ID")]
    retire: Option<i32>,
    /// Delete a system and its health checks.
    #[arg(long, value_name = "ID")]
    delete: Option<i32>,
    /// Run the stub API until Ctrl+C instead of a monitoring pass.
    #[arg(long, conflicts_with = "metrics_out")]
    serve: bool,
    /// Write last-run metrics to this node-exporter textfile.
    #[arg(long, value_name = "PATH")]
    metrics_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }
    if cli.generate_key {
        println!("{}", CredentialCipher::generate_key());
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            init_tracing(None);
            exit_with(err, "failed to load config");
        }
    };
    init_tracing(cfg.log_file.as_deref());

    let key = match resolve_encryption_key(&cfg) {
        Ok(key) => key,
        Err(err) => exit_with(err, "encryption key is not configured"),
    };
    let cipher = match CredentialCipher::new(&key) {
        Ok(cipher) => cipher,
        Err(err) => exit_with(err, "invalid encryption key"),
    };

    let store = match RegistryStore::connect(&cfg.database_url, cipher).await {
        Ok(store) => store,
        Err(err) => exit_with(err, "failed to open registry database"),
    };
    let schema = if cli.reset {
        warn!("resetting registry tables");
        store.reset().await
    } else {
        store.migrate().await
    };
    if let Err(err) = schema {
        exit_with(err, "failed to prepare registry schema");
    }

    let setup_only = cli.reset || cli.load || cli.retire.is_some() || cli.delete.is_some();
    if cli.load {
        if let Err(err) = store.load(&cfg.systems).await {
            exit_with(err, "failed to load systems into registry");
        }
    }
    if let Some(id) = cli.retire {
        let hostname = match store.find_system(id).await {
            Ok(Some(system)) => system.hostname,
            Ok(None) => exit_with(registry::RegistryError::NotFound(id), "failed to retire system"),
            Err(err) => exit_with(err, "failed to retire system"),
        };
        if let Err(err) = store.retire_system(id).await {
            exit_with(err, "failed to retire system");
        }
        info!(id, host = %hostname, "system retired");
    }
    if let Some(id) = cli.delete {
        if let Err(err) = store.delete_system(id).await {
            exit_with(err, "failed to delete system");
        }
        info!(id, "system deleted");
    }

    if cli.serve {
        if let Err(err) = serve_api(&cfg, store).await {
            exit_with(err, "stub API failed");
        }
        return;
    }
    if setup_only {
        return;
    }

    run_monitoring_pass(&cfg, &store, cli.metrics_out.as_deref()).await;
}

async fn run_monitoring_pass(cfg: &Config, store: &RegistryStore, metrics_out: Option<&Path>) {
    let connector = SshConnector {
        retry: cfg.ssh.connect_retry,
        connect_timeout: Duration::from_millis(cfg.ssh.connect_timeout_ms),
        command_timeout: Duration::from_millis(cfg.ssh.command_timeout_ms),
    };
    let client = match Client::builder().user_agent("fleetwatch/0.1.0").build() {
        Ok(client) => client,
        Err(err) => exit_with(err, "failed to build http client"),
    };
    let monitor = Monitor::new(connector, client, MonitorSettings::from_config(cfg));

    let jobs = match jobs_from_registry(store, cfg).await {
        Ok(jobs) => jobs,
        Err(err) => exit_with(err, "failed to read registry"),
    };
    if jobs.is_empty() {
        warn!("no active systems in registry, run with --load first");
    }
    info!(systems = jobs.len(), "starting monitoring pass");

    let summary = match monitor.run(&jobs).await {
        Ok(summary) => summary,
        Err(err) => exit_with(err, "monitoring pass aborted"),
    };

    if let Some(path) = metrics_out {
        let metrics = match Metrics::new() {
            Ok(m) => m,
            Err(err) => exit_with(err, "failed to initialise metrics"),
        };
        metrics.record(&summary);
        if let Err(err) = metrics.write_textfile(path) {
            exit_with(err, "failed to write metrics");
        }
        info!(path = %path.display(), "metrics written");
    }
}

async fn serve_api(cfg: &Config, store: RegistryStore) -> std::io::Result<()> {
    let addr: SocketAddr = cfg
        .api
        .listen
        .parse()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    let listener = TcpListener::bind(addr).await?;
    info!(listen = %addr, "stub API listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let app = http::build_router(store);
    let server = tokio::spawn(async move {
        serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(true);

    server.await.map_err(std::io::Error::other)?
}

fn init_tracing(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(err) => {
                eprintln!("cannot open log file {}: {err}", path.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
}

fn exit_with(err: impl Display, message: &str) -> ! {
    error!(error = %err, "{message}");
    std::process::exit(1);
}

fn resolve_encryption_key_from_env(env_name: &str) -> Option<String> {
    if let Ok(v) = std::env::var(env_name) {
        if !v.trim().is_empty() {
            return Some(v.trim().to_string());
        }
    }
    None
}

fn resolve_encryption_key(cfg: &Config) -> Result<String, String> {
    if let Some(v) = resolve_encryption_key_from_env(&cfg.encryption_key_env) {
        return Ok(v);
    }
    if let Some(v) = cfg
        .encryption_key
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return Ok(v);
    }

    Err(format!(
        "set '{}' in the environment or encryption_key in config (generate one with --generate-key)",
        cfg.encryption_key_env
    ))
}
