// src/main.rs
// Grid - provision and supervise Ethereum client binaries

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use grid::clients::ClientDescriptor;
use grid::config::{GridConfig, ProviderConfig, SupervisorConfig};
use grid::flags::SettingsMap;
use grid::platform::PlatformProfile;
use grid::release::{HttpReleaseIndex, ReleaseIndex, ReleaseProvider, VersionConstraint};
use grid::supervisor::{ProcessSupervisor, SupervisorEvent, SupervisorState, check_connection};
use tokio::sync::broadcast;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "grid")]
#[command(about = "Provision and supervise Ethereum client binaries")]
#[command(version)]
struct Cli {
    /// Debug logging (overrides GRID_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in clients for this platform
    Clients,

    /// Print the launch flags for a client
    Flags {
        client: String,
        /// Setting override, e.g. --set network=rinkeby
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// List available releases
    Releases {
        client: String,
        /// Only releases already in the cache
        #[arg(long)]
        cached: bool,
    },

    /// Resolve, download and extract the latest release
    Fetch { client: String },

    /// Start a client and stream its events until Ctrl-C
    Run {
        client: String,
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Check whether an endpoint accepts TCP connections
    Probe {
        host: String,
        port: u16,
        /// Timeout in milliseconds
        #[arg(short, long, default_value = "2000")]
        timeout: u64,
    },
}

/// Everything a command needs, built once
struct App {
    profile: PlatformProfile,
    file: GridConfig,
    cache_root: PathBuf,
    index: Arc<dyn ReleaseIndex>,
}

impl App {
    fn load() -> Self {
        let file = GridConfig::load();
        let cache_root = file
            .cache_dir
            .clone()
            .unwrap_or_else(|| ProviderConfig::from_env().cache_root);
        Self {
            profile: PlatformProfile::current(),
            file,
            cache_root,
            index: Arc::new(HttpReleaseIndex::new()),
        }
    }

    fn client(&self, name: &str) -> Result<ClientDescriptor> {
        Ok(ClientDescriptor::builtin(name, &self.profile)?)
    }

    fn provider(&self, client: &ClientDescriptor) -> ReleaseProvider {
        ReleaseProvider::new(client, self.profile.clone(), &self.cache_root, self.index.clone())
    }

    /// Config file settings overlaid with --set pairs
    fn settings(&self, client: &str, overrides: &[String]) -> Result<SettingsMap> {
        let mut settings = self.file.settings_for(client);
        for pair in overrides {
            let (key, value) = parse_setting(pair)?;
            settings.insert(key, value);
        }
        Ok(settings)
    }

    fn constraint(&self, client: &ClientDescriptor) -> Result<Option<VersionConstraint>> {
        let raw = self
            .file
            .constraint_for(&client.name)
            .or(client.version_constraint.as_deref());
        Ok(raw.map(VersionConstraint::parse).transpose()?)
    }
}

fn parse_setting(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("invalid setting `{}`, expected KEY=VALUE", pair),
    }
}

fn log_level(verbose: bool) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    std::env::var("GRID_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Level::WARN)
}

fn run_clients(app: &App) {
    for client in ClientDescriptor::builtins(&app.profile) {
        println!(
            "{:<8} {:<8} {:<30} {}",
            client.name, client.display_name, client.binary_name, client.repository
        );
    }
}

fn run_flags(app: &App, name: &str, overrides: &[String]) -> Result<()> {
    let client = app.client(name)?;
    let provider = app.provider(&client);
    let settings = app.settings(name, overrides)?;
    let args = client.launch_flags(&settings, provider.cache_dir())?;
    println!("{}", args.join(" "));
    Ok(())
}

async fn run_releases(app: &App, name: &str, cached: bool) -> Result<()> {
    let client = app.client(name)?;
    let provider = app.provider(&client);
    let releases = if cached {
        provider.cached_releases().await?
    } else {
        provider.remote_releases().await?
    };

    if releases.is_empty() {
        println!("No releases found");
    }
    for release in releases {
        let marker = if release.binary_path.is_some() { "*" } else { " " };
        println!("{} {:<20} {}", marker, release.version, release.file_name);
    }
    Ok(())
}

async fn run_fetch(app: &App, name: &str) -> Result<()> {
    let client = app.client(name)?;
    let provider = app.provider(&client);
    let constraint = app.constraint(&client)?;

    let release = provider
        .provision(constraint.as_ref(), |percent| eprintln!("download {:>3}%", percent))
        .await?;
    let binary = release
        .binary_path
        .context("release has no extracted binary")?;
    println!("{} {}", release.version, binary.display());
    Ok(())
}

async fn run_client(app: &App, name: &str, overrides: &[String]) -> Result<()> {
    let client = app.client(name)?;
    let provider = Arc::new(app.provider(&client));

    let mut config = SupervisorConfig::from_env();
    if config.version_constraint.is_none() {
        config.version_constraint = app.file.constraint_for(name).map(str::to_string);
    }

    let supervisor = ProcessSupervisor::new(client, provider, config);
    supervisor.set_settings(app.settings(name, overrides)?).await;

    let events = supervisor.subscribe();
    let printer = tokio::spawn(print_events(events));

    supervisor.start().await?;
    info!("Client running, press Ctrl-C to stop");

    let mut state = supervisor.watch_state();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
        }
        _ = state.wait_for(|s| matches!(s, SupervisorState::Stopped | SupervisorState::Error)) => {
            warn!(state = %supervisor.state(), "Client exited on its own");
        }
    }

    supervisor.stop().await?;
    if let Some(ipc) = supervisor.ipc_path().await {
        info!(ipc = %ipc.display(), "Last IPC endpoint");
    }
    drop(supervisor);
    let _ = printer.await;
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<SupervisorEvent>) {
    loop {
        match events.recv().await {
            Ok(SupervisorEvent::Log { stream, line }) => println!("[{}] {}", stream.as_str(), line),
            Ok(SupervisorEvent::DownloadProgress { percent }) => eprintln!("download {:>3}%", percent),
            Ok(SupervisorEvent::Notification(n)) => {
                let hint = if n.kind.requires_approval() { " (approval required)" } else { "" };
                println!("<{}> {}{}", n.kind.event_name(), n.summary(), hint);
            }
            Ok(SupervisorEvent::Error(failure)) => {
                eprintln!("error: {}", failure.message);
                for line in &failure.last_logs {
                    eprintln!("  | {}", line);
                }
            }
            Ok(SupervisorEvent::ParseWarning { line, error }) => {
                eprintln!("parse warning: {} ({})", error, line)
            }
            Ok(other) => println!("<{}>", other.name()),
            Err(broadcast::error::RecvError::Lagged(n)) => eprintln!("({} events dropped)", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let app = App::load();

    match cli.command {
        Commands::Clients => run_clients(&app),
        Commands::Flags { client, set } => run_flags(&app, &client, &set)?,
        Commands::Releases { client, cached } => run_releases(&app, &client, cached).await?,
        Commands::Fetch { client } => run_fetch(&app, &client).await?,
        Commands::Run { client, set } => run_client(&app, &client, &set).await?,
        Commands::Probe {
            host,
            port,
            timeout,
        } => {
            let reachable = check_connection(&host, port, Duration::from_millis(timeout)).await?;
            println!("{}:{} {}", host, port, if reachable { "open" } else { "closed" });
            if !reachable {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
