use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use peerlink::{DemoOptions, DeviceRegistry, PeerlinkConfig, VirtualMediaDevices};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "peerlink")]
#[command(about = "Peer-to-peer call session core with rendezvous signaling and camera recovery")]
#[command(version)]
#[command(long_about = "Peer-to-peer call session core: registers receivers with a rendezvous \
service, wakes offline receivers through a push backend, negotiates the peer session and keeps \
the local camera healthy by switching devices when capture freezes or fails.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "peerlink.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file
    #[arg(long, value_name = "PATH", help = "Write logs to a daily rolling file at PATH")]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rank the configured capture devices
    Devices,
    /// Ask the rendezvous service whether a receiver is online
    Status {
        /// Receiver identifier
        id: String,
    },
    /// Wake an offline receiver and wait until it comes online
    Wake {
        /// Receiver push token
        token: String,
        /// Give up after this many seconds (waits forever when omitted)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run a receiver and a caller in-process and connect them
    Demo {
        /// Start with the receiver offline so it has to be woken
        #[arg(long)]
        wake: bool,
        /// Text to send over the data channel
        #[arg(long)]
        message: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting peerlink v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match PeerlinkConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    match args.command.unwrap_or(Command::Demo {
        wake: false,
        message: Vec::new(),
    }) {
        Command::Devices => list_devices(&config).await,
        Command::Status { id } => status(&config, &id).await,
        Command::Wake { token, timeout } => wake(&config, &token, timeout).await,
        Command::Demo { wake, message } => demo(config, wake, message).await,
    }
}

async fn list_devices(config: &PeerlinkConfig) -> Result<()> {
    let media = Arc::new(VirtualMediaDevices::from_labels(&config.devices.virtual_labels));
    let registry = DeviceRegistry::new(media, config.devices.cache_validity());
    let snapshot = registry.ranked_devices().await?;

    println!("{:<4} {:<6} {:<12} LABEL", "#", "SCORE", "ID");
    for (index, ranked) in snapshot.devices().iter().enumerate() {
        println!(
            "{:<4} {:<6} {:<12} {}",
            index, ranked.score, ranked.device.id, ranked.device.label
        );
    }
    Ok(())
}

#[cfg(feature = "http")]
async fn status(config: &PeerlinkConfig, id: &str) -> Result<()> {
    use peerlink::{HttpRendezvousClient, RendezvousService};

    let client = HttpRendezvousClient::new(&config.rendezvous)?;
    let online = client.is_online(id).await?;
    let wanted = client.check_wanted(id).await?;

    println!("{}: {}", id, if online { "online" } else { "offline" });
    if let Some(caller_id) = wanted.caller_id.filter(|_| wanted.wanted) {
        println!("Caller {} is waiting", caller_id);
    }
    Ok(())
}

#[cfg(feature = "http")]
async fn wake(config: &PeerlinkConfig, token: &str, timeout: Option<u64>) -> Result<()> {
    use peerlink::{
        CallTarget, CallerFlow, ConnectionOrchestrator, HttpRendezvousClient, LocalSignalingHub,
        LoopbackNetwork, SessionContext,
    };
    use std::time::Duration;

    // Only the rendezvous and wake collaborators are used; no call is placed
    let client = Arc::new(HttpRendezvousClient::new(&config.rendezvous)?);
    let ctx = SessionContext::new(
        Arc::new(config.clone()),
        Arc::new(VirtualMediaDevices::from_labels(&config.devices.virtual_labels)),
        Arc::new(LoopbackNetwork::new()),
        Arc::new(LocalSignalingHub::new()),
        client.clone(),
        client,
    );
    let flow = CallerFlow::new(ConnectionOrchestrator::new(ctx));
    let target = CallTarget::from_push_token(token);

    let waiting = flow.ensure_online(&target);
    let woke = match timeout {
        Some(seconds) => match tokio::time::timeout(Duration::from_secs(seconds), waiting).await {
            Ok(result) => result?,
            Err(_) => bail!("{} did not come online within {}s", target.id, seconds),
        },
        None => waiting.await?,
    };

    if woke {
        println!("{} was woken and is online", target.id);
    } else {
        println!("{} is already online", target.id);
    }
    Ok(())
}

#[cfg(not(feature = "http"))]
async fn status(_config: &PeerlinkConfig, _id: &str) -> Result<()> {
    bail!("built without the `http` feature; the rendezvous client is unavailable")
}

#[cfg(not(feature = "http"))]
async fn wake(_config: &PeerlinkConfig, _token: &str, _timeout: Option<u64>) -> Result<()> {
    bail!("built without the `http` feature; the wake client is unavailable")
}

async fn demo(config: PeerlinkConfig, wake: bool, messages: Vec<String>) -> Result<()> {
    let mut options = DemoOptions {
        wake,
        ..DemoOptions::default()
    };
    if !messages.is_empty() {
        options.messages = messages;
    }

    let report = peerlink::run_demo(config, options).await?;

    println!("✓ {} called {}", report.caller_id, report.receiver_id);
    if report.woke_receiver {
        println!("  receiver was woken by push notification");
    }
    for text in &report.delivered {
        println!("  delivered: {}", text);
    }
    if let Some(label) = &report.switched_to {
        println!("  camera switched to {}", label);
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("peerlink={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let path = Path::new(path);
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let Some(file_name) = path.file_name() else {
                bail!("log file path '{}' has no file name", path.display());
            };
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Peerlink Configuration File");
    println!("# Default configuration with all available options");
    println!("# Any value can be overridden with PEERLINK_<SECTION>__<KEY> environment variables");
    println!();
    print!("{}", toml::to_string_pretty(&PeerlinkConfig::default())?);
    Ok(())
}
