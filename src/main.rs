use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapcoach::{
    CaptureFrame, ClientSession, ClientState, CompletionProvider, EventBus, MediaDevices,
    OpenAiProvider, RelayClient, RelayServerBuilder, ScriptedProvider, SnapcoachConfig,
    SyntheticDevices, TranscriptFollower,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "snapcoach")]
#[command(about = "Capture a camera frame and stream a multimodal model's analysis of it")]
#[command(version)]
#[command(long_about = "Snapcoach runs a small relay that forwards a captured image to a \
multimodal language model and streams the answer back as plain text, plus a client that \
captures a frame from a camera, submits it and prints the answer as it arrives.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "snapcoach.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, global = true, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, global = true, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, global = true, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, global = true, help = "Validate configuration file and exit")]
    validate_config: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the analysis relay
    Serve {
        /// Replay a canned answer instead of calling the model provider
        #[arg(long)]
        scripted: bool,
    },
    /// Capture one frame from the camera and print its analysis
    Snap {
        /// Relay analyze URL (overrides client.relay_url)
        #[arg(long)]
        relay: Option<String>,

        /// Use the in-process test pattern instead of a real camera
        #[arg(long)]
        synthetic: bool,
    },
    /// Submit an existing JPEG or PNG file and print its analysis
    Analyze {
        path: PathBuf,

        /// Relay analyze URL (overrides client.relay_url)
        #[arg(long)]
        relay: Option<String>,
    },
    /// Print the effective configuration as TOML (credential redacted)
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(&args)?;

    info!("Starting snapcoach v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SnapcoachConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    match args.command {
        Command::Serve { scripted } => serve(config, scripted).await,
        Command::Snap { relay, synthetic } => snap(config, relay, synthetic).await,
        Command::Analyze { path, relay } => analyze(config, path, relay).await,
        Command::PrintConfig => {
            println!("# Snapcoach configuration");
            println!("{}", config.to_toml_redacted()?);
            Ok(())
        }
    }
}

async fn serve(config: SnapcoachConfig, scripted: bool) -> Result<()> {
    let provider: Arc<dyn CompletionProvider> = if scripted {
        info!("Using scripted provider");
        Arc::new(
            ScriptedProvider::builder()
                .fragments([
                    "This is a scripted answer. ",
                    "Start the relay without --scripted ",
                    "to analyze images with the configured model.",
                ])
                .delay(Duration::from_millis(150))
                .build(),
        )
    } else {
        let provider = OpenAiProvider::new(&config.upstream)?;
        if !provider.is_configured() {
            warn!("No upstream API key configured; analyze requests will be rejected");
        }
        Arc::new(provider)
    };

    let server = RelayServerBuilder::new()
        .config(config.relay.clone())
        .upstream(config.upstream.clone())
        .provider(provider)
        .build()?;

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());

    server.start(shutdown).await?;

    let stats = server.stats().snapshot();
    info!(
        "Relay served {} requests ({} completed, {} rejected, {} upstream failures, {} interrupted, {} abandoned)",
        stats.requests,
        stats.completed,
        stats.rejected,
        stats.upstream_failures,
        stats.stream_errors,
        stats.abandoned
    );
    Ok(())
}

async fn snap(config: SnapcoachConfig, relay: Option<String>, synthetic: bool) -> Result<()> {
    let devices = open_devices(&config, synthetic)?;
    let session = ClientSession::new(&config, devices, relay).await?;
    let printer = spawn_answer_printer(session.events(), session.relay().state());

    let settings = session.start_camera().await?;
    info!("Camera ready at {}x{}", settings.width, settings.height);

    if !session.wait_until_ready(Duration::from_secs(10)).await {
        session.stop_camera();
        anyhow::bail!("Camera feed did not become ready");
    }

    let result = session.take_photo().await;
    session.stop_camera();
    let _ = printer.await;
    println!();

    result?;
    Ok(())
}

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
fn open_devices(config: &SnapcoachConfig, synthetic: bool) -> Result<Arc<dyn MediaDevices>> {
    if synthetic {
        return Ok(Arc::new(SyntheticDevices::new()));
    }
    let devices = snapcoach::GstDevices::new(config.camera.device.clone())?;
    Ok(Arc::new(devices))
}

#[cfg(not(all(feature = "gstreamer", target_os = "linux")))]
fn open_devices(_config: &SnapcoachConfig, synthetic: bool) -> Result<Arc<dyn MediaDevices>> {
    if !synthetic {
        warn!("Built without the gstreamer feature; using the synthetic camera");
    }
    Ok(Arc::new(SyntheticDevices::new()))
}

async fn analyze(config: SnapcoachConfig, path: PathBuf, relay: Option<String>) -> Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let frame = CaptureFrame::from_encoded(bytes, config.camera.jpeg_quality)?;
    info!("Loaded {} ({}x{})", path.display(), frame.width, frame.height);

    let state = Arc::new(ClientState::new());
    let bus = EventBus::default();
    let printer = spawn_answer_printer(&bus, Arc::clone(&state));
    let url = relay.unwrap_or(config.client.relay_url);
    let client = RelayClient::new(url, state, bus)?;

    let result = client.submit(&frame).await;
    let _ = printer.await;
    println!();

    result?;
    Ok(())
}

/// Print the answer as it is appended, until it ends either way
fn spawn_answer_printer(bus: &EventBus, state: Arc<ClientState>) -> tokio::task::JoinHandle<()> {
    let mut follower = TranscriptFollower::new(bus, state);
    tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(text) = follower.next_text().await {
            let _ = write!(stdout, "{}", text);
            let _ = stdout.flush();
        }
    })
}

fn spawn_signal_handlers(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        let shutdown_sigterm = shutdown.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM signal");
                        shutdown_sigterm.cancel();
                    }
                }
                Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received SIGINT signal (Ctrl+C)");
            shutdown.cancel();
        }
    });
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "snapcoach={},tower_http={}",
            log_level, log_level
        ))
    });

    // Logs go to stderr so streamed answers on stdout stay clean
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "snapcoach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
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
