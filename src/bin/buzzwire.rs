//! Buzzwire CLI entry point

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use buzzwire::{Buzzwire, BuzzerError, Config, Event, FrameCodec, ProtocolMode};

#[derive(Parser, Debug)]
#[command(name = "buzzwire", version, about = "Buzzer arbitration engine for hardware quiz shows")]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine and log every event
    Monitor {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Serial device, overrides the configuration
        #[arg(short, long)]
        port: Option<PathBuf>,

        /// Run against a simulated coordinator instead of hardware
        #[arg(long)]
        simulate: bool,

        /// Seconds between status requests to the coordinator (0 disables polling)
        #[arg(long, default_value_t = 5)]
        poll: u64,
    },
    /// Decode a captured byte dump and print every frame
    Decode {
        file: PathBuf,

        /// The capture uses the legacy text protocol
        #[arg(long)]
        text: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Command::Monitor { config, port, simulate, poll } => monitor(config, port, simulate, poll).await,
        Command::Decode { file, text } => decode(file, text),
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_configuration(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::load(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

async fn monitor(config: Option<PathBuf>, port: Option<PathBuf>, simulate: bool, poll: u64) -> anyhow::Result<()> {
    let mut config = load_configuration(config)?;
    if port.is_some() {
        config.serial_port = port;
    }

    // Keep the simulator alive for the whole run so the link stays open.
    let (engine, _simulator) = if simulate {
        let (engine, simulator) = Buzzwire::simulate(&config);
        (engine, Some(simulator))
    } else {
        let (engine, degraded) = Buzzwire::connect_or_simulate(&config).await;
        if let Some(error) = degraded {
            for suggestion in error.recovery_suggestions() {
                warn!("  - {}", suggestion);
            }
        }
        (engine, None)
    };

    if poll > 0 {
        let poller = engine.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(poll));
            loop {
                interval.tick().await;
                if poller.request_status().await.is_err() {
                    break;
                }
            }
        });
    }

    info!("Monitoring, press Ctrl-C to stop");
    let mut events = Box::pin(engine.events());
    while let Some(event) = events.next().await {
        log_event(&event);
    }
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::DeviceError { text } => warn!("coordinator error: {}", text),
        other => match serde_yaml_ng::to_string(other) {
            Ok(yaml) => info!("{}", yaml.trim_end().replace('\n', ", ")),
            Err(_) => info!("{:?}", other),
        },
    }
}

fn decode(file: PathBuf, text: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", file.display());
    }

    let mode = if text { ProtocolMode::Text } else { ProtocolMode::Binary };
    let mut codec = FrameCodec::new(mode);
    for frame in codec.decode(&bytes) {
        println!("{:?}", frame);
    }

    let stats = codec.stats();
    if stats.frames_decoded == 0 {
        let hint = if text { "no frames found, is this a binary capture?" } else { "no frames found, try --text" };
        return Err(BuzzerError::parse(file.display().to_string(), hint).into());
    }

    info!(
        frames = stats.frames_decoded,
        discarded = stats.bytes_discarded,
        checksum_failures = stats.checksum_failures,
        lines_ignored = stats.lines_ignored,
        trailing = codec.pending(),
        "Decode finished"
    );
    Ok(())
}
