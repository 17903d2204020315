//! Ingest Tail - Push Channel and Stream Replay CLI
//!
//! Thin command-line front end for `ingest-core`. Everything interesting
//! happens in the library; this binary wires configuration, logging and
//! stdout together.
//!
//! # Usage
//!
//! ```bash
//! # Follow the default push channel, one JSON event per line
//! ingest-tail tail
//!
//! # Follow another server and channel, stop after 100 events
//! ingest-tail tail --base-url http://10.0.0.5:4096 --channel build --max-events 100
//!
//! # Replay a recorded response stream and print the resulting state
//! ingest-tail decode response.txt
//!
//! # Print every decoded event as well
//! ingest-tail decode --events - < response.txt
//!
//! # Verbose logging
//! RUST_LOG=debug ingest-tail tail
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWriteExt, Stdout};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ingest_core::session::ReaderBody;
use ingest_core::{
    default_config_path, load_config_from_path, run_coalescer, ConfigOverrides, ConnectionNotice,
    ConnectionStatus, ConversationStore, HttpPushTransport, IngestConfig, MessageId, PushConnection,
    PushEvent, SessionOptions, StoreSink, StreamEvent, StreamSession, StreamSink,
};

/// Ingest Tail - follow push channels and replay response streams
#[derive(Parser, Debug)]
#[command(name = "ingest-tail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "INGEST_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "INGEST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a push channel and print coalesced events as JSON lines
    Tail {
        /// Server base URL
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,

        /// Access token
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,

        /// Channel stamped on events without one
        #[arg(long)]
        channel: Option<String>,

        /// Coalescing window in milliseconds
        #[arg(long, value_name = "MS")]
        window_ms: Option<u64>,

        /// Stop after this many events
        #[arg(long, value_name = "N")]
        max_events: Option<u64>,
    },

    /// Decode a recorded response stream
    Decode {
        /// File to read, `-` for stdin
        input: PathBuf,

        /// Print each decoded event as a JSON line
        #[arg(long)]
        events: bool,

        /// Message id for events that carry none
        #[arg(long, value_name = "ID")]
        message_id: Option<String>,

        /// Session deadline in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },
}

impl Command {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        match self {
            Self::Tail {
                base_url,
                token,
                channel,
                window_ms,
                ..
            } => {
                overrides.base_url.clone_from(base_url);
                overrides.token.clone_from(token);
                overrides.channel.clone_from(channel);
                overrides.window_ms = *window_ms;
            }
            Self::Decode { timeout_ms, .. } => {
                overrides.session_timeout_ms = *timeout_ms;
            }
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("ingest_tail={level},ingest_core={level}"))
    });

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(args: &Args) -> Result<IngestConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.command.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    info!(source = %config.source(), "Configuration resolved");
    Ok(config)
}

async fn write_line(out: &mut Stdout, line: &str) -> Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    Ok(())
}

async fn write_batch(out: &mut Stdout, batch: &[PushEvent]) -> Result<()> {
    for event in batch {
        write_line(out, &serde_json::to_string(event)?).await?;
    }
    out.flush().await?;
    Ok(())
}

// ============================================================================
// tail
// ============================================================================

async fn run_tail(config: &IngestConfig, max_events: Option<u64>) -> Result<()> {
    let (mut connection, mut notices) =
        PushConnection::new(config.push_config(), HttpPushTransport::new())
            .context("Invalid push configuration")?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (batches_tx, mut batches_rx) = mpsc::channel(64);
    let pump = tokio::spawn(run_coalescer(
        events_rx,
        config.build_coalescer(),
        batches_tx,
    ));

    let mut stdout = tokio::io::stdout();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    connection.connect();
    let mut forwarded: u64 = 0;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for interrupt");
                }
                info!("Received interrupt, stopping");
                break;
            }
            Some(batch) = batches_rx.recv() => write_batch(&mut stdout, &batch).await?,
            notice = notices.recv() => match notice {
                Some(ConnectionNotice::Event(event)) => {
                    forwarded += 1;
                    if events_tx.send(event).is_err() {
                        break;
                    }
                    if max_events.is_some_and(|max| forwarded >= max) {
                        info!(forwarded, "Event limit reached");
                        break;
                    }
                }
                Some(ConnectionNotice::Opened) => info!("Push channel open"),
                Some(ConnectionNotice::Status(ConnectionStatus::Error)) => {
                    warn!("Push connection gave up");
                    break;
                }
                Some(ConnectionNotice::Status(status)) => info!(?status, "Push connection status"),
                Some(ConnectionNotice::Error { kind, message }) => {
                    warn!(?kind, %message, "Push channel error");
                }
                None => break,
            },
        }
    }

    connection.disconnect();
    connection.join().await;

    // Closing the input drains whatever the coalescer still holds
    drop(events_tx);
    while let Some(batch) = batches_rx.recv().await {
        write_batch(&mut stdout, &batch).await?;
    }
    let stats = pump.await.context("Coalescer task failed")?;
    let metrics = connection.metrics();

    info!(
        received = stats.received,
        superseded = stats.superseded,
        batches = stats.flushed_batches,
        forced = stats.forced_flushes,
        attempts = metrics.attempts,
        errors = metrics.errors,
        "Tail stopped"
    );
    Ok(())
}

// ============================================================================
// decode
// ============================================================================

async fn open_input(input: &Path) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if input == Path::new("-") {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open {}", input.display()))?;
    Ok(Box::new(file))
}

async fn run_decode(
    config: &IngestConfig,
    input: &Path,
    print_events: bool,
    message_id: Option<String>,
) -> Result<()> {
    let mut body = ReaderBody::new(open_input(input).await?);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let mut options = SessionOptions::new(cancel);
    if let Some(timeout) = config.session_timeout() {
        options = options.with_timeout(timeout);
    }

    let mut session = match message_id {
        Some(id) => StreamSession::for_message(MessageId::from(id)),
        None => StreamSession::new(),
    };
    let mut store = ConversationStore::new();
    let mut lines = Vec::new();

    let result = {
        let mut sink = |event: StreamEvent| {
            if print_events {
                match serde_json::to_string(&event) {
                    Ok(line) => lines.push(line),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                }
            }
            StoreSink::new(&mut store).on_event(event);
        };
        session.run(&mut body, &mut sink, options).await
    };

    let mut stdout = tokio::io::stdout();
    for line in &lines {
        write_line(&mut stdout, line).await?;
    }
    let activity: Vec<_> = store.activity().entries().collect();
    let state = json!({
        "messages": store.messages(),
        "activity": activity,
    });
    write_line(&mut stdout, &serde_json::to_string_pretty(&state)?).await?;
    stdout.flush().await?;

    let outcome = result.context("Stream read failed")?;
    let stats = session.stats();
    info!(
        ?outcome,
        chunks = stats.chunks,
        bytes = stats.bytes,
        events = stats.events,
        messages = store.message_count(),
        "Decode finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "ingest-tail starting");

    let config = resolve_config(&args)?;

    match args.command {
        Command::Tail { max_events, .. } => run_tail(&config, max_events).await,
        Command::Decode {
            input,
            events,
            message_id,
            ..
        } => run_decode(&config, &input, events, message_id).await,
    }
}
