//! Phoenix Ports host
//!
//! Reads `{tag, data}` command envelopes from stdin, one per line, and writes
//! events to stdout the same way. Logs go to stderr.

use anyhow::Context;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use phoenix_ports_client::{Bridge, PhoenixConnector};
use phoenix_ports_shared::{tags, Envelope, Event};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; stdout carries events
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phoenix_ports=info,phoenix_ports_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    tracing::info!(
        "Starting with timeout {:?}, heartbeat {:?}",
        config.socket.timeout,
        config.socket.heartbeat_interval
    );

    let (command_tx, command_rx) = unbounded::<Envelope>();
    let (event_tx, event_rx) = unbounded::<Event>();

    if let Some(endpoint) = &config.autoconnect {
        tracing::info!("Connecting default socket to {}", endpoint);
        command_tx
            .unbounded_send(Envelope::new(
                tags::CREATE_SOCKET,
                json!({ "endpoint": endpoint }),
            ))
            .context("queueing autoconnect")?;
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let reader = tokio::spawn(read_commands(stdin, command_tx));
    let writer = tokio::spawn(write_events(event_rx));

    let bridge = Bridge::new(PhoenixConnector::new(config.socket), event_tx);
    bridge.run(command_rx).await;

    // The bridge only stops once the reader has dropped its sender
    match reader.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Command reader failed: {:#}", e),
        Err(e) => tracing::error!("Command reader panicked: {}", e),
    }
    writer.await.context("event writer panicked")??;
    tracing::info!("Shut down");
    Ok(())
}

/// Forward input lines as envelopes until EOF.
///
/// Lines that are not UTF-8 or not an envelope are logged and skipped.
async fn read_commands<R>(mut input: R, commands: UnboundedSender<Envelope>) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf).await.context("reading stdin")? == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                tracing::error!("Skipping command line that is not UTF-8: {}", e);
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => {
                if commands.unbounded_send(envelope).is_err() {
                    break;
                }
            }
            Err(e) => tracing::error!("Skipping unparsable command line: {}", e),
        }
    }
    tracing::debug!("stdin closed");
    Ok(())
}

/// Write each event as one JSON line on stdout.
async fn write_events(mut events: UnboundedReceiver<Event>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.next().await {
        let mut line = serde_json::to_vec(&event).context("serializing event")?;
        line.push(b'\n');
        stdout.write_all(&line).await.context("writing stdout")?;
        stdout.flush().await.context("flushing stdout")?;
    }
    Ok(())
}
