//! Chatbridge agent binary.
//!
//! Reads harness commands as JSON lines on stdin and writes injections on
//! stdout. Logs go to stderr so they never mix with the protocol stream.

use chatbridge_agent::{
    config,
    harness::{self, HarnessCommand, StdioView},
    Agent, LinkClient,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Observed events buffered between stdin and the agent loop.
const OBSERVER_QUEUE_DEPTH: usize = 256;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CHATBRIDGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("chatbridge.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the agent cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        url = %config.link.url,
        "starting chatbridge agent"
    );

    let (link, replies) = LinkClient::new(config.link.settings());
    let (view, mut injections) = StdioView::new();
    let (observed_tx, observed_rx) = mpsc::channel(OBSERVER_QUEUE_DEPTH);

    let agent = Agent::new(link, view.clone(), config.dedup.tracker_settings());
    let agent_task = tokio::spawn(agent.run(observed_rx, replies));

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = injections.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                tracing::error!("stdout closed, injections will be lost");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("failed to read stdin: {}", e);
                break;
            }
        };
        match harness::parse_line(&line) {
            None => {}
            Some(Ok(HarnessCommand::Focus { label })) => view.focus(label),
            Some(Ok(HarnessCommand::Observe(wire))) => {
                if observed_tx.send(wire.into()).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => tracing::warn!("ignoring malformed harness command: {}", e),
        }
    }

    drop(observed_tx);
    if let Err(e) = agent_task.await {
        tracing::error!("agent task failed: {}", e);
    }
    drop(view);
    let _ = writer.await;
    tracing::info!("chatbridge agent shut down");
}
