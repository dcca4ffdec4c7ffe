//! collab-watch: follow a collaboration session from the terminal.
//!
//! Connects a [`SessionStore`] to a live endpoint and logs every published
//! snapshot and forwarded edit until the channel ends or Ctrl-C.
//!
//! ```bash
//! RUST_LOG=debug collab-watch --session design-review --user u1 --name "Ann Lee"
//! collab-watch --server wss://collab.example.com/ws --session doc-42 --user u7 --name Bo --json
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};

use collab_presence::{ClientConfig, SessionEvent, SessionState, SessionStore, StalePolicy};

/// Follow a collaboration session and log presence changes.
#[derive(Parser, Debug)]
#[command(name = "collab-watch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Collaboration endpoint
    #[arg(long, default_value = "ws://127.0.0.1:9090")]
    server: String,

    /// Session (document) to join
    #[arg(long)]
    session: String,

    /// Our user id
    #[arg(long)]
    user: String,

    /// Display name sent with the connection
    #[arg(long)]
    name: String,

    /// Handshake timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Forget collaborators as soon as the channel drops
    #[arg(long)]
    clear_on_close: bool,

    /// Print each snapshot as one JSON line on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let policy = if self.clear_on_close {
            StalePolicy::Clear
        } else {
            StalePolicy::Freeze
        };
        let mut config = ClientConfig::default()
            .with_server_url(self.server.as_str())
            .with_stale_policy(policy);
        config.connect_timeout = Duration::from_secs(self.connect_timeout);
        config
    }
}

fn report(state: &SessionState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(state)?);
        return Ok(());
    }

    let current = state.current_user_id.as_deref().unwrap_or_default();
    let others: Vec<String> = state
        .collaborators
        .others(current)
        .iter()
        .map(|c| match &c.cursor {
            Some(cursor) => format!("{} @ ({:.0}, {:.0})", c.name, cursor.x, cursor.y),
            None => c.name.clone(),
        })
        .collect();

    info!(
        "{:?} | {} collaborator(s): {}",
        state.phase,
        others.len(),
        others.join(", ")
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Starting collab-watch for session {}...", cli.session);

    let mut store = SessionStore::new(cli.config());
    let mut events = store
        .take_event_rx()
        .context("session event receiver already taken")?;
    let mut state = store.subscribe();

    store.connect(&cli.session, &cli.user, &cli.name);

    let outcome = loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = state.borrow_and_update().clone();
                report(&snapshot, cli.json)?;
            }
            Some(event) = events.recv() => match event {
                SessionEvent::Connected => info!("Connected to {}", cli.server),
                SessionEvent::RemoteEdit(edit) => {
                    info!("Edit from {} at {}: {}", edit.user_id, edit.timestamp, edit.data);
                }
                SessionEvent::Closed => {
                    warn!("Channel closed by server");
                    break Ok(());
                }
                SessionEvent::Failed(reason) => break Err(reason),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
        }
    };

    store.disconnect();
    store.shutdown().await;

    if let Err(reason) = outcome {
        bail!("connection failed: {reason}");
    }
    Ok(())
}
