//! pulse-tail: follow a user's dashboard notifications from the terminal.
//!
//! Connects to the notification channel, prints every event as one JSON
//! line on stdout and, with `--mark-read`, acknowledges each notification.
//! Logs go to stderr. Ctrl+C disconnects cleanly.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pulse_sdk::{ClientConfig, Event, EventKind, NotificationClient, NotificationId, Subscription};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::config::TailConfig;

const DEFAULT_LOG_FILTER: &str = "pulse_sdk=info,pulse_tail=info";

#[derive(Parser, Debug)]
#[command(name = "pulse-tail", about = "Print dashboard notifications as JSON lines")]
struct Args {
    /// User to subscribe as
    #[arg(long, env = "PULSE_USER_ID")]
    user_id: Option<String>,

    /// Bearer token sent with the handshake
    #[arg(long, env = "PULSE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// HTTP API base (the channel endpoint is derived from it)
    #[arg(long)]
    api_url: Option<String>,

    /// Explicit WebSocket base, overriding the derived one
    #[arg(long)]
    ws_url: Option<String>,

    /// Config file (default: ~/.config/pulse/client.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Acknowledge each notification as it is printed
    #[arg(long)]
    mark_read: bool,

    /// Emit logs as JSON (or set PULSE_LOG_JSON=1)
    #[arg(long)]
    json_logs: bool,
}

/// Everything needed to run, after file, env and flags are merged.
#[derive(Debug)]
struct Settings {
    client: ClientConfig,
    user_id: String,
    token: Option<String>,
    mark_read: bool,
}

impl Args {
    /// Flags win over the file. `client` already carries env overrides.
    fn merge(self, file: TailConfig, mut client: ClientConfig) -> Result<Settings> {
        if let Some(api_url) = self.api_url {
            client.api_url = api_url;
        }
        if let Some(ws_url) = self.ws_url {
            client.ws_url = Some(ws_url);
        }
        let Some(user_id) = self.user_id.or(file.user_id) else {
            bail!("no user id: pass --user-id, set PULSE_USER_ID or add user_id to the config file");
        };
        Ok(Settings {
            client,
            user_id,
            token: self.token.or(file.token),
            mark_read: self.mark_read || file.mark_read.unwrap_or(false),
        })
    }
}

fn init_logging(json: bool) -> Result<()> {
    let json = json || std::env::var("PULSE_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}

/// The id a notification should be acknowledged with, if it carries one.
fn notification_id(data: &Value) -> Option<NotificationId> {
    let id = data.get("id").or_else(|| data.get("notification_id"))?;
    match id {
        Value::Number(n) => n.as_i64().map(NotificationId::from),
        Value::String(s) if !s.is_empty() => Some(NotificationId::from(s.as_str())),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs)?;

    let file = TailConfig::load(args.config.as_deref())?;
    let mut client_config = file.client.clone();
    client_config.apply_env();
    let settings = args.merge(file, client_config)?;

    let client = NotificationClient::new(settings.client);
    let (tx, mut events) = mpsc::unbounded_channel::<Event>();
    let _subscriptions: Vec<Subscription> = EventKind::ALL
        .into_iter()
        .map(|kind| {
            let tx = tx.clone();
            client.on(kind, move |event| {
                tx.send(event.clone())
                    .map_err(|_| anyhow::anyhow!("printer stopped"))
            })
        })
        .collect();
    drop(tx);

    client
        .connect(settings.user_id.clone(), settings.token)
        .await
        .context("failed to open notification channel")?;
    tracing::info!(user_id = %settings.user_id, "Tailing notifications. Ctrl+C to stop.");

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, disconnecting");
                break Ok(());
            }
            event = events.recv() => {
                let Some(event) = event else { break Ok(()) };
                println!("{}", serde_json::to_string(&event)?);

                match event.kind {
                    EventKind::Notification if settings.mark_read => {
                        match notification_id(&event.data) {
                            Some(id) => {
                                if let Err(e) = client.mark_read(id) {
                                    tracing::warn!(error = %e, "Failed to acknowledge notification");
                                }
                            }
                            None => tracing::debug!("Notification without id, not acknowledging"),
                        }
                    }
                    EventKind::ConnectionFailed => {
                        break Err(anyhow::anyhow!("gave up reconnecting: {}", event.data));
                    }
                    _ => {}
                }
            }
        }
    };

    client.disconnect();
    outcome
}
