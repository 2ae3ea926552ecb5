//! Real-time notification client for the dashboard backend.
//!
//! Keeps one authenticated WebSocket channel open per user, decodes the
//! server's JSON frames into [`Event`]s and fans them out to listeners
//! registered per [`EventKind`]. Lost connections are retried with
//! exponential backoff; a heartbeat keeps idle channels alive.
//!
//! ```no_run
//! use pulse_sdk::{ClientConfig, EventKind, NotificationClient};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = NotificationClient::new(ClientConfig::from_env());
//! let _sub = client.on(EventKind::Notification, |event| {
//!     println!("{}", event.data);
//!     Ok(())
//! });
//! client.connect("42", Some("token".into())).await?;
//! client.mark_read(7)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod reconnect;
pub mod registry;
pub mod transport;

pub use client::{ClientBuilder, ConnectionStatus, NotificationClient, TokenSource};
pub use codec::{Command, NotificationId};
pub use config::ClientConfig;
pub use error::{ClientError, TransportError};
pub use event::{Event, EventKind};
pub use reconnect::ReconnectPolicy;
pub use registry::{Listener, ListenerRegistry, Subscription};
