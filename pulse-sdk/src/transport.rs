//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens a [`Link`]: a pair of channels carrying outbound
//! frames to the peer and inbound frames (plus the final close) back. The
//! production connector speaks WebSocket; anything that can honor the same
//! channel contract can stand in for it.

use std::future::Future;
use std::pin::Pin;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::error::TransportError;

/// Close code for an intentional, normal shutdown.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close code reported when the channel ends without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Frames written to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

impl Outgoing {
    pub fn normal_close(reason: &str) -> Self {
        Outgoing::Close {
            code: NORMAL_CLOSE,
            reason: reason.to_string(),
        }
    }
}

/// Frames read from the peer. `Closed` is always the last item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    Closed { code: u16, reason: String },
}

/// An open channel. Dropping `outbound` asks the transport to shut down.
pub struct Link {
    pub outbound: mpsc::Sender<Outgoing>,
    pub inbound: mpsc::Receiver<Incoming>,
}

/// Parameters for one open attempt.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: Url,
    /// Bearer credential sent with the handshake.
    pub token: Option<String>,
    /// Capacity of the link's channels.
    pub buffer: usize,
}

/// Opens links to the notification server.
pub trait Connector: Send + Sync {
    fn open(&self, request: ConnectRequest) -> BoxFuture<'_, Result<Link, TransportError>>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, request: ConnectRequest) -> BoxFuture<'_, Result<Link, TransportError>> {
        Box::pin(open_ws(request))
    }
}

async fn open_ws(request: ConnectRequest) -> Result<Link, TransportError> {
    if request.url.scheme() == "wss" {
        install_crypto_provider();
    }
    let mut http_request = request.url.as_str().into_client_request()?;
    if let Some(token) = &request.token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Handshake(format!("invalid bearer token: {e}")))?;
        http_request.headers_mut().insert(AUTHORIZATION, value);
    }

    tracing::debug!(url = %redacted(&request.url), "Opening WebSocket");
    let (ws, _response) = match tokio_tungstenite::connect_async(http_request).await {
        Ok(ok) => ok,
        Err(tungstenite::Error::Http(response)) => {
            let status = response.status();
            let message = match status.as_u16() {
                401 => "unauthorized: channel requires valid credentials".to_string(),
                403 => "forbidden: access to channel denied".to_string(),
                code => format!("HTTP {code} during upgrade"),
            };
            return Err(TransportError::Handshake(message));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::debug!("WebSocket open");

    let buffer = request.buffer.max(1);
    let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(buffer);
    let (in_tx, in_rx) = mpsc::channel::<Incoming>(buffer);
    let (mut sink, mut stream) = ws.split();

    tokio::spawn(async move {
        loop {
            match out_rx.recv().await {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::debug!(error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Some(Outgoing::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let closed = loop {
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        tracing::warn!(len = data.len(), "Dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => Incoming::Closed {
                            code: u16::from(f.code),
                            reason: f.reason.as_str().to_string(),
                        },
                        None => Incoming::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: "close frame without status".to_string(),
                        },
                    };
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    break Incoming::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: e.to_string(),
                    };
                }
                None => {
                    break Incoming::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: "stream ended".to_string(),
                    };
                }
            };
            if in_tx.send(Incoming::Text(text)).await.is_err() {
                return;
            }
        };
        let _ = in_tx.send(closed).await;
    });

    Ok(Link {
        outbound: out_tx,
        inbound: in_rx,
    })
}

fn install_crypto_provider() {
    // Only the first install wins; later calls are no-ops.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Endpoint without its query string, for logs.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
