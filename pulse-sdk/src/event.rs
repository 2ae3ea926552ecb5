//! Events the client dispatches to subscribers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kinds of event a subscriber can register for.
///
/// Every inbound wire tag that is dispatched has a variant here, plus the
/// synthetic [`EventKind::ConnectionFailed`] emitted once reconnection gives
/// up. `pong` is consumed by the codec and never dispatched, so it has no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Server greeting sent right after the channel opens.
    Welcome,
    /// A notification addressed to this user.
    Notification,
    /// A broadcast notification from the system.
    SystemNotification,
    /// Acknowledgement of a `mark_read` command.
    MarkedRead,
    /// Server-side error report.
    Error,
    /// Reconnection attempts were exhausted.
    ConnectionFailed,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::Welcome,
        EventKind::Notification,
        EventKind::SystemNotification,
        EventKind::MarkedRead,
        EventKind::Error,
        EventKind::ConnectionFailed,
    ];

    /// The wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Welcome => "welcome",
            EventKind::Notification => "notification",
            EventKind::SystemNotification => "system_notification",
            EventKind::MarkedRead => "marked_read",
            EventKind::Error => "error",
            EventKind::ConnectionFailed => "connection_failed",
        }
    }

    /// Map an inbound wire tag to a dispatchable kind.
    ///
    /// `connection_failed` is only ever produced locally, so a server frame
    /// carrying that tag is not recognized.
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "welcome" => Some(EventKind::Welcome),
            "notification" => Some(EventKind::Notification),
            "system_notification" => Some(EventKind::SystemNotification),
            "marked_read" => Some(EventKind::MarkedRead),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded event, handed to every listener registered for its kind.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The frame's `data` payload (`Null` when absent).
    pub data: serde_json::Value,
    /// Server-supplied timestamp string, if any.
    pub timestamp: Option<String>,
    /// When this client decoded the frame.
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, data: serde_json::Value, timestamp: Option<String>) -> Self {
        Self {
            kind,
            data,
            timestamp,
            received_at: Utc::now(),
        }
    }

    /// The synthetic terminal event emitted after the reconnect ceiling.
    pub fn connection_failed(attempts: u32, reason: &str) -> Self {
        Self::new(
            EventKind::ConnectionFailed,
            serde_json::json!({ "attempts": attempts, "reason": reason }),
            Some(Utc::now().to_rfc3339()),
        )
    }
}
