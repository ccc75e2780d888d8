//! RealtimeChannel trait for the live bidirectional event transport.
//!
//! Implementations:
//! - `LoopbackChannel` - In-process hub, for testing
//! - `WebSocketChannel` (in doc-sync-client) - JSON text frames over tokio-tungstenite
//!
//! Sends are fire-and-forget and never suspend. Delivery is at-most-once and
//! ordered only per sender on a single connection; nothing here assumes an
//! order across two different senders.

use crate::document::Document;
use crate::events::Subscription;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum inbound frame size (16MB). Larger frames are dropped.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Channel closed")]
    Closed,

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Send failed: {0}")]
    Send(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Handler invoked with every full document snapshot that arrives.
pub type DocumentHandler = Box<dyn Fn(Document) + Send + Sync>;

/// Live channel to the realtime server and, through it, to peers.
pub trait RealtimeChannel: Send + Sync {
    /// Ask the server for the current document (`request-document`).
    fn request_document(&self) -> Result<()>;

    /// Relay a local change to peers (`edit-document`).
    fn broadcast_edit(&self, doc: &Document) -> Result<()>;

    /// Relay an explicit save to peers (`save-document`).
    fn broadcast_save(&self, doc: &Document) -> Result<()>;

    /// Register for incoming `document` snapshots. Dropping the handle revokes it.
    fn on_document(&self, handler: DocumentHandler) -> Subscription;

    /// Close the connection. Later sends fail with `ChannelError::Closed`.
    fn close(&self);
}

/// A frame on the realtime channel.
///
/// Encoded as a JSON object tagged by `event`, e.g.
/// `{"event":"edit-document","document":{"content":"..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ChannelMessage {
    /// Client to server, no payload
    RequestDocument,
    /// Server or peer to client
    Document { document: Document },
    /// Client to peers, on every local change
    EditDocument { document: Document },
    /// Client to peers, on explicit save
    SaveDocument { document: Document },
}

impl ChannelMessage {
    /// Wire name of this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RequestDocument => "request-document",
            Self::Document { .. } => "document",
            Self::EditDocument { .. } => "edit-document",
            Self::SaveDocument { .. } => "save-document",
        }
    }

    /// The carried snapshot, if this event has one.
    pub fn document(&self) -> Option<&Document> {
        match self {
            Self::RequestDocument => None,
            Self::Document { document }
            | Self::EditDocument { document }
            | Self::SaveDocument { document } => Some(document),
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::RequestDocument => None,
            Self::Document { document }
            | Self::EditDocument { document }
            | Self::SaveDocument { document } => Some(document),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ChannelError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame.
    ///
    /// Returns None if the data is not JSON or not a known event.
    pub fn from_text(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_document_frame() {
        let text = ChannelMessage::RequestDocument.to_text().unwrap();
        assert_eq!(text, r#"{"event":"request-document"}"#);
        assert_eq!(ChannelMessage::from_text(&text), Some(ChannelMessage::RequestDocument));
    }

    #[test]
    fn test_edit_frame_carries_full_document() {
        let msg = ChannelMessage::EditDocument {
            document: Document::persisted("doc1", "hello"),
        };
        let text = msg.to_text().unwrap();
        assert!(text.contains("\"event\":\"edit-document\""));
        assert!(text.contains("\"id\":\"doc1\""));

        let parsed = ChannelMessage::from_text(&text).unwrap();
        assert_eq!(parsed.event_name(), "edit-document");
        assert_eq!(parsed.into_document(), Some(Document::persisted("doc1", "hello")));
    }

    #[test]
    fn test_unknown_event_returns_none() {
        assert!(ChannelMessage::from_text(r#"{"event":"cursor","x":1}"#).is_none());
        assert!(ChannelMessage::from_text("not json at all").is_none());
    }

    #[test]
    fn test_document_frame_without_id() {
        let parsed = ChannelMessage::from_text(r#"{"event":"document","document":{"content":"x"}}"#).unwrap();
        assert_eq!(parsed.document(), Some(&Document::with_content("x")));
    }
}
