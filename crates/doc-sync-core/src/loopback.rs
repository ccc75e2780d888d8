//! In-process realtime hub for testing and local-only sessions.
//!
//! `LoopbackHub` plays the realtime server: it keeps the server-side
//! document, answers `request-document` to the requester only, and relays
//! `edit-document` / `save-document` to every other participant as a
//! document snapshot. Frames pass through the JSON wire encoding so the
//! hub exercises the same codec as a networked channel.

use crate::channel::{ChannelError, ChannelMessage, DocumentHandler, RealtimeChannel, Result};
use crate::document::Document;
use crate::events::{EventBus, Subscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct HubInner {
    /// Server-side copy, replaced on every `save-document`
    document: Mutex<Document>,
    /// Attached participants by connection id
    participants: Mutex<HashMap<usize, Arc<EventBus<Document>>>>,
    next_id: AtomicUsize,
}

impl HubInner {
    fn document(&self) -> Document {
        self.document.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Collect matching buses, releasing the lock before any handler runs.
    fn buses(&self, include: impl Fn(usize) -> bool) -> Vec<Arc<EventBus<Document>>> {
        self.participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| include(**id))
            .map(|(_, bus)| Arc::clone(bus))
            .collect()
    }

    fn detach(&self, id: usize) {
        self.participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    fn route(&self, from: usize, frame: &str) {
        let Some(msg) = ChannelMessage::from_text(frame) else {
            warn!("Hub dropped malformed frame from conn-{}", from);
            return;
        };
        debug!("Hub routing {} from conn-{}", msg.event_name(), from);

        let (document, targets) = match msg {
            ChannelMessage::RequestDocument => (self.document(), self.buses(|id| id == from)),
            ChannelMessage::SaveDocument { document } => {
                *self.document.lock().unwrap_or_else(|e| e.into_inner()) = document.clone();
                (document, self.buses(|id| id != from))
            }
            ChannelMessage::EditDocument { document } | ChannelMessage::Document { document } => {
                (document, self.buses(|id| id != from))
            }
        };

        for bus in targets {
            bus.emit(document.clone());
        }
    }
}

/// Realtime server stand-in shared by several participants.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the hub holding `doc` as the server-side document.
    pub fn with_document(doc: Document) -> Self {
        let hub = Self::new();
        *hub.inner.document.lock().unwrap_or_else(|e| e.into_inner()) = doc;
        hub
    }

    /// Attach a new participant.
    pub fn connect(&self) -> Arc<LoopbackChannel> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let documents = Arc::new(EventBus::new());
        self.inner
            .participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::clone(&documents));

        Arc::new(LoopbackChannel {
            id,
            hub: Arc::clone(&self.inner),
            documents,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Current server-side document.
    pub fn document(&self) -> Document {
        self.inner.document()
    }

    /// Server-initiated push of `doc` to every participant.
    pub fn push(&self, doc: Document) {
        *self.inner.document.lock().unwrap_or_else(|e| e.into_inner()) = doc.clone();
        for bus in self.inner.buses(|_| true) {
            bus.emit(doc.clone());
        }
    }

    pub fn participant_count(&self) -> usize {
        self.inner
            .participants
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// One participant's connection to a `LoopbackHub`.
pub struct LoopbackChannel {
    id: usize,
    hub: Arc<HubInner>,
    documents: Arc<EventBus<Document>>,
    /// Every frame this participant sent, in order
    sent: Mutex<Vec<ChannelMessage>>,
    closed: AtomicBool,
}

impl LoopbackChannel {
    /// Frames sent so far.
    pub fn sent(&self) -> Vec<ChannelMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of live `on_document` handlers.
    pub fn subscriber_count(&self) -> usize {
        self.documents.subscriber_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, msg: ChannelMessage) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let frame = msg.to_text()?;
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(msg);
        self.hub.route(self.id, &frame);
        Ok(())
    }
}

impl RealtimeChannel for LoopbackChannel {
    fn request_document(&self) -> Result<()> {
        self.send(ChannelMessage::RequestDocument)
    }

    fn broadcast_edit(&self, doc: &Document) -> Result<()> {
        self.send(ChannelMessage::EditDocument { document: doc.clone() })
    }

    fn broadcast_save(&self, doc: &Document) -> Result<()> {
        self.send(ChannelMessage::SaveDocument { document: doc.clone() })
    }

    fn on_document(&self, handler: DocumentHandler) -> Subscription {
        self.documents.subscribe(handler)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.detach(self.id);
        }
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        self.hub.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(channel: &LoopbackChannel) -> (Arc<Mutex<Vec<Document>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = channel.on_document(Box::new(move |doc: Document| {
            seen_clone.lock().unwrap().push(doc);
        }));
        (seen, sub)
    }

    #[test]
    fn test_request_document_answers_requester_only() {
        let hub = LoopbackHub::with_document(Document::persisted("doc1", "server copy"));
        let a = hub.connect();
        let b = hub.connect();
        let (seen_a, _sub_a) = recorder(&a);
        let (seen_b, _sub_b) = recorder(&b);

        a.request_document().unwrap();

        assert_eq!(*seen_a.lock().unwrap(), vec![Document::persisted("doc1", "server copy")]);
        assert!(seen_b.lock().unwrap().is_empty());
    }

    #[test]
    fn test_edit_is_relayed_to_others_not_sender() {
        let hub = LoopbackHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let (seen_a, _sub_a) = recorder(&a);
        let (seen_b, _sub_b) = recorder(&b);

        a.broadcast_edit(&Document::with_content("typing")).unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(*seen_b.lock().unwrap(), vec![Document::with_content("typing")]);
        assert_eq!(hub.document(), Document::new());
    }

    #[test]
    fn test_save_updates_server_document() {
        let hub = LoopbackHub::new();
        let a = hub.connect();

        a.broadcast_save(&Document::persisted("doc1", "saved")).unwrap();

        assert_eq!(hub.document(), Document::persisted("doc1", "saved"));
        assert_eq!(
            a.sent(),
            vec![ChannelMessage::SaveDocument {
                document: Document::persisted("doc1", "saved")
            }]
        );
    }

    #[test]
    fn test_closed_channel_rejects_sends_and_detaches() {
        let hub = LoopbackHub::new();
        let a = hub.connect();
        assert_eq!(hub.participant_count(), 1);

        a.close();

        assert!(matches!(a.request_document(), Err(ChannelError::Closed)));
        assert_eq!(hub.participant_count(), 0);
        assert!(a.sent().is_empty());
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let hub = LoopbackHub::new();
        let a = hub.connect();
        let (seen, sub) = recorder(&a);

        hub.push(Document::with_content("one"));
        drop(sub);
        hub.push(Document::with_content("two"));

        assert_eq!(*seen.lock().unwrap(), vec![Document::with_content("one")]);
        assert_eq!(a.subscriber_count(), 0);
    }
}
