//! Realtime channel over a WebSocket connection.
//!
//! The stream is split into read and write halves, each driven by its own
//! task. Sends push onto an unbounded queue drained by the writer, so the
//! `RealtimeChannel` methods never suspend. The reader decodes JSON text
//! frames and hands every document snapshot to the subscribers.

use doc_sync_core::channel::{ChannelError, ChannelMessage, DocumentHandler, RealtimeChannel, Result, MAX_FRAME_SIZE};
use doc_sync_core::{Document, EventBus, Subscription};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketChannel {
    /// Queue drained by the write task
    outgoing: mpsc::UnboundedSender<Message>,
    /// Subscribers for incoming document snapshots
    documents: Arc<EventBus<Document>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    write_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WebSocketChannel {
    /// Connect to the realtime endpoint and start the read/write tasks.
    pub async fn connect(url: &Url) -> Result<Self> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        info!("Connected to realtime server at {}", url);

        let (write, read) = ws_stream.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let documents = Arc::new(EventBus::new());

        let write_task = tokio::spawn(Self::write_loop(write, outgoing_rx));
        let read_task = tokio::spawn(Self::read_loop(read, Arc::clone(&documents)));

        Ok(Self {
            outgoing,
            documents,
            read_task: Mutex::new(Some(read_task)),
            write_task: Mutex::new(Some(write_task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Write loop: forwards queued frames until the queue closes or a close frame goes out.
    async fn write_loop(mut write: SplitSink<WsStream, Message>, mut outgoing: mpsc::UnboundedReceiver<Message>) {
        while let Some(msg) = outgoing.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        debug!("Realtime connection closed while sending");
                    }
                    _ => error!("Realtime send failed: {}", e),
                }
                break;
            }
            if closing {
                break;
            }
        }
        debug!("Realtime write loop ended");
    }

    /// Read loop: decodes frames and emits document snapshots.
    async fn read_loop(mut read: SplitStream<WsStream>, documents: Arc<EventBus<Document>>) {
        while let Some(result) = read.next().await {
            let text = match result {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len());
                        continue;
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Received close frame from realtime server");
                    break;
                }
                Ok(_) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    debug!("Realtime connection closed");
                    break;
                }
                Err(e) => {
                    error!("Realtime connection error: {}", e);
                    break;
                }
            };

            if text.len() > MAX_FRAME_SIZE {
                warn!(
                    "Frame exceeds max size ({} > {}), dropping",
                    text.len(),
                    MAX_FRAME_SIZE
                );
                continue;
            }

            match ChannelMessage::from_text(&text) {
                Some(ChannelMessage::RequestDocument) => {
                    debug!("Ignoring request-document addressed to a client");
                }
                Some(msg) => {
                    debug!("Received {} ({} bytes)", msg.event_name(), text.len());
                    if let Some(doc) = msg.into_document() {
                        documents.emit(doc);
                    }
                }
                None => warn!("Dropping malformed frame ({} bytes)", text.len()),
            }
        }
        debug!("Realtime read loop ended");
    }

    fn send(&self, msg: ChannelMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let text = msg.to_text()?;
        debug!("Sending {} ({} bytes)", msg.event_name(), text.len());
        self.outgoing
            .send(Message::Text(text.into()))
            .map_err(|_| ChannelError::Send("connection writer has stopped".to_string()))
    }

    fn abort_tasks(&self) {
        for task in [&self.read_task, &self.write_task] {
            if let Some(task) = task.lock().unwrap_or_else(|e| e.into_inner()).take() {
                task.abort();
            }
        }
    }
}

impl RealtimeChannel for WebSocketChannel {
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

    /// Queue a close frame and stop reading. The writer exits after flushing it.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outgoing.send(Message::Close(None));
        if let Some(task) = self.read_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        info!("Realtime channel closed");
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
