//! SyncController: owns the local document state for one editing session.
//!
//! Reconciles three update sources:
//! - local edits from the editing surface (`on_local_edit`)
//! - confirmed responses from the remote store (`load`, `save`, `merge_update`)
//! - snapshots from the realtime channel (`on_remote_document`)
//!
//! Only one persistence operation may be outstanding at a time. A second one
//! is rejected with `SyncError::Busy` instead of being queued. Local edits and
//! remote snapshots are never blocked by an in-flight request; whichever
//! write lands last wins.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! await point or while calling into the channel or a callback.

use crate::cache::LocalCache;
use crate::channel::{self, RealtimeChannel};
use crate::conflict::{self, Resolution};
use crate::document::{Document, DocumentPatch};
use crate::events::Subscription;
use crate::persistence::{PersistError, PersistenceClient};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// What the session is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Loading,
    Saving,
    Merging,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Another persistence operation is still outstanding.
    #[error("Busy: another persistence operation is in flight")]
    Busy,

    #[error("Fetch failed: {0}")]
    Fetch(PersistError),

    #[error("Save failed: {0}")]
    Save(PersistError),

    #[error("Merge failed: {0}")]
    Merge(PersistError),

    /// The remote rejected the write because our basis version is stale.
    #[error("Document {0} changed remotely; re-fetch before merging again")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

type ConflictCallback = Box<dyn Fn(&str) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&PersistError) + Send + Sync>;

/// Caller-supplied notifications, one per failure origin.
///
/// Each fires at most once per failed operation, after the busy flag has been
/// released, so a callback may schedule a retry immediately.
#[derive(Default)]
pub struct SyncCallbacks {
    conflict: Option<ConflictCallback>,
    fetch_error: Option<ErrorCallback>,
    save_error: Option<ErrorCallback>,
    merge_error: Option<ErrorCallback>,
}

impl SyncCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the document id when a write is rejected as stale.
    pub fn on_conflict(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.conflict = Some(Box::new(f));
        self
    }

    pub fn on_fetch_error(mut self, f: impl Fn(&PersistError) + Send + Sync + 'static) -> Self {
        self.fetch_error = Some(Box::new(f));
        self
    }

    pub fn on_save_error(mut self, f: impl Fn(&PersistError) + Send + Sync + 'static) -> Self {
        self.save_error = Some(Box::new(f));
        self
    }

    pub fn on_merge_error(mut self, f: impl Fn(&PersistError) + Send + Sync + 'static) -> Self {
        self.merge_error = Some(Box::new(f));
        self
    }
}

/// Which persistence call a failure came from.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Fetch,
    Save,
    Merge,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Fetch => write!(f, "fetch"),
            Operation::Save => write!(f, "save"),
            Operation::Merge => write!(f, "merge"),
        }
    }
}

struct SyncState {
    current: Document,
    status: SyncStatus,
    cache: LocalCache,
    /// Whether channel deliveries are still accepted
    connected: bool,
}

/// Last-writer-wins replacement. No version check.
fn replace_current(state: &mut SyncState, doc: Document) {
    if let Some(id) = doc.id.clone() {
        state.cache.put(id, doc.clone());
    }
    state.current = doc;
}

/// State reachable from channel handlers. Handlers hold it weakly.
struct Shared {
    state: Mutex<SyncState>,
    callbacks: SyncCallbacks,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adopt a confirmed response from the remote store.
    fn commit(&self, doc: Document) {
        let mut state = self.lock();
        match doc.id.clone() {
            Some(id) => state.cache.put(id, doc.clone()),
            None => warn!("Remote store returned a document without an id, not caching"),
        }
        state.current = doc;
    }

    fn apply_remote(&self, doc: Document) {
        debug!("Applying remote document {:?}", doc.id);
        replace_current(&mut self.lock(), doc);
    }

    /// Channel delivery. Checked under the state lock, so nothing lands
    /// once `disconnect` has returned, even from an emit already under way.
    fn deliver(&self, doc: Document) {
        let mut state = self.lock();
        if !state.connected {
            debug!("Session torn down, ignoring document {:?}", doc.id);
            return;
        }
        debug!("Applying delivered document {:?}", doc.id);
        replace_current(&mut state, doc);
    }
}

/// Resets the status to `Idle` when an operation ends, including when its
/// future is dropped mid-flight.
struct BusyGuard<'a> {
    shared: &'a Shared,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().status = SyncStatus::Idle;
    }
}

/// Synchronization controller for a single session.
///
/// Owns its persistence client and realtime channel; the channel is closed
/// when the session disconnects or the controller is dropped.
pub struct SyncController<P, C>
where
    P: PersistenceClient + ?Sized,
    C: RealtimeChannel + ?Sized,
{
    persistence: Arc<P>,
    channel: Arc<C>,
    shared: Arc<Shared>,
    /// Present while connected. Dropped before the channel is closed.
    subscription: Mutex<Option<Subscription>>,
    /// Set by `disconnect`; the channel is closed and cannot be reused.
    torn_down: AtomicBool,
}

impl<P, C> SyncController<P, C>
where
    P: PersistenceClient + ?Sized,
    C: RealtimeChannel + ?Sized,
{
    /// Create a session starting from an empty, unsaved document.
    pub fn new(persistence: Arc<P>, channel: Arc<C>, callbacks: SyncCallbacks) -> Self {
        Self {
            persistence,
            channel,
            shared: Arc::new(Shared {
                state: Mutex::new(SyncState {
                    current: Document::new(),
                    status: SyncStatus::Idle,
                    cache: LocalCache::new(),
                    connected: false,
                }),
                callbacks,
            }),
            subscription: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Subscribe to incoming documents and ask the server for the current one.
    ///
    /// Calling this again while connected does nothing. A session is
    /// connected at most once: after `disconnect` the channel is closed and
    /// this only logs a warning.
    pub fn connect(&self) {
        {
            let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
            if subscription.is_some() {
                return;
            }
            if self.torn_down.load(Ordering::SeqCst) {
                warn!("Session was disconnected, not reconnecting a closed channel");
                return;
            }
            self.shared.lock().connected = true;
            let shared = Arc::downgrade(&self.shared);
            *subscription = Some(self.channel.on_document(Box::new(move |doc: Document| {
                if let Some(shared) = shared.upgrade() {
                    shared.deliver(doc);
                }
            })));
        }

        info!("Session connected, requesting document");
        if let Err(e) = self.channel.request_document() {
            warn!("Failed to request document: {}", e);
        }
    }

    /// Tear down: stop accepting deliveries, unsubscribe, then close the channel.
    pub fn disconnect(&self) {
        self.shared.lock().connected = false;
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(subscription) = subscription {
            self.torn_down.store(true, Ordering::SeqCst);
            subscription.cancel();
            self.channel.close();
            info!("Session disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    // ========================================================================
    // Persistence operations
    // ========================================================================

    /// Load a document, from the session cache when possible.
    pub async fn load(&self, id: &str) -> Result<Document> {
        let guard = self.begin(SyncStatus::Loading)?;

        {
            let mut state = self.shared.lock();
            if let Some(cached) = state.cache.get(id).cloned() {
                debug!("Cache hit for {}", id);
                state.current = cached.clone();
                return Ok(cached);
            }
        }

        debug!("Cache miss for {}, fetching", id);
        self.fetch(guard, id).await
    }

    /// Fetch `id` from the remote store, skipping the cache.
    ///
    /// The cache is never invalidated, so this is how a session gets a fresh
    /// basis after a conflict. The response replaces the cached entry.
    pub async fn refresh(&self, id: &str) -> Result<Document> {
        let guard = self.begin(SyncStatus::Loading)?;
        debug!("Refreshing {}", id);
        self.fetch(guard, id).await
    }

    async fn fetch(&self, guard: BusyGuard<'_>, id: &str) -> Result<Document> {
        match self.persistence.fetch(id).await {
            Ok(doc) => {
                self.shared.commit(doc.clone());
                info!("Loaded document {}", id);
                Ok(doc)
            }
            Err(err) => {
                drop(guard);
                Err(self.fail(Operation::Fetch, Some(id), err))
            }
        }
    }

    /// Persist `doc` as a new document and relay the save to peers.
    pub async fn save(&self, doc: Document) -> Result<Document> {
        let guard = self.begin(SyncStatus::Saving)?;

        self.broadcast("save-document", |channel| channel.broadcast_save(&doc));

        match self.persistence.create(&doc).await {
            Ok(saved) => {
                info!("Saved document {:?}", saved.id);
                self.shared.commit(saved.clone());
                Ok(saved)
            }
            Err(err) => {
                drop(guard);
                Err(self.fail(Operation::Save, doc.id(), err))
            }
        }
    }

    /// Apply `patch` to the remote's copy of `id`.
    ///
    /// On conflict the conflict callback fires and the current document is
    /// left untouched; the caller must re-fetch or merge again with a fresh basis.
    pub async fn merge_update(&self, id: &str, patch: DocumentPatch) -> Result<Document> {
        let guard = self.begin(SyncStatus::Merging)?;

        match self.persistence.merge_update(id, &patch).await {
            Ok(merged) => {
                info!("Merged document {} (version {:?})", id, merged.version);
                self.shared.commit(merged.clone());
                Ok(merged)
            }
            Err(err) => {
                drop(guard);
                Err(self.fail(Operation::Merge, Some(id), err))
            }
        }
    }

    /// Merge new content into `id`, using the version we last saw as the basis.
    pub async fn merge_current(&self, id: &str, content: String) -> Result<Document> {
        let basis = {
            let state = self.shared.lock();
            let cached = state.cache.get(id).and_then(|d| d.version);
            if state.current.id() == Some(id) {
                state.current.version.or(cached)
            } else {
                cached
            }
        };
        debug!("Merging {} against basis {:?}", id, basis);
        self.merge_update(id, DocumentPatch::content(content).with_base_version(basis))
            .await
    }

    // ========================================================================
    // Realtime path
    // ========================================================================

    /// Record a local change and relay it to peers. Never blocked by persistence.
    ///
    /// The cache is not touched: a broadcast is not a confirmed write.
    pub fn on_local_edit(&self, doc: Document) {
        self.shared.lock().current = doc.clone();
        self.broadcast("edit-document", |channel| channel.broadcast_edit(&doc));
    }

    /// Replace only the content of the current document, keeping its id and version.
    pub fn edit_content(&self, content: impl Into<String>) {
        let mut doc = self.current();
        doc.content = Some(content.into());
        self.on_local_edit(doc);
    }

    /// Adopt a full snapshot from the channel (last writer wins).
    pub fn on_remote_document(&self, doc: Document) {
        self.shared.apply_remote(doc);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn status(&self) -> SyncStatus {
        self.shared.lock().status
    }

    pub fn is_busy(&self) -> bool {
        self.status() != SyncStatus::Idle
    }

    /// Snapshot of the document being edited.
    pub fn current(&self) -> Document {
        self.shared.lock().current.clone()
    }

    /// The cached snapshot for `id`, if any.
    pub fn cached(&self, id: &str) -> Option<Document> {
        self.shared.lock().cache.get(id).cloned()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn begin(&self, status: SyncStatus) -> Result<BusyGuard<'_>> {
        let mut state = self.shared.lock();
        if state.status != SyncStatus::Idle {
            debug!("Rejecting {:?}: {:?} already in flight", status, state.status);
            return Err(SyncError::Busy);
        }
        state.status = status;
        Ok(BusyGuard {
            shared: &self.shared,
        })
    }

    /// Route a failure to the callback for its origin. Conflicts always go to
    /// the conflict callback, regardless of origin.
    fn fail(&self, op: Operation, id: Option<&str>, err: PersistError) -> SyncError {
        let resolution = conflict::classify(&err);
        warn!("{} failed ({:?}): {}", op, resolution, err);

        let callbacks = &self.shared.callbacks;
        if resolution == Resolution::Conflict {
            let id = match (id, &err) {
                (Some(id), _) => id.to_string(),
                (None, PersistError::VersionConflict(id)) => id.clone(),
                (None, _) => String::new(),
            };
            if let Some(cb) = &callbacks.conflict {
                cb(&id);
            }
            return SyncError::Conflict(id);
        }

        let (callback, wrap): (&Option<ErrorCallback>, fn(PersistError) -> SyncError) = match op {
            Operation::Fetch => (&callbacks.fetch_error, SyncError::Fetch),
            Operation::Save => (&callbacks.save_error, SyncError::Save),
            Operation::Merge => (&callbacks.merge_error, SyncError::Merge),
        };
        if let Some(cb) = callback {
            cb(&err);
        }
        wrap(err)
    }

    /// Fire-and-forget send. Skipped once the session is torn down.
    fn broadcast(&self, event: &str, send: impl FnOnce(&C) -> channel::Result<()>) {
        if !self.is_connected() {
            debug!("Not connected, skipping {}", event);
            return;
        }
        if let Err(e) = send(self.channel.as_ref()) {
            warn!("Failed to send {}: {}", event, e);
        }
    }
}

impl<P, C> Drop for SyncController<P, C>
where
    P: PersistenceClient + ?Sized,
    C: RealtimeChannel + ?Sized,
{
    fn drop(&mut self) {
        self.disconnect();
    }
}
