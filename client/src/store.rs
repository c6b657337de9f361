use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};
use warmap_shared::{ChangeType, EntityChange};

use crate::api::{Entity, EntitySource};
use crate::error::ClientError;
use crate::sse::{ConnectionStatus, DomainMessage, Subscription};

pub type Snapshot<T> = Arc<Vec<T>>;

/// Authoritative in-memory mirror of one entity collection.
///
/// Only confirmed fetches mutate it. Every mutation publishes the full list.
pub struct EntityStore<T: Entity> {
    source: Arc<dyn EntitySource<T>>,
    state: watch::Sender<Snapshot<T>>,
    revision: AtomicU64,
}

impl<T: Entity> EntityStore<T> {
    pub fn new(source: Arc<dyn EntitySource<T>>) -> Self {
        let (state, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            source,
            state,
            revision: AtomicU64::new(0),
        }
    }

    /// Current contents, without waiting.
    pub fn snapshot(&self) -> Snapshot<T> {
        Arc::clone(&self.state.borrow())
    }

    /// Bumped on every published mutation.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.state.subscribe()
    }

    /// Current snapshot followed by every later one.
    pub fn updates(&self) -> WatchStream<Snapshot<T>> {
        WatchStream::new(self.state.subscribe())
    }

    pub fn find(&self, id: &str) -> Option<T> {
        self.state
            .borrow()
            .iter()
            .find(|item| item.entity_id() == id)
            .cloned()
    }

    /// Cached list, fetched when empty or when `force_refresh` is set.
    pub async fn get_all(&self, force_refresh: bool) -> Result<Snapshot<T>, ClientError> {
        if !force_refresh {
            let current = self.snapshot();
            if !current.is_empty() {
                return Ok(current);
            }
        }

        let items = Arc::new(self.source.fetch_all().await?);
        info!(kind = %T::KIND, count = items.len(), "store refreshed");
        self.state.send_replace(Arc::clone(&items));
        self.bump();
        Ok(items)
    }

    /// Always a direct fetch. Does not touch the cache.
    pub async fn get_by_id(&self, id: &str) -> Result<T, ClientError> {
        self.source.fetch_by_id(id).await
    }

    /// Cached entry if present, otherwise fetched and stored.
    pub async fn get_cached(&self, id: &str) -> Result<T, ClientError> {
        if let Some(item) = self.find(id) {
            return Ok(item);
        }
        let item = self.source.fetch_by_id(id).await?;
        self.upsert(item.clone());
        Ok(item)
    }

    /// Replaces the entry with the same id in place, or appends a new one.
    pub fn upsert(&self, item: T) {
        self.state.send_modify(|items| {
            let items = Arc::make_mut(items);
            match items
                .iter()
                .position(|existing| existing.entity_id() == item.entity_id())
            {
                Some(index) => items[index] = item,
                None => items.push(item),
            }
        });
        self.bump();
    }

    /// Returns whether anything was removed. Subscribers are only notified on removal.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.state.send_if_modified(|items| {
            let Some(index) = items.iter().position(|existing| existing.entity_id() == id) else {
                return false;
            };
            Arc::make_mut(items).remove(index);
            true
        });
        if removed {
            self.bump();
        }
        removed
    }

    /// Applies one "entity X changed" notification. Changes for other kinds are ignored.
    pub async fn apply_change(&self, change: &EntityChange) -> Result<(), ClientError> {
        if change.entity != T::KIND {
            return Ok(());
        }

        match change.change {
            ChangeType::Deleted => {
                if self.remove(&change.id) {
                    debug!(kind = %T::KIND, id = %change.id, "removed");
                }
                Ok(())
            }
            ChangeType::Created | ChangeType::Updated => {
                match self.source.fetch_by_id(&change.id).await {
                    Ok(item) => {
                        self.upsert(item);
                        debug!(kind = %T::KIND, id = %change.id, "re-fetched");
                        Ok(())
                    }
                    Err(ClientError::Status { status: 404, .. }) => {
                        debug!(kind = %T::KIND, id = %change.id, "gone before re-fetch; removing");
                        self.remove(&change.id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Background path for stream messages: failures are logged, the cache stays as is.
    pub async fn handle_message(&self, message: &DomainMessage) {
        if message.kind.entity() != T::KIND {
            return;
        }
        let Some(change) = message.entity_change() else {
            warn!(kind = %message.kind, "stream message without entity id");
            return;
        };
        if let Err(e) = self.apply_change(&change).await {
            warn!(
                kind = %T::KIND,
                id = %change.id,
                error = %e,
                "background refresh failed; keeping cached state"
            );
        }
    }

    /// Reloads the whole collection after the stream may have skipped messages.
    /// Failures are logged and the cache stays as is.
    pub async fn resync(&self, reason: &'static str) {
        match self.get_all(true).await {
            Ok(items) => debug!(kind = %T::KIND, count = items.len(), reason, "store resynced"),
            Err(e) => warn!(
                kind = %T::KIND,
                reason,
                error = %e,
                "store resync failed; keeping cached state"
            ),
        }
    }

    /// Feeds stream messages into this store until the consumer goes away.
    ///
    /// Every time the stream goes live, and whenever this subscriber lagged,
    /// the collection is reloaded so changes made while nothing was listening
    /// are not lost.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut subscription: Subscription,
        mut status: watch::Receiver<ConnectionStatus>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut status_open = true;
            loop {
                tokio::select! {
                    item = subscription.recv() => {
                        let Some(item) = item else { break };
                        if subscription.take_missed() > 0 {
                            store.resync("subscriber lagged").await;
                        }
                        match item {
                            Ok(message) => store.handle_message(&message).await,
                            Err(e) => error!(kind = %T::KIND, error = %e, "event stream failed"),
                        }
                    }
                    changed = status.changed(), if status_open => {
                        if changed.is_err() {
                            status_open = false;
                            continue;
                        }
                        let live = *status.borrow_and_update() == ConnectionStatus::Live;
                        if live {
                            store.resync("stream live").await;
                        }
                    }
                }
            }
            debug!(kind = %T::KIND, "store listener stopped");
        })
    }
}
