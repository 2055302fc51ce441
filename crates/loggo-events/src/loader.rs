//! Request-scoped batching and memoization of ID lookups.
//!
//! A [`Loader`] collects the IDs a resolution pass is interested in and
//! fetches all outstanding ones with a single `WHERE id IN (...)` query the
//! first time any of them is actually needed. Every result, including
//! "not found", is memoized for the rest of the request, so asking for the
//! same ID twice never reaches the database twice.
//!
//! A loader borrows the request's connection and is meant to be created at
//! the start of a request and dropped at its end. Build a new [`Loaders`]
//! per request; never keep one around.
//!
//! ```rust,ignore
//! let mut loaders = Loaders::new(&conn);
//! loaders.channels.enqueue_many(events.iter().map(|e| e.channel_id));
//! for event in &events {
//!     // one channel query in total, issued here on the first iteration
//!     let channel = loaders.channels.load(event.channel_id)?;
//! }
//! ```

use std::collections::{BTreeSet, HashMap};

use rusqlite::Connection;

use crate::channel::{channels_by_ids, Channel};
use crate::error::{LoadError, StoreError};
use crate::event::{events_by_ids, Event};

/// A batched fetch of one entity kind.
pub trait BatchFn {
    type Value: Clone;

    /// Entity name used in error messages.
    const KIND: &'static str;

    /// Fetches every entity among `ids` that exists, keyed by ID.
    fn load_batch(&self, ids: &[i64]) -> Result<HashMap<i64, Self::Value>, StoreError>;
}

/// Batching, memoizing loader for one entity kind.
pub struct Loader<F: BatchFn> {
    batch_fn: F,
    pending: BTreeSet<i64>,
    cache: HashMap<i64, Result<F::Value, LoadError>>,
    batches: usize,
}

impl<F: BatchFn> Loader<F> {
    pub fn new(batch_fn: F) -> Self {
        Self {
            batch_fn,
            pending: BTreeSet::new(),
            cache: HashMap::new(),
            batches: 0,
        }
    }

    /// Registers interest in `id` without touching the database.
    pub fn enqueue(&mut self, id: i64) {
        if !self.cache.contains_key(&id) {
            self.pending.insert(id);
        }
    }

    pub fn enqueue_many(&mut self, ids: impl IntoIterator<Item = i64>) {
        for id in ids {
            self.enqueue(id);
        }
    }

    /// Returns the entity for `id`, dispatching one batch for every pending
    /// ID if it has not been fetched yet.
    pub fn load(&mut self, id: i64) -> Result<F::Value, LoadError> {
        if let Some(hit) = self.cache.get(&id) {
            return hit.clone();
        }
        self.pending.insert(id);
        self.dispatch();
        self.cache
            .get(&id)
            .cloned()
            .unwrap_or(Err(LoadError::NotFound { kind: F::KIND, id }))
    }

    /// Loads several IDs with at most one query, preserving input order.
    pub fn load_many(&mut self, ids: &[i64]) -> Vec<Result<F::Value, LoadError>> {
        self.enqueue_many(ids.iter().copied());
        self.dispatch();
        ids.iter().map(|id| self.load(*id)).collect()
    }

    /// Number of batched queries this loader has issued.
    pub fn batches_dispatched(&self) -> usize {
        self.batches
    }

    fn dispatch(&mut self) {
        let ids: Vec<i64> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|id| !self.cache.contains_key(id))
            .collect();
        if ids.is_empty() {
            return;
        }

        self.batches += 1;
        tracing::debug!(kind = F::KIND, count = ids.len(), "dispatching batched lookup");

        match self.batch_fn.load_batch(&ids) {
            Ok(mut found) => {
                for id in ids {
                    let result = found
                        .remove(&id)
                        .ok_or(LoadError::NotFound { kind: F::KIND, id });
                    self.cache.insert(id, result);
                }
            }
            Err(e) => {
                tracing::error!(kind = F::KIND, error = %e, "batched lookup failed");
                let message = e.to_string();
                for id in ids {
                    self.cache.insert(
                        id,
                        Err(LoadError::Storage {
                            kind: F::KIND,
                            message: message.clone(),
                        }),
                    );
                }
            }
        }
    }
}

/// Channel lookups against one connection.
pub struct ChannelBatch<'c> {
    conn: &'c Connection,
}

impl BatchFn for ChannelBatch<'_> {
    type Value = Channel;
    const KIND: &'static str = "channel";

    fn load_batch(&self, ids: &[i64]) -> Result<HashMap<i64, Channel>, StoreError> {
        Ok(channels_by_ids(self.conn, ids)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect())
    }
}

/// Event lookups against one connection.
pub struct EventBatch<'c> {
    conn: &'c Connection,
}

impl BatchFn for EventBatch<'_> {
    type Value = Event;
    const KIND: &'static str = "event";

    fn load_batch(&self, ids: &[i64]) -> Result<HashMap<i64, Event>, StoreError> {
        Ok(events_by_ids(self.conn, ids)?
            .into_iter()
            .map(|e| (e.id, e))
            .collect())
    }
}

/// The loaders of one request.
pub struct Loaders<'c> {
    pub channels: Loader<ChannelBatch<'c>>,
    pub events: Loader<EventBatch<'c>>,
}

impl<'c> Loaders<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            channels: Loader::new(ChannelBatch { conn }),
            events: Loader::new(EventBatch { conn }),
        }
    }
}
