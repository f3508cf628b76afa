//! Push synchronisation subscription.
//!
//! Subscribers receive every upload chunk in store-time order. The
//! emitter iterates the push index, parks when drained, and wakes on new
//! writes. A restart signal rewinds the cursor to the beginning so the
//! whole index is re-emitted under the current skip predicate.

use std::sync::Arc;

use apiary_primitives::{Chunk, ChunkAddress};
use apiary_storage::{Item, IterateOptions, StorageError};
use tokio::sync::{mpsc, watch};
use tracing::error;

use crate::{db::DB, Result};

const PUSH_PAGE_SIZE: usize = 128;

/// Control handle of one push subscription.
///
/// Dropping the handle stops the stream.
pub struct PushSubscription {
    restart_tx: mpsc::Sender<()>,
    stop_tx: watch::Sender<bool>,
}

impl PushSubscription {
    /// Rewinds the iterator to the beginning; every entry is re-emitted,
    /// subject to the skip predicate at visit time.
    pub fn restart(&self) {
        let _ = self.restart_tx.try_send(());
    }

    /// Terminates the stream. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl DB {
    /// Subscribes to upload chunks in push-index (store time) order.
    ///
    /// `skip` is consulted per visited entry; skipped entries advance the
    /// cursor without being emitted. The emitter blocks when the receiver
    /// is not ready and ends on stop, store close, or receiver drop.
    pub fn subscribe_push(
        self: &Arc<Self>,
        skip: impl Fn(&ChunkAddress) -> bool + Send + Sync + 'static,
    ) -> (mpsc::Receiver<Chunk>, PushSubscription) {
        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        let (restart_tx, mut restart_rx) = mpsc::channel::<()>(1);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        self.push_triggers.lock().push(trigger_tx);
        let mut close_rx = self.close_tx.subscribe();
        let db = self.clone();

        tokio::spawn(async move {
            let mut since: Option<Item> = None;
            loop {
                // drain entries past the cursor
                loop {
                    let page = match db.next_push_page(since.as_ref()) {
                        Ok(page) => page,
                        Err(err) => {
                            error!(%err, "push subscription iteration");
                            return;
                        }
                    };
                    if page.is_empty() {
                        break;
                    }
                    for item in page {
                        let mut cursor = Item::with_address(item.address.clone());
                        cursor.store_timestamp = item.store_timestamp;
                        since = Some(cursor);

                        let Some(address) = ChunkAddress::from_slice(&item.address) else {
                            continue;
                        };
                        if skip(&address) {
                            continue;
                        }
                        let chunk = match db.chunk_for_push(&address) {
                            Ok(Some(chunk)) => chunk,
                            // collected between index visit and read
                            Ok(None) => continue,
                            Err(err) => {
                                error!(%err, "push subscription read");
                                return;
                            }
                        };
                        tokio::select! {
                            sent = chunk_tx.send(chunk) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                            _ = stop_rx.changed() => return,
                            _ = close_rx.changed() => return,
                        }
                    }
                }
                // park until a new write, a restart, or termination
                tokio::select! {
                    _ = trigger_rx.recv() => {}
                    _ = restart_rx.recv() => since = None,
                    _ = stop_rx.changed() => return,
                    _ = close_rx.changed() => return,
                }
            }
        });

        (chunk_rx, PushSubscription { restart_tx, stop_tx })
    }

    fn next_push_page(&self, since: Option<&Item>) -> Result<Vec<Item>> {
        let mut page = Vec::new();
        let opts = IterateOptions {
            prefix: Vec::new(),
            start_from: since.cloned(),
            skip_start: since.is_some(),
        };
        self.push_index.iterate(&opts, &mut |item| {
            page.push(item);
            Ok(page.len() >= PUSH_PAGE_SIZE)
        })?;
        Ok(page)
    }

    fn chunk_for_push(&self, address: &ChunkAddress) -> Result<Option<Chunk>> {
        match self.retrieval_data_index.get(&Item::with_address(address.as_bytes().to_vec())) {
            Ok(item) => Ok(Some(self.item_to_chunk(&item)?)),
            Err(StorageError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
