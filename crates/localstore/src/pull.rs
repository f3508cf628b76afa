//! Pull synchronisation subscription.
//!
//! Subscribers receive chunk descriptors of one proximity bin in
//! ascending bin-ID order and wake on new entries in that bin.

use std::sync::Arc;

use apiary_primitives::{postage::BatchId, ChunkAddress};
use apiary_storage::{Item, IterateOptions};
use tokio::sync::{mpsc, watch};
use tracing::error;

use crate::{db::DB, Result};

const PULL_PAGE_SIZE: usize = 128;

/// A chunk descriptor emitted by a pull subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullItem {
    /// Chunk address.
    pub address: ChunkAddress,
    /// Per-bin sequence number of the chunk.
    pub bin_id: u64,
    /// Postage batch the chunk is stamped against.
    pub batch_id: BatchId,
}

/// Control handle of one pull subscription.
///
/// Dropping the handle stops the stream.
pub struct PullSubscription {
    stop_tx: watch::Sender<bool>,
}

impl PullSubscription {
    /// Terminates the stream. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Drop for PullSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl DB {
    /// Subscribes to chunk descriptors of `bin` with bin IDs in
    /// `[since, until]`, in ascending order. An `until` of zero leaves
    /// the subscription open-ended. The stream ends after `until` is
    /// emitted, on stop, on store close, or on receiver drop.
    pub fn subscribe_pull(
        self: &Arc<Self>,
        bin: u8,
        since: u64,
        until: u64,
    ) -> (mpsc::Receiver<PullItem>, PullSubscription) {
        let (desc_tx, desc_rx) = mpsc::channel(1);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        self.pull_triggers.lock().entry(bin).or_default().push(trigger_tx);
        let mut close_rx = self.close_tx.subscribe();
        let db = self.clone();

        tokio::spawn(async move {
            let mut cursor = since;
            loop {
                loop {
                    let page = match db.next_pull_page(bin, cursor, until) {
                        Ok(page) => page,
                        Err(err) => {
                            error!(%err, bin, "pull subscription iteration");
                            return;
                        }
                    };
                    if page.is_empty() {
                        break;
                    }
                    for item in page {
                        cursor = item.bin_id + 1;
                        let Some(address) = ChunkAddress::from_slice(&item.address) else {
                            continue;
                        };
                        let descriptor = PullItem {
                            address,
                            bin_id: item.bin_id,
                            batch_id: BatchId::from_slice(&item.batch_id),
                        };
                        tokio::select! {
                            sent = desc_tx.send(descriptor) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                            _ = stop_rx.changed() => return,
                            _ = close_rx.changed() => return,
                        }
                        if until > 0 && item.bin_id >= until {
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = trigger_rx.recv() => {}
                    _ = stop_rx.changed() => return,
                    _ = close_rx.changed() => return,
                }
            }
        });

        (desc_rx, PullSubscription { stop_tx })
    }

    /// Last bin ID assigned in `bin`; the position new pull subscribers
    /// of that bin can resume from.
    pub fn last_pull_subscription_bin_id(&self, bin: u8) -> Result<u64> {
        Ok(self.bin_ids.get(bin)?)
    }

    fn next_pull_page(&self, bin: u8, from: u64, until: u64) -> Result<Vec<Item>> {
        let mut page = Vec::new();
        let start = Item { bin, bin_id: from, ..Default::default() };
        let opts = IterateOptions {
            prefix: vec![bin],
            start_from: Some(start),
            skip_start: false,
        };
        self.pull_index.iterate(&opts, &mut |item| {
            if until > 0 && item.bin_id > until {
                return Ok(true);
            }
            page.push(item);
            Ok(page.len() >= PULL_PAGE_SIZE)
        })?;
        Ok(page)
    }
}
