use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::provider::VoteLedger;
use crate::{Result, TxHash, VotedEvent};

/// Complete, ordered, deduplicated history of `Voted` events, most recent
/// first. Historical events come from one bootstrap query; live events are
/// merged at the head. An event captured by both paths displays once: the
/// dedup key is `(tx_hash, log_index)`.
pub struct AuditLog {
    ledger: Arc<dyn VoteLedger>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<VotedEvent>,
    seen: HashSet<(TxHash, u32)>,
}

/// Live-feed subscription handle. Dropping it stops delivery, so a torn-down
/// consumer can never be called back.
pub struct AuditSubscription {
    task: JoinHandle<()>,
}

impl Drop for AuditSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl AuditLog {
    pub fn new(ledger: Arc<dyn VoteLedger>) -> Self {
        AuditLog {
            ledger,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// One-shot historical load: chronological by (block, log position),
    /// reversed so the most recent vote displays first.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut history = self.ledger.voted_history().await?;
        history.sort_by_key(|e| (e.block_number, e.log_index));
        history.reverse();
        let mut inner = self.inner.lock().unwrap();
        for event in history {
            if inner.seen.insert(event.key()) {
                inner.entries.push(event);
            }
        }
        log::info!("audit log bootstrapped with {} entries", inner.entries.len());
        Ok(())
    }

    /// Start consuming the live feed. The returned handle must outlive the
    /// consumer's interest in updates and nothing else.
    pub fn subscribe_live(self: &Arc<Self>) -> AuditSubscription {
        let mut rx = self.ledger.subscribe_voted();
        let aggregator = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        aggregator.append(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("audit feed lagged, {} events dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        AuditSubscription { task }
    }

    /// Merge one event at the head of the display list. Returns false if it
    /// was already present.
    pub fn append(&self, event: VotedEvent) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.seen.insert(event.key()) {
            return false;
        }
        inner.entries.insert(0, event);
        true
    }

    pub fn entries(&self) -> Vec<VotedEvent> {
        self.inner.lock().unwrap().entries.clone()
    }

    pub fn entries_json(&self) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        serde_json::to_string(&inner.entries)
            .map_err(|e| crate::errors::VoteError::Unknown(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Votes per candidate derived from the records themselves. Cached
    /// counts must always be re-derivable from this.
    pub fn tally(&self) -> HashMap<u32, u64> {
        let inner = self.inner.lock().unwrap();
        let mut tally = HashMap::new();
        for event in inner.entries.iter() {
            *tally.entry(event.candidate_id).or_insert(0) += 1;
        }
        tally
    }
}
