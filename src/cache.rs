use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::errors::VoteError;
use crate::provider::VoteLedger;
use crate::{Address, Candidate, Result};

/// Read-through cache over the contract's view calls.
///
/// Each slot's mutex is held across the fetch, so concurrent callers asking
/// for the same key share one outstanding ledger request instead of issuing
/// duplicates. A failed fetch leaves the slot empty; partial candidate lists
/// are never stored.
pub struct LedgerReadCache {
    ledger: Arc<dyn VoteLedger>,
    candidates: Mutex<Option<Vec<Candidate>>>,
    voted: Mutex<HashMap<Address, bool>>,
}

impl LedgerReadCache {
    pub fn new(ledger: Arc<dyn VoteLedger>) -> Self {
        LedgerReadCache {
            ledger,
            candidates: Mutex::new(None),
            voted: Mutex::new(HashMap::new()),
        }
    }

    pub async fn list_candidates(&self) -> Result<Vec<Candidate>> {
        let mut slot = self.candidates.lock().await;
        if let Some(list) = slot.as_ref() {
            return Ok(list.clone());
        }
        let list = self.fetch_candidates().await?;
        *slot = Some(list.clone());
        Ok(list)
    }

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>> {
        let count = self.ledger.candidate_count().await?;
        let mut list = Vec::with_capacity(count as usize);
        for id in 1..=count {
            let candidate = self.ledger.candidate(id).await?;
            if candidate.id != id {
                return Err(VoteError::LedgerRead(format!(
                    "candidate {} returned id {}",
                    id, candidate.id
                )));
            }
            list.push(candidate);
        }
        log::debug!("loaded {} candidates", list.len());
        Ok(list)
    }

    pub async fn has_voted(&self, account: Address) -> Result<bool> {
        let mut map = self.voted.lock().await;
        if let Some(flag) = map.get(&account) {
            return Ok(*flag);
        }
        let flag = self.ledger.has_voted(account).await?;
        map.insert(account, flag);
        Ok(flag)
    }

    pub async fn total_votes(&self) -> Result<u64> {
        let list = self.list_candidates().await?;
        Ok(list.iter().map(|c| c.vote_count).sum())
    }

    /// A confirmed vote changed the tallies and the submitter's flag.
    pub async fn invalidate_after_vote(&self, account: Address) {
        self.candidates.lock().await.take();
        self.voted.lock().await.remove(&account);
        log::debug!("cache invalidated after vote by {}", account);
    }

    /// Account or network switch: nothing cached can be trusted.
    pub async fn clear(&self) {
        self.candidates.lock().await.take();
        self.voted.lock().await.clear();
    }
}
