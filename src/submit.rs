use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::audit::AuditLog;
use crate::cache::LedgerReadCache;
use crate::errors::VoteError;
use crate::provider::{VoteLedger, VoteReceipt};
use crate::{Address, Result};

/// Terminal failure classification carried by [`SubmissionPhase::Failed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitFailure {
    UserRejected,
    Network,
    ContractReverted,
    /// We stopped waiting for confirmation. The transaction may still land;
    /// this is not a ledger failure.
    Timeout,
    Unknown,
}

impl From<&VoteError> for SubmitFailure {
    fn from(err: &VoteError) -> Self {
        match err {
            VoteError::UserRejected => SubmitFailure::UserRejected,
            VoteError::Network(_) | VoteError::LedgerRead(_) => SubmitFailure::Network,
            VoteError::ContractReverted(_) => SubmitFailure::ContractReverted,
            VoteError::ConfirmationTimeout => SubmitFailure::Timeout,
            _ => SubmitFailure::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionPhase {
    Idle,
    Validating,
    AwaitingSignature,
    Pending,
    Confirmed,
    Failed(SubmitFailure),
}

/// UI-visible state of the current vote attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionStatus {
    pub candidate_id: u32,
    pub phase: SubmissionPhase,
}

impl Default for SubmissionStatus {
    fn default() -> Self {
        SubmissionStatus {
            candidate_id: 0,
            phase: SubmissionPhase::Idle,
        }
    }
}

/// State machine for casting one vote:
/// `Idle -> Validating -> AwaitingSignature -> Pending -> Confirmed`, with
/// `Failed` reachable from any non-terminal state. At most one submission
/// may be past `Validating` per session; concurrent intents are rejected
/// with `SubmissionInProgress`, never queued. Retrying is the caller's call.
pub struct SubmissionPipeline {
    ledger: Arc<dyn VoteLedger>,
    cache: Arc<LedgerReadCache>,
    audit: Arc<AuditLog>,
    confirmation_timeout: Duration,
    in_flight: AtomicBool,
    status: watch::Sender<SubmissionStatus>,
}

impl SubmissionPipeline {
    pub fn new(
        ledger: Arc<dyn VoteLedger>,
        cache: Arc<LedgerReadCache>,
        audit: Arc<AuditLog>,
        confirmation_timeout: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SubmissionStatus::default());
        SubmissionPipeline {
            ledger,
            cache,
            audit,
            confirmation_timeout,
            in_flight: AtomicBool::new(false),
            status,
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SubmissionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status.borrow().clone()
    }

    pub async fn submit(&self, account: Address, candidate_id: u32) -> Result<VoteReceipt> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VoteError::SubmissionInProgress);
        }
        let _slot = InFlightGuard(&self.in_flight);
        let result = self.run(account, candidate_id).await;
        if let Err(err) = &result {
            log::warn!("vote for candidate {} failed: {}", candidate_id, err);
            self.set_phase(candidate_id, SubmissionPhase::Failed(err.into()));
        }
        result
    }

    async fn run(&self, account: Address, candidate_id: u32) -> Result<VoteReceipt> {
        // Advisory checks against cached state. The contract's own rejection
        // is the authoritative one.
        self.set_phase(candidate_id, SubmissionPhase::Validating);
        if self.cache.has_voted(account).await? {
            return Err(VoteError::AlreadyVoted);
        }
        let candidates = self.cache.list_candidates().await?;
        if !candidates.iter().any(|c| c.id == candidate_id) {
            return Err(VoteError::InvalidCandidate(candidate_id));
        }

        self.set_phase(candidate_id, SubmissionPhase::AwaitingSignature);
        let tx_hash = self.ledger.submit_vote(account, candidate_id).await?;

        // Displayed counts keep coming from confirmed reads only; Pending is
        // the "vote counted, confirming" signal.
        self.set_phase(candidate_id, SubmissionPhase::Pending);
        let wait = self.ledger.wait_confirmed(tx_hash);
        let receipt = match tokio::time::timeout(self.confirmation_timeout, wait).await {
            Ok(receipt) => receipt?,
            // The transaction is not revocable; we only stopped waiting.
            Err(_) => return Err(VoteError::ConfirmationTimeout),
        };

        log::info!(
            "vote by {} for candidate {} confirmed in block {}",
            account,
            candidate_id,
            receipt.block_number
        );
        self.set_phase(candidate_id, SubmissionPhase::Confirmed);
        self.cache.invalidate_after_vote(account).await;
        self.audit.append(receipt.event.clone());
        Ok(receipt)
    }

    // send_replace: the phase must be recorded even while nobody holds a
    // status receiver.
    fn set_phase(&self, candidate_id: u32, phase: SubmissionPhase) {
        self.status.send_replace(SubmissionStatus {
            candidate_id,
            phase,
        });
    }
}

/// Frees the submission slot on every exit path, including the caller
/// dropping the `submit` future mid-flight.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
