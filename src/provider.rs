use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{Address, Candidate, ChainId, Result, TxHash, VotedEvent};

/// Provider-initiated notifications, delivered for the lifetime of the
/// subscription regardless of what the dashboard is doing.
#[derive(Clone, Debug)]
pub enum ProviderEvent {
    /// The authorized account list changed. Empty means the wallet revoked
    /// access entirely.
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
}

/// Outcome of a finalized vote transaction.
#[derive(Clone, Debug)]
pub struct VoteReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub event: VotedEvent,
}

/// The browser-injected wallet bridge: account access and change
/// notifications. Signing happens inside [`VoteLedger::submit_vote`], which
/// the provider backs.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompt the user for account access.
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// Currently authorized accounts, without prompting.
    async fn accounts(&self) -> Result<Vec<Address>>;

    async fn chain_id(&self) -> Result<ChainId>;

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// The deployed voting contract, seen through the active connection. The
/// contract is authoritative for vote counting and double-vote prevention;
/// everything here is a view of its state.
#[async_trait]
pub trait VoteLedger: Send + Sync {
    async fn candidate_count(&self) -> Result<u32>;

    /// Candidate ids are 1-based; `candidate_count` is the upper bound.
    async fn candidate(&self, id: u32) -> Result<Candidate>;

    async fn has_voted(&self, account: Address) -> Result<bool>;

    /// Sign and broadcast a vote. Resolves once the network accepted the
    /// transaction; effects are visible only after confirmation.
    async fn submit_vote(&self, from: Address, candidate_id: u32) -> Result<TxHash>;

    /// Suspend until the transaction is final. A revert surfaces here as
    /// [`crate::errors::VoteError::ContractReverted`].
    async fn wait_confirmed(&self, tx_hash: TxHash) -> Result<VoteReceipt>;

    /// All `Voted` events emitted so far.
    async fn voted_history(&self) -> Result<Vec<VotedEvent>>;

    /// Live `Voted` events as they are emitted.
    fn subscribe_voted(&self) -> broadcast::Receiver<VotedEvent>;
}
