use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::{broadcast, watch};

use crate::errors::VoteError;
use crate::provider::{ProviderEvent, VoteLedger, VoteReceipt, WalletProvider};
use crate::{Address, Candidate, ChainId, Result, TxHash, VotedEvent};

const SIM_CHAIN_ID: ChainId = 31337;

/// In-memory wallet provider and voting contract in one. Each instance is an
/// isolated chain, so tests can run several simulated sessions without
/// leaking state into each other.
pub struct SimChain {
    state: Mutex<SimState>,
    provider_events: broadcast::Sender<ProviderEvent>,
    voted_events: broadcast::Sender<VotedEvent>,
    confirmations: watch::Sender<bool>,
    reads: ReadCounters,
}

/// Ledger round-trips observed, for asserting cache behavior.
#[derive(Default)]
pub struct ReadCounters {
    pub candidate_count: AtomicU32,
    pub candidate: AtomicU32,
    pub has_voted: AtomicU32,
}

struct SimState {
    provider_present: bool,
    authorized: Vec<Address>,
    candidates: Vec<Candidate>,
    voted: HashSet<Address>,
    history: Vec<VotedEvent>,
    pending: HashMap<TxHash, (Address, u32)>,
    block_number: u64,
    timestamp: u64,
    reject_connect: bool,
    reject_next_signature: bool,
    fail_reads: u32,
    fail_candidate_ids: HashSet<u32>,
}

impl SimChain {
    pub fn new(names: &[&str]) -> Arc<SimChain> {
        let candidates = names
            .iter()
            .enumerate()
            .map(|(i, name)| Candidate {
                id: i as u32 + 1,
                name: name.to_string(),
                vote_count: 0,
            })
            .collect();
        let (provider_events, _) = broadcast::channel(64);
        let (voted_events, _) = broadcast::channel(64);
        let (confirmations, _) = watch::channel(true);
        Arc::new(SimChain {
            state: Mutex::new(SimState {
                provider_present: true,
                authorized: vec![],
                candidates,
                voted: HashSet::new(),
                history: vec![],
                pending: HashMap::new(),
                block_number: 1,
                timestamp: 1_700_000_000,
                reject_connect: false,
                reject_next_signature: false,
                fail_reads: 0,
                fail_candidate_ids: HashSet::new(),
            }),
            provider_events,
            voted_events,
            confirmations,
            reads: ReadCounters::default(),
        })
    }

    /// A page with no wallet extension at all.
    pub fn without_provider() -> Arc<SimChain> {
        let sim = SimChain::new(&[]);
        sim.state.lock().unwrap().provider_present = false;
        sim
    }

    pub fn account(n: u8) -> Address {
        Address([n; 20])
    }

    pub fn authorize(&self, accounts: &[Address]) {
        self.state.lock().unwrap().authorized = accounts.to_vec();
    }

    /// Switch the wallet's account list and notify subscribers.
    pub fn emit_accounts_changed(&self, accounts: &[Address]) {
        self.state.lock().unwrap().authorized = accounts.to_vec();
        let _ = self
            .provider_events
            .send(ProviderEvent::AccountsChanged(accounts.to_vec()));
    }

    pub fn emit_chain_changed(&self, network: ChainId) {
        let _ = self.provider_events.send(ProviderEvent::ChainChanged(network));
    }

    /// Inject a fabricated event into the live feed, bypassing the chain.
    pub fn emit_voted(&self, event: VotedEvent) {
        let _ = self.voted_events.send(event);
    }

    pub fn seed_history(&self, events: &[VotedEvent]) {
        self.state
            .lock()
            .unwrap()
            .history
            .extend_from_slice(events);
    }

    /// Decline the next account-access prompt.
    pub fn reject_connect(&self) {
        self.state.lock().unwrap().reject_connect = true;
    }

    /// Decline the next signature prompt.
    pub fn reject_next_signature(&self) {
        self.state.lock().unwrap().reject_next_signature = true;
    }

    /// Fail the next `n` ledger reads with a transient network error.
    pub fn fail_next_reads(&self, n: u32) {
        self.state.lock().unwrap().fail_reads = n;
    }

    /// Fail the next read of one specific candidate.
    pub fn fail_candidate(&self, id: u32) {
        self.state.lock().unwrap().fail_candidate_ids.insert(id);
    }

    /// Mark an account as having voted directly on the contract, without
    /// going through this client. Makes cached vote-status flags stale.
    pub fn mark_voted(&self, account: Address) {
        self.state.lock().unwrap().voted.insert(account);
    }

    /// Hold all confirmations until [`SimChain::release_confirmations`].
    /// send_replace: the gate value must stick even before any waiter
    /// subscribes.
    pub fn pause_confirmations(&self) {
        self.confirmations.send_replace(false);
    }

    pub fn release_confirmations(&self) {
        self.confirmations.send_replace(true);
    }

    pub fn reads(&self) -> &ReadCounters {
        &self.reads
    }

    fn check_provider(&self) -> Result<()> {
        if self.state.lock().unwrap().provider_present {
            Ok(())
        } else {
            Err(VoteError::ProviderUnavailable)
        }
    }

    fn take_read_failure(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            true
        } else {
            false
        }
    }

    async fn wait_released(&self) {
        let mut rx = self.confirmations.subscribe();
        let _ = rx.wait_for(|flowing| *flowing).await;
    }
}

#[async_trait]
impl WalletProvider for SimChain {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.check_provider()?;
        let mut state = self.state.lock().unwrap();
        if state.reject_connect {
            state.reject_connect = false;
            return Err(VoteError::UserRejected);
        }
        Ok(state.authorized.clone())
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        self.check_provider()?;
        Ok(self.state.lock().unwrap().authorized.clone())
    }

    async fn chain_id(&self) -> Result<ChainId> {
        self.check_provider()?;
        Ok(SIM_CHAIN_ID)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.provider_events.subscribe()
    }
}

#[async_trait]
impl VoteLedger for SimChain {
    async fn candidate_count(&self) -> Result<u32> {
        self.reads.candidate_count.fetch_add(1, Ordering::Relaxed);
        if self.take_read_failure() {
            return Err(VoteError::Network("simulated outage".into()));
        }
        Ok(self.state.lock().unwrap().candidates.len() as u32)
    }

    async fn candidate(&self, id: u32) -> Result<Candidate> {
        self.reads.candidate.fetch_add(1, Ordering::Relaxed);
        if self.take_read_failure() {
            return Err(VoteError::Network("simulated outage".into()));
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_candidate_ids.remove(&id) {
            return Err(VoteError::LedgerRead(format!(
                "candidate {} read failed",
                id
            )));
        }
        state
            .candidates
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| VoteError::LedgerRead(format!("no candidate {}", id)))
    }

    async fn has_voted(&self, account: Address) -> Result<bool> {
        self.reads.has_voted.fetch_add(1, Ordering::Relaxed);
        if self.take_read_failure() {
            return Err(VoteError::Network("simulated outage".into()));
        }
        Ok(self.state.lock().unwrap().voted.contains(&account))
    }

    async fn submit_vote(&self, from: Address, candidate_id: u32) -> Result<TxHash> {
        self.check_provider()?;
        let mut state = self.state.lock().unwrap();
        if state.reject_next_signature {
            state.reject_next_signature = false;
            return Err(VoteError::UserRejected);
        }
        let mut tx_hash = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut tx_hash);
        state.pending.insert(tx_hash, (from, candidate_id));
        Ok(tx_hash)
    }

    async fn wait_confirmed(&self, tx_hash: TxHash) -> Result<VoteReceipt> {
        self.wait_released().await;
        let event = {
            let mut state = self.state.lock().unwrap();
            let (voter, candidate_id) = state
                .pending
                .remove(&tx_hash)
                .ok_or_else(|| VoteError::Unknown("unknown transaction".into()))?;
            if state.voted.contains(&voter) {
                return Err(VoteError::ContractReverted("already voted".into()));
            }
            let slot = state
                .candidates
                .iter_mut()
                .find(|c| c.id == candidate_id)
                .ok_or_else(|| VoteError::ContractReverted("unknown candidate".into()))?;
            slot.vote_count += 1;
            state.voted.insert(voter);
            state.block_number += 1;
            state.timestamp += 12;
            let event = VotedEvent {
                voter,
                candidate_id,
                timestamp: state.timestamp,
                block_number: state.block_number,
                tx_hash,
                log_index: 0,
            };
            state.history.push(event.clone());
            event
        };
        let _ = self.voted_events.send(event.clone());
        Ok(VoteReceipt {
            tx_hash,
            block_number: event.block_number,
            event,
        })
    }

    async fn voted_history(&self) -> Result<Vec<VotedEvent>> {
        Ok(self.state.lock().unwrap().history.clone())
    }

    fn subscribe_voted(&self) -> broadcast::Receiver<VotedEvent> {
        self.voted_events.subscribe()
    }
}
