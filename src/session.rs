use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::audit::AuditLog;
use crate::cache::LedgerReadCache;
use crate::config::Config;
use crate::errors::VoteError;
use crate::provider::{ProviderEvent, VoteLedger, WalletProvider};
use crate::submit::SubmissionPipeline;
use crate::{Address, ChainId, Result};

const LOAD_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Identity of the active wallet/ledger session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub account: Option<Address>,
    pub network: Option<ChainId>,
    pub state: ConnectionState,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            account: None,
            network: None,
            state: ConnectionState::Disconnected,
        }
    }
}

/// Owns the wallet connection lifecycle and the reaction to provider-side
/// account/network switches. The provider and ledger connections are single
/// shared resources lent to the other components through `Arc`; nothing
/// reconnects implicitly.
pub struct SessionController {
    provider: Arc<dyn WalletProvider>,
    cache: Arc<LedgerReadCache>,
    session: watch::Sender<Session>,
    events: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(provider: Arc<dyn WalletProvider>, cache: Arc<LedgerReadCache>) -> Arc<Self> {
        let (session, _) = watch::channel(Session::default());
        Arc::new(SessionController {
            provider,
            cache,
            session,
            events: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Current account, if any. Never blocks.
    pub fn active_account(&self) -> Option<Address> {
        self.session.borrow().account
    }

    /// Prompt the wallet for access, then load candidates and vote status in
    /// that causal order. Missing provider is an error; a provider granting
    /// zero accounts is a valid, empty, disconnected session.
    pub async fn connect(self: &Arc<Self>) -> Result<Session> {
        self.update(|s| s.state = ConnectionState::Connecting);
        let accounts = match self.provider.request_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                self.update(|s| *s = Session::default());
                return Err(err);
            }
        };
        let Some(account) = accounts.first().copied() else {
            log::info!("wallet granted no accounts");
            self.update(|s| *s = Session::default());
            return Ok(self.session());
        };
        let network = match self.provider.chain_id().await {
            Ok(network) => network,
            Err(err) => {
                self.update(|s| *s = Session::default());
                return Err(err);
            }
        };
        self.update(|s| {
            s.account = Some(account);
            s.network = Some(network);
            s.state = ConnectionState::Connected;
        });
        log::info!("connected as {} on chain {}", account, network);

        self.attach_events();
        self.initial_load(account).await?;
        Ok(self.session())
    }

    /// The load must not start before the account is known, and transient
    /// read failures are retried, not silently skipped.
    async fn initial_load(&self, account: Address) -> Result<()> {
        self.load_with_retry("candidates", || self.cache.list_candidates())
            .await?;
        let voted = self
            .load_with_retry("vote status", || self.cache.has_voted(account))
            .await?;
        log::debug!("initial load complete, has_voted={}", voted);
        Ok(())
    }

    async fn load_with_retry<T, F, Fut>(&self, what: &str, fetch: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match fetch().await {
                Ok(value) => return Ok(value),
                Err(err @ (VoteError::Network(_) | VoteError::LedgerRead(_)))
                    if attempt < LOAD_ATTEMPTS =>
                {
                    log::warn!("{} load failed (attempt {}): {}", what, attempt, err);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Start consuming provider notifications. Replaces any previous
    /// subscription, so repeated connects never stack handlers.
    pub fn attach_events(self: &Arc<Self>) {
        let mut rx = self.provider.subscribe();
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(controller) = weak.upgrade() else {
                            break;
                        };
                        controller.handle_provider_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("provider feed lagged, {} events dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(old) = self.events.lock().unwrap().replace(task) {
            old.abort();
        }
    }

    async fn handle_provider_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                Some(account) => {
                    if self.active_account() == Some(account) {
                        return;
                    }
                    log::info!("account switched to {}", account);
                    // Clear first: observers of the session watch must never
                    // see the new account paired with the old account's cache.
                    self.cache.clear().await;
                    // An account switch only moves the identity; it never
                    // establishes a connection on its own.
                    self.update(|s| s.account = Some(account));
                }
                None => {
                    log::info!("wallet revoked all accounts, disconnecting");
                    self.cache.clear().await;
                    self.update(|s| *s = Session::default());
                }
            },
            ProviderEvent::ChainChanged(network) => {
                log::info!("network switched to {}", network);
                self.cache.clear().await;
                self.update(|s| s.network = Some(network));
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut Session)) {
        self.session.send_modify(f);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = self.events.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Everything a dashboard needs for one wallet/ledger session. Components
/// share the session's single provider/ledger connection; none of them may
/// construct another.
pub struct SessionContext {
    /// Deployed voting contract this session is bound to.
    pub contract_address: Address,
    pub controller: Arc<SessionController>,
    pub cache: Arc<LedgerReadCache>,
    pub pipeline: Arc<SubmissionPipeline>,
    pub audit: Arc<AuditLog>,
}

impl SessionContext {
    pub fn new(
        config: &Config,
        provider: Arc<dyn WalletProvider>,
        ledger: Arc<dyn VoteLedger>,
    ) -> SessionContext {
        let cache = Arc::new(LedgerReadCache::new(Arc::clone(&ledger)));
        let audit = Arc::new(AuditLog::new(Arc::clone(&ledger)));
        let pipeline = Arc::new(SubmissionPipeline::new(
            ledger,
            Arc::clone(&cache),
            Arc::clone(&audit),
            config.confirmation_timeout,
        ));
        let controller = SessionController::new(provider, Arc::clone(&cache));
        log::debug!("session bound to contract {}", config.contract_address);
        SessionContext {
            contract_address: config.contract_address,
            controller,
            cache,
            pipeline,
            audit,
        }
    }

    /// Cast a vote as the active account. Connecting is an explicit step:
    /// without one this fails fast instead of reconnecting behind the
    /// caller's back.
    pub async fn submit_vote(&self, candidate_id: u32) -> Result<crate::provider::VoteReceipt> {
        let account = self
            .controller
            .active_account()
            .ok_or(VoteError::NotConnected)?;
        self.pipeline.submit(account, candidate_id).await
    }

    pub async fn analytics(&self) -> Result<crate::analytics::VoteAnalytics> {
        let candidates = self.cache.list_candidates().await?;
        Ok(crate::analytics::VoteAnalytics::compute(&candidates))
    }
}
