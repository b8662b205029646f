//! Connection session state machine
//!
//! One session mediates exactly one wallet connection at a time. It owns the
//! live provider handle, drives the connect / verify-chain / read-state /
//! listen / disconnect lifecycle, and publishes every transition through a
//! watch channel that the UI layer renders from.
//!
//! Concurrency is generation-scoped: every connect bumps a generation
//! counter, every pending asynchronous effect carries the generation it was
//! started under, and results are applied only while that generation is
//! still current. A superseding connect or a disconnect cancels outstanding
//! waits through the session's cancellation token and reaps any provider an
//! in-flight attempt had already acquired.

pub mod bridge;
pub mod prompt;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::account::{self, Account};
use crate::chain::ChainSpec;
use crate::error::{Error, Result};
use crate::guard;
use crate::session::prompt::DisconnectPrompt;
use crate::transport::{
    methods, Provider, ProviderError, ProviderEvent, TransportKind, WalletTransport,
};

/// Published session state. The live provider handle never leaves the
/// session; consumers see the derived account and the network advisory.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Disconnected,
    Loading(TransportKind),
    VerifyingChain,
    /// `chain_ok = false` is the non-fatal "wrong network" advisory: the
    /// wallet drifted off the required chain but may still hold valid
    /// accounts. Operations needing the right chain re-check at call time.
    Connected { account: Account, chain_ok: bool },
    /// Terminal until the next `connect()`. Carries a displayable reason.
    Failed { reason: String },
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }
}

type ProviderSlot = Arc<StdMutex<Option<Arc<dyn Provider>>>>;

struct ActiveSession {
    provider: Arc<dyn Provider>,
    account: Account,
    chain_ok: bool,
    cancel: CancellationToken,
}

/// A connect attempt that has not produced an outcome yet. The slot holds
/// the provider between acquisition and installation so a superseder can
/// reap it without waiting for the attempt to notice its cancellation.
struct PendingConnect {
    cancel: CancellationToken,
    slot: ProviderSlot,
}

struct Inner {
    generation: u64,
    pending: Option<PendingConnect>,
    active: Option<ActiveSession>,
}

/// State shared between the session facade, its event bridge, and pending
/// balance refreshes.
pub(crate) struct Shared {
    pub(crate) chain: ChainSpec,
    state_tx: watch::Sender<SessionState>,
    inner: Mutex<Inner>,
    open_providers: AtomicUsize,
}

impl Shared {
    /// All publishes happen while holding `inner`, keyed to the current
    /// generation, so a stale attempt can never stomp a newer one's state.
    fn publish(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    async fn publish_if_current(&self, generation: u64, state: SessionState) {
        let inner = self.inner.lock().await;
        if inner.generation == generation {
            self.publish(state);
        }
    }

    fn connected_state(active: &ActiveSession) -> SessionState {
        SessionState::Connected {
            account: active.account.clone(),
            chain_ok: active.chain_ok,
        }
    }

    /// Best-effort release of a provider handle; transport-side errors are
    /// swallowed.
    async fn release(&self, provider: Arc<dyn Provider>) {
        if let Err(e) = provider.disconnect().await {
            debug!(error = %e, "provider disconnect failed (ignored)");
        }
        self.open_providers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Synchronously adopt a new address for the current generation.
    /// Returns whether the session was still current (and a balance refresh
    /// should follow).
    pub(crate) async fn update_address(&self, generation: u64, address: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return false;
        }
        let Some(active) = inner.active.as_mut() else {
            return false;
        };
        if active.account.address != address {
            info!(address = %account::short_address(address), "wallet account changed");
            active.account.address = address.to_string();
        }
        // balance still refers to the previous address until the refresh
        // lands; acceptable for the in-between tick
        self.publish(Self::connected_state(active));
        true
    }

    /// Apply a finished balance refresh, last write wins: discarded unless
    /// the generation and the address it was fetched for are both current.
    pub(crate) async fn apply_balance(&self, generation: u64, address: &str, balance: String) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        let Some(active) = inner.active.as_mut() else {
            return;
        };
        if active.account.address != address {
            debug!(address = %account::short_address(address), "stale balance refresh discarded");
            return;
        }
        active.account.balance = balance;
        self.publish(Self::connected_state(active));
    }

    /// Set or clear the wrong-network advisory
    pub(crate) async fn set_chain_ok(&self, generation: u64, chain_ok: bool) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        let Some(active) = inner.active.as_mut() else {
            return;
        };
        if active.chain_ok != chain_ok {
            active.chain_ok = chain_ok;
            self.publish(Self::connected_state(active));
        }
    }

    /// Wallet-originated teardown: no confirmation, unconditional
    pub(crate) async fn force_disconnect(&self, generation: u64) {
        let released = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                return;
            }
            let Some(active) = inner.active.take() else {
                return;
            };
            // invalidate any effect still tagged with this generation
            inner.generation += 1;
            active.cancel.cancel();
            self.publish(SessionState::Disconnected);
            active.provider
        };
        self.release(released).await;
    }
}

struct Established {
    provider: Arc<dyn Provider>,
    account: Account,
    events: mpsc::Receiver<ProviderEvent>,
}

/// The wallet connection orchestrator's public surface
pub struct ConnectionSession {
    shared: Arc<Shared>,
    transports: HashMap<TransportKind, Arc<dyn WalletTransport>>,
    prompt: Arc<dyn DisconnectPrompt>,
}

impl ConnectionSession {
    pub fn new(chain: ChainSpec, prompt: Arc<dyn DisconnectPrompt>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                chain,
                state_tx,
                inner: Mutex::new(Inner {
                    generation: 0,
                    pending: None,
                    active: None,
                }),
                open_providers: AtomicUsize::new(0),
            }),
            transports: HashMap::new(),
            prompt,
        }
    }

    /// Register a transport under its kind, replacing any previous one
    pub fn register_transport(&mut self, transport: Arc<dyn WalletTransport>) -> &mut Self {
        self.transports.insert(transport.kind(), transport);
        self
    }

    /// Watch the session's published state
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Checksummed address, `None` unless connected
    pub fn address(&self) -> Option<String> {
        match self.state() {
            SessionState::Connected { account, .. } => Some(account.address),
            _ => None,
        }
    }

    /// Native balance (eventually consistent), `None` unless connected
    pub fn balance(&self) -> Option<String> {
        match self.state() {
            SessionState::Connected { account, .. } => Some(account.balance),
            _ => None,
        }
    }

    /// Diagnostic: how many provider handles are currently open. The
    /// session invariant keeps this at zero or one.
    pub fn open_provider_count(&self) -> usize {
        self.shared.open_providers.load(Ordering::SeqCst)
    }

    /// Connect through the given transport, superseding any session that is
    /// active or still in flight. Returns once `Connected` or `Failed` has
    /// been published; a superseded call returns `Error::Superseded` and
    /// publishes nothing.
    pub async fn connect(&self, kind: TransportKind) -> Result<()> {
        // wiring bug, not a wallet failure: leave any existing session alone
        let transport = self
            .transports
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Unexpected(format!("no {} transport registered", kind)))?;

        let slot: ProviderSlot = Arc::new(StdMutex::new(None));
        let mut released: Vec<Arc<dyn Provider>> = Vec::new();

        let (generation, cancel) = {
            let mut inner = self.shared.inner.lock().await;
            if let Some(pending) = inner.pending.take() {
                pending.cancel.cancel();
                if let Some(orphan) = pending.slot.lock().unwrap().take() {
                    released.push(orphan);
                }
            }
            if let Some(active) = inner.active.take() {
                active.cancel.cancel();
                released.push(active.provider);
            }
            inner.generation += 1;
            let cancel = CancellationToken::new();
            inner.pending = Some(PendingConnect {
                cancel: cancel.clone(),
                slot: Arc::clone(&slot),
            });
            self.shared.publish(SessionState::Loading(kind));
            (inner.generation, cancel)
        };
        for provider in released {
            self.shared.release(provider).await;
        }

        info!(transport = %kind, "connecting wallet");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Superseded),
            established = self.establish(transport.as_ref(), generation, &cancel, &slot) => established,
        };

        match result {
            Ok(established) => self.install(generation, cancel, established).await,
            Err(e) => {
                if let Some(orphan) = slot.lock().unwrap().take() {
                    self.shared.release(orphan).await;
                }
                self.fail(generation, &cancel, e).await
            }
        }
    }

    async fn establish(
        &self,
        transport: &dyn WalletTransport,
        generation: u64,
        cancel: &CancellationToken,
        slot: &ProviderSlot,
    ) -> Result<Established> {
        let provider = transport.acquire(cancel).await?;
        self.shared.open_providers.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            self.shared.release(provider).await;
            return Err(Error::Superseded);
        }
        *slot.lock().unwrap() = Some(Arc::clone(&provider));

        self.shared
            .publish_if_current(generation, SessionState::VerifyingChain)
            .await;
        guard::ensure_chain(provider.as_ref(), &self.shared.chain).await?;

        let accounts: Vec<String> = serde_json::from_value(
            provider
                .request(methods::ETH_REQUEST_ACCOUNTS, json!(null))
                .await
                .map_err(classify_request)?,
        )?;
        let first = accounts.first().ok_or(Error::NoAccounts)?;
        let address = account::to_checksum_address(first)?;

        let balance = bridge::fetch_balance(
            provider.as_ref(),
            &address,
            self.shared.chain.native_currency.decimals,
        )
        .await?;

        let events = provider.take_events().ok_or_else(|| {
            Error::Unexpected("provider event stream already taken".to_string())
        })?;

        // a superseder may have reaped (and released) the handle already
        if slot.lock().unwrap().take().is_none() {
            return Err(Error::Superseded);
        }
        Ok(Established {
            provider,
            account: Account { address, balance },
            events,
        })
    }

    async fn install(
        &self,
        generation: u64,
        cancel: CancellationToken,
        established: Established,
    ) -> Result<()> {
        let account = established.account.clone();
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation || cancel.is_cancelled() {
                drop(inner);
                self.shared.release(established.provider).await;
                return Err(Error::Superseded);
            }
            inner.pending = None;

            bridge::spawn(
                Arc::clone(&self.shared),
                Arc::clone(&established.provider),
                established.events,
                generation,
                cancel.clone(),
            );
            inner.active = Some(ActiveSession {
                provider: established.provider,
                account: account.clone(),
                chain_ok: true,
                cancel,
            });
            self.shared.publish(SessionState::Connected {
                account: account.clone(),
                chain_ok: true,
            });
        }

        info!(address = %account::short_address(&account.address), "wallet connected");
        Ok(())
    }

    async fn fail(&self, generation: u64, cancel: &CancellationToken, e: Error) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock().await;
            let current = inner.generation == generation && !cancel.is_cancelled();
            if !current || !e.is_publishable() {
                drop(inner);
                debug!(error = %e, "superseded connect attempt finished quietly");
                return Err(Error::Superseded);
            }
            inner.pending = None;
            self.shared.publish(SessionState::Failed {
                reason: e.to_string(),
            });
        }

        if e.is_user_actionable() {
            warn!(error = %e, "wallet connection failed");
        } else {
            error!(error = %e, "wallet connection failed");
        }
        Err(e)
    }

    /// Explicit, user-initiated disconnect. Consults the confirmation
    /// prompt while a wallet is connected; returns `Ok(false)` when the
    /// user keeps the session.
    pub async fn disconnect(&self) -> Result<bool> {
        if self.state().is_connected() && !self.prompt.confirm_disconnect().await {
            info!("disconnect cancelled at confirmation");
            return Ok(false);
        }

        let released = {
            let mut inner = self.shared.inner.lock().await;
            let mut released: Vec<Arc<dyn Provider>> = Vec::new();
            let had_pending = if let Some(pending) = inner.pending.take() {
                pending.cancel.cancel();
                if let Some(orphan) = pending.slot.lock().unwrap().take() {
                    released.push(orphan);
                }
                true
            } else {
                false
            };
            if let Some(active) = inner.active.take() {
                active.cancel.cancel();
                released.push(active.provider);
            }
            if had_pending || !released.is_empty() {
                inner.generation += 1;
                self.shared.publish(SessionState::Disconnected);
            }
            released
        };

        let had_session = !released.is_empty();
        for provider in released {
            self.shared.release(provider).await;
        }
        if had_session {
            info!("wallet disconnected");
        }
        Ok(true)
    }
}

fn classify_request(e: ProviderError) -> Error {
    if e.is_user_rejected() {
        Error::UserRejected(e.message)
    } else {
        Error::Provider(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::host::{MemoryHost, RuntimeHost};
    use crate::transport::injected::InjectedTransport;
    use crate::transport::simulated::SimulatedWallet;
    use std::time::Duration;

    const ADDR_A: &str = "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359";
    const ADDR_A_CHECKSUMMED: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";
    const ADDR_B: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
    const ADDR_B_CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    const ONE_AND_A_HALF: u128 = 1_500_000_000_000_000_000;
    const TWO: u128 = 2_000_000_000_000_000_000;

    struct ScriptedPrompt {
        answer: bool,
        asked: AtomicUsize,
    }

    impl ScriptedPrompt {
        fn new(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer,
                asked: AtomicUsize::new(0),
            })
        }

        fn times_asked(&self) -> usize {
            self.asked.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl DisconnectPrompt for ScriptedPrompt {
        async fn confirm_disconnect(&self) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn ready_wallet(chain: &str) -> Arc<SimulatedWallet> {
        let wallet = SimulatedWallet::new(chain);
        wallet.set_accounts(&[ADDR_A]);
        wallet.set_balance(ADDR_A, ONE_AND_A_HALF);
        wallet
    }

    struct TestEnv {
        session: ConnectionSession,
        wallet: Arc<SimulatedWallet>,
        host: Arc<MemoryHost>,
        prompt: Arc<ScriptedPrompt>,
    }

    fn env_with(wallet: Arc<SimulatedWallet>, confirm_answer: bool) -> TestEnv {
        let host = MemoryHost::new();
        host.install("ethereum", Some(wallet.clone() as Arc<dyn Provider>));
        let prompt = ScriptedPrompt::new(confirm_answer);
        let mut session = ConnectionSession::new(ChainSpec::polygon(), prompt.clone());
        session.register_transport(Arc::new(InjectedTransport::with_defaults(
            host.clone() as Arc<dyn RuntimeHost>
        )));
        TestEnv {
            session,
            wallet,
            host,
            prompt,
        }
    }

    fn env() -> TestEnv {
        env_with(ready_wallet("0x89"), true)
    }

    async fn wait_for_state<F>(rx: &mut watch::Receiver<SessionState>, pred: F) -> SessionState
    where
        F: Fn(&SessionState) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                {
                    let state = rx.borrow_and_update().clone();
                    if pred(&state) {
                        return state;
                    }
                }
                rx.changed().await.expect("session dropped");
            }
        })
        .await
        .expect("state never reached")
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reads_account_and_balance() {
        let env = env();
        env.session.connect(TransportKind::Injected).await.unwrap();

        match env.session.state() {
            SessionState::Connected { account, chain_ok } => {
                assert_eq!(account.address, ADDR_A_CHECKSUMMED);
                assert_eq!(account.balance, "1.5");
                assert!(chain_ok);
            }
            other => panic!("expected connected, got {:?}", other),
        }
        assert_eq!(env.session.address().unwrap(), ADDR_A_CHECKSUMMED);
        assert_eq!(env.session.balance().unwrap(), "1.5");
        assert_eq!(env.session.open_provider_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_registers_missing_chain_then_switches() {
        // wallet sits on Ethereum and has never heard of Polygon
        let wallet = ready_wallet("0x1");
        let env = env_with(wallet, true);

        env.session.connect(TransportKind::Injected).await.unwrap();

        assert!(env.session.state().is_connected());
        assert_eq!(env.wallet.chain_id(), "0x89");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_fails_when_chain_cannot_be_added() {
        let wallet = ready_wallet("0x1");
        wallet.set_add_error(ProviderError::new(-32000, "chain registration failed"));
        let env = env_with(wallet, true);

        let err = env.session.connect(TransportKind::Injected).await.unwrap_err();
        assert!(matches!(err, Error::ChainMismatch(_)), "got {:?}", err);
        assert!(matches!(env.session.state(), SessionState::Failed { .. }));
        assert_eq!(env.session.open_provider_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_account_enumeration_fails() {
        let wallet = SimulatedWallet::new("0x89");
        wallet.set_accounts(&[]);
        let env = env_with(wallet, true);

        let err = env.session.connect(TransportKind::Injected).await.unwrap_err();
        assert!(matches!(err, Error::NoAccounts), "got {:?}", err);
        assert!(matches!(env.session.state(), SessionState::Failed { .. }));
        assert_eq!(env.session.open_provider_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_account_request_fails_and_recovers() {
        let wallet = ready_wallet("0x89");
        wallet.reject_accounts();
        let env = env_with(wallet, true);

        let err = env.session.connect(TransportKind::Injected).await.unwrap_err();
        assert!(matches!(err, Error::UserRejected(_)), "got {:?}", err);

        // Failed is inert but never stuck: a fresh connect works. The
        // simulated rejection flag stays on, so swap in a fresh wallet.
        let wallet = ready_wallet("0x89");
        env.host
            .install("ethereum", Some(wallet as Arc<dyn Provider>));
        env.session.connect(TransportKind::Injected).await.unwrap();
        assert!(env.session.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_transport_leaves_state_alone() {
        let env = env();
        env.session.connect(TransportKind::Injected).await.unwrap();

        let err = env.session.connect(TransportKind::Remote).await.unwrap_err();
        assert!(matches!(err, Error::Unexpected(_)));
        // the active session was not torn down by the wiring mistake
        assert!(env.session.state().is_connected());
        assert_eq!(env.session.open_provider_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_disconnect_event_bypasses_confirmation() {
        let env = env();
        let mut rx = env.session.subscribe();
        env.session.connect(TransportKind::Injected).await.unwrap();

        env.wallet.emit_disconnect();
        wait_for_state(&mut rx, |s| *s == SessionState::Disconnected).await;

        assert_eq!(env.prompt.times_asked(), 0);
        assert_eq!(env.session.open_provider_count(), 0);
        assert_eq!(env.session.address(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_accounts_event_disconnects_without_confirmation() {
        let env = env();
        let mut rx = env.session.subscribe();
        env.session.connect(TransportKind::Injected).await.unwrap();

        env.wallet.emit_accounts_changed(&[]);
        wait_for_state(&mut rx, |s| *s == SessionState::Disconnected).await;

        assert_eq!(env.prompt.times_asked(), 0);
        assert_eq!(env.session.open_provider_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_confirmation_keeps_session() {
        let env = env_with(ready_wallet("0x89"), false);
        env.session.connect(TransportKind::Injected).await.unwrap();

        let disconnected = env.session.disconnect().await.unwrap();
        assert!(!disconnected);
        assert_eq!(env.prompt.times_asked(), 1);
        assert!(env.session.state().is_connected());
        assert_eq!(env.session.address().unwrap(), ADDR_A_CHECKSUMMED);
        assert_eq!(env.session.open_provider_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_disconnect_tears_down() {
        let env = env();
        env.session.connect(TransportKind::Injected).await.unwrap();

        let disconnected = env.session.disconnect().await.unwrap();
        assert!(disconnected);
        assert_eq!(env.session.state(), SessionState::Disconnected);
        assert_eq!(env.session.open_provider_count(), 0);
        // the transport's own disconnect was attempted
        assert_eq!(env.wallet.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accounts_changed_updates_address_then_balance() {
        let env = env();
        let mut rx = env.session.subscribe();
        env.session.connect(TransportKind::Injected).await.unwrap();
        env.wallet.set_balance(ADDR_B, TWO);

        env.wallet.emit_accounts_changed(&[ADDR_B]);

        let state = wait_for_state(&mut rx, |s| match s {
            SessionState::Connected { account, .. } => {
                account.address == ADDR_B_CHECKSUMMED && account.balance == "2"
            }
            _ => false,
        })
        .await;
        assert!(state.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_balance_refresh_is_discarded() {
        let env = env();
        env.session.connect(TransportKind::Injected).await.unwrap();

        // a refresh for A is still pending when the wallet moves to B
        env.wallet.set_balance_delay(ADDR_A, Duration::from_millis(800));
        env.wallet.set_balance(ADDR_B, TWO);
        env.wallet.emit_accounts_changed(&[ADDR_A]);
        env.wallet.emit_accounts_changed(&[ADDR_B]);

        let mut rx = env.session.subscribe();
        wait_for_state(&mut rx, |s| match s {
            SessionState::Connected { account, .. } => account.balance == "2",
            _ => false,
        })
        .await;

        // let A's slow refresh resolve; it must not overwrite B's state
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(env.session.address().unwrap(), ADDR_B_CHECKSUMMED);
        assert_eq!(env.session.balance().unwrap(), "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_drift_is_switched_back() {
        let env = env();
        env.session.connect(TransportKind::Injected).await.unwrap();

        env.wallet.emit_chain_changed("0x1");

        // the bridge re-runs the chain guarantor, which switches the wallet
        // back to the required network
        tokio::time::timeout(Duration::from_secs(10), async {
            while env.wallet.chain_id() != "0x89" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("wallet never switched back");
        assert!(env.session.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfixable_chain_drift_is_an_advisory_not_a_failure() {
        let env = env();
        let mut rx = env.session.subscribe();
        env.session.connect(TransportKind::Injected).await.unwrap();

        // user refuses to switch back
        env.wallet
            .set_switch_error(ProviderError::user_rejected("User rejected the request"));
        env.wallet.emit_chain_changed("0x1");

        let state = wait_for_state(&mut rx, |s| match s {
            SessionState::Connected { chain_ok, .. } => !*chain_ok,
            _ => false,
        })
        .await;
        assert!(state.is_connected(), "advisory must not disconnect");

        // drifting back clears the advisory
        env.wallet.emit_chain_changed("0x89");
        wait_for_state(&mut rx, |s| match s {
            SessionState::Connected { chain_ok, .. } => *chain_ok,
            _ => false,
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseding_connect_cancels_in_flight_attempt() {
        let wallet = ready_wallet("0x89");
        let host = MemoryHost::new();
        let prompt = ScriptedPrompt::new(true);
        let mut session = ConnectionSession::new(ChainSpec::polygon(), prompt.clone());
        session.register_transport(Arc::new(InjectedTransport::with_defaults(
            host.clone() as Arc<dyn RuntimeHost>
        )));
        let session = Arc::new(session);

        // the provider only appears later, so the first connect is stuck in
        // its detector wait when the second one lands
        host.install_after(
            "ethereum",
            Some(wallet as Arc<dyn Provider>),
            Duration::from_millis(700),
        );

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.connect(TransportKind::Injected).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = session.connect(TransportKind::Injected).await;
        assert!(second.is_ok());
        assert!(matches!(first.await.unwrap(), Err(Error::Superseded)));
        assert!(session.state().is_connected());
        assert_eq!(session.open_provider_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_releases_previous_handle_first() {
        let env = env();
        env.session.connect(TransportKind::Injected).await.unwrap();
        assert_eq!(env.session.open_provider_count(), 1);

        // second wallet takes over the injection point
        let replacement = ready_wallet("0x89");
        env.host
            .install("ethereum", Some(replacement as Arc<dyn Provider>));

        env.session.connect(TransportKind::Injected).await.unwrap();
        assert_eq!(env.session.open_provider_count(), 1);
        // the first handle got a best-effort transport disconnect
        assert_eq!(env.wallet.disconnect_count(), 1);
    }
}
