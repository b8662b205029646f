//! Deterministic in-memory wallet
//!
//! Stands in for a real wallet provider in tests and in the demo binary:
//! scripted chain registry, accounts, per-address balances and fetch
//! delays, rejection knobs, and event emitters for driving the bridge.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use crate::transport::{methods, Provider, ProviderError, ProviderEvent};

#[derive(Default)]
struct WalletState {
    chain_id: String,
    known_chains: HashSet<String>,
    accounts: Vec<String>,
    // lowercase address -> wei
    balances: HashMap<String, u128>,
    // lowercase address -> artificial fetch latency
    balance_delays: HashMap<String, Duration>,
    switch_error: Option<ProviderError>,
    add_error: Option<ProviderError>,
    reject_accounts: bool,
    reject_pairing: bool,
}

/// Scriptable wallet provider with an observable request log
pub struct SimulatedWallet {
    state: Mutex<WalletState>,
    request_log: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
    events_tx: mpsc::Sender<ProviderEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ProviderEvent>>>,
}

impl SimulatedWallet {
    pub fn new(chain_id: &str) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(16);
        let mut state = WalletState {
            chain_id: chain_id.to_string(),
            ..WalletState::default()
        };
        state.known_chains.insert(chain_id.to_ascii_lowercase());
        Arc::new(Self {
            state: Mutex::new(state),
            request_log: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    // --- scripting knobs ---

    pub fn register_chain(&self, chain_id: &str) {
        self.state
            .lock()
            .unwrap()
            .known_chains
            .insert(chain_id.to_ascii_lowercase());
    }

    pub fn set_accounts(&self, accounts: &[&str]) {
        self.state.lock().unwrap().accounts =
            accounts.iter().map(|a| a.to_string()).collect();
    }

    pub fn set_balance(&self, address: &str, wei: u128) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(address.to_ascii_lowercase(), wei);
    }

    pub fn set_balance_delay(&self, address: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .balance_delays
            .insert(address.to_ascii_lowercase(), delay);
    }

    /// Fail the next chain-switch request with this error
    pub fn set_switch_error(&self, error: ProviderError) {
        self.state.lock().unwrap().switch_error = Some(error);
    }

    /// Fail the next chain-add request with this error
    pub fn set_add_error(&self, error: ProviderError) {
        self.state.lock().unwrap().add_error = Some(error);
    }

    pub fn reject_accounts(&self) {
        self.state.lock().unwrap().reject_accounts = true;
    }

    pub fn reject_pairing(&self) {
        self.state.lock().unwrap().reject_pairing = true;
    }

    // --- observation ---

    pub fn chain_id(&self) -> String {
        self.state.lock().unwrap().chain_id.clone()
    }

    pub fn request_log(&self) -> Vec<String> {
        self.request_log.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    // --- wallet-originated events ---

    pub fn emit_accounts_changed(&self, accounts: &[&str]) {
        self.emit(ProviderEvent::AccountsChanged(
            accounts.iter().map(|a| a.to_string()).collect(),
        ));
    }

    /// The wallet moved itself to another chain
    pub fn emit_chain_changed(&self, chain_id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.chain_id = chain_id.to_string();
            state.known_chains.insert(chain_id.to_ascii_lowercase());
        }
        self.emit(ProviderEvent::ChainChanged(chain_id.to_string()));
    }

    pub fn emit_disconnect(&self) {
        self.emit(ProviderEvent::Disconnected);
    }

    fn emit(&self, event: ProviderEvent) {
        if self.events_tx.try_send(event).is_err() {
            warn!("simulated wallet event dropped (no listener or buffer full)");
        }
    }

    fn handle_switch(&self, params: &Value) -> Result<Value, ProviderError> {
        let requested = params[0]["chainId"]
            .as_str()
            .ok_or_else(|| ProviderError::new(-32602, "missing chainId"))?
            .to_string();

        {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.switch_error.take() {
                return Err(err);
            }
            if !state.known_chains.contains(&requested.to_ascii_lowercase()) {
                return Err(ProviderError::new(
                    ProviderError::UNRECOGNIZED_CHAIN,
                    format!("Unrecognized chain ID {}", requested),
                ));
            }
            state.chain_id = requested.clone();
        }
        // real wallets notify about the switch they just performed
        self.emit(ProviderEvent::ChainChanged(requested));
        Ok(json!(null))
    }

    fn handle_add(&self, params: &Value) -> Result<Value, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.add_error.take() {
            return Err(err);
        }
        let chain_id = params[0]["chainId"]
            .as_str()
            .ok_or_else(|| ProviderError::new(-32602, "missing chainId"))?;
        state.known_chains.insert(chain_id.to_ascii_lowercase());
        Ok(json!(null))
    }

    async fn handle_get_balance(&self, params: &Value) -> Result<Value, ProviderError> {
        let address = params[0]
            .as_str()
            .ok_or_else(|| ProviderError::new(-32602, "missing address"))?
            .to_ascii_lowercase();

        let (delay, wei) = {
            let state = self.state.lock().unwrap();
            (
                state.balance_delays.get(&address).copied(),
                state.balances.get(&address).copied().unwrap_or(0),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json!(format!("{:#x}", wei)))
    }
}

#[async_trait]
impl Provider for SimulatedWallet {
    async fn connect(&self) -> Result<(), ProviderError> {
        if self.state.lock().unwrap().reject_pairing {
            return Err(ProviderError::user_rejected("Pairing rejected"));
        }
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.request_log.lock().unwrap().push(method.to_string());

        match method {
            methods::ETH_CHAIN_ID => Ok(json!(self.chain_id())),
            methods::ETH_REQUEST_ACCOUNTS => {
                let state = self.state.lock().unwrap();
                if state.reject_accounts {
                    return Err(ProviderError::user_rejected("User rejected the request"));
                }
                Ok(json!(state.accounts))
            }
            methods::ETH_GET_BALANCE => self.handle_get_balance(&params).await,
            methods::WALLET_SWITCH_ETHEREUM_CHAIN => self.handle_switch(&params),
            methods::WALLET_ADD_ETHEREUM_CHAIN => self.handle_add(&params),
            other => Err(ProviderError::new(
                -32601,
                format!("method {} not found", other),
            )),
        }
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ProviderEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn disconnect(&self) -> Result<(), ProviderError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
