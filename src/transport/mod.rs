//! Wallet transports
//!
//! Both connect flows (browser-injected wallet and WalletConnect pairing)
//! share one provider capability set: complete your own initialization,
//! answer requests, emit notifications, disconnect.
//! Everything transport-specific lives behind [`WalletTransport`]; the
//! session never knows which kind it is driving beyond the [`TransportKind`]
//! tag it publishes.

pub mod injected;
pub mod remote;
pub mod simulated;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Which provider source a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Wallet interface already present in the page's global scope
    Injected,
    /// Wallet reached via an out-of-band pairing protocol (QR / deep link)
    Remote,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Injected => write!(f, "injected"),
            TransportKind::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "injected" => Ok(TransportKind::Injected),
            "remote" | "walletconnect" => Ok(TransportKind::Remote),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// Wallet RPC method names (EIP-1193 / EIP-3085 / EIP-3326)
pub mod methods {
    pub const ETH_CHAIN_ID: &str = "eth_chainId";
    pub const ETH_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const ETH_GET_BALANCE: &str = "eth_getBalance";
    pub const WALLET_SWITCH_ETHEREUM_CHAIN: &str = "wallet_switchEthereumChain";
    pub const WALLET_ADD_ETHEREUM_CHAIN: &str = "wallet_addEthereumChain";
}

lazy_static! {
    // Some wallets report an unknown chain through the message text instead
    // of the 4902 code
    static ref UNRECOGNIZED_CHAIN_RE: Regex = Regex::new(r"(?i)unrecognized chain").unwrap();
}

/// Error returned by a wallet provider, carrying the application-level code
/// wallets use to distinguish outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("code {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    /// EIP-1193: the user rejected the request
    pub const USER_REJECTED: i64 = 4001;
    /// EIP-3326: the wallet does not know the requested chain
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self::new(Self::USER_REJECTED, message)
    }

    pub fn is_user_rejected(&self) -> bool {
        self.code == Self::USER_REJECTED
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == Self::UNRECOGNIZED_CHAIN || UNRECOGNIZED_CHAIN_RE.is_match(&self.message)
    }
}

/// Notification from a live provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The wallet's account list changed. Empty means the wallet revoked
    /// access entirely.
    AccountsChanged(Vec<String>),
    /// The wallet moved to another network (hex chain id)
    ChainChanged(String),
    /// The wallet ended the connection on its side
    Disconnected,
}

/// Live wallet connection. Exclusively owned by the active session for its
/// lifetime.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Complete the provider's own initialization/pairing flow. For injected
    /// providers this is a no-op; for remote providers it blocks on the
    /// out-of-band pairing (QR scan, deep link) until completed or rejected.
    async fn connect(&self) -> std::result::Result<(), ProviderError>;

    /// Issue a wallet RPC request
    async fn request(&self, method: &str, params: Value)
        -> std::result::Result<Value, ProviderError>;

    /// Take the provider's notification stream. Yields `Some` exactly once;
    /// later calls return `None`, which makes duplicate listener attachment
    /// structurally impossible.
    fn take_events(&self) -> Option<mpsc::Receiver<ProviderEvent>>;

    /// Best-effort teardown of the provider's side of the connection
    async fn disconnect(&self) -> std::result::Result<(), ProviderError>;
}

/// A way of obtaining a live provider. Implementations: [`injected::InjectedTransport`],
/// [`remote::RemoteTransport`].
#[async_trait]
pub trait WalletTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Resolve this transport's runtime and produce a live provider.
    /// Cancellation (a superseding connect or a disconnect) must stop any
    /// internal waiting promptly.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Arc<dyn Provider>>;
}
