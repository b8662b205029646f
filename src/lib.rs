//! Polywallet - Wallet Connection Orchestrator
//!
//! Connects a page to a user's wallet (browser-injected or WalletConnect),
//! guarantees the required network, and supervises the session while
//! tolerating missing or slow-to-load third-party runtimes.

pub mod account;
pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod loader;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use chain::ChainSpec;
pub use config::Config;
pub use error::{Error, Result};
pub use session::{ConnectionSession, SessionState};
pub use transport::TransportKind;
