//! Error types for the wallet orchestrator

use thiserror::Error;

use crate::transport::ProviderError;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the wallet orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // Runtime loading errors
    #[error("Capability '{capability}' did not appear within {waited_ms}ms")]
    LoadTimeout { capability: String, waited_ms: u64 },

    #[error("All sources failed loading '{capability}': {detail}")]
    LoadFailed { capability: String, detail: String },

    // Wallet interaction errors
    #[error("Wallet request rejected: {0}")]
    UserRejected(String),

    #[error("Wallet returned no accounts")]
    NoAccounts,

    #[error("Could not switch wallet to the required network: {0}")]
    ChainMismatch(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    // Provider errors that carry no better classification
    #[error("Wallet provider error: {0}")]
    Provider(#[from] ProviderError),

    // Data errors
    #[error("Invalid account address: {0}")]
    InvalidAddress(String),

    #[error("Invalid wei quantity: {0}")]
    InvalidBalance(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The connect attempt was replaced by a newer one. Never published as a
    /// session state; the superseding call owns the published outcome.
    #[error("Connection attempt superseded")]
    Superseded,

    // Generic errors
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if the user can resolve this error themselves (approve the
    /// wallet prompt, fix page configuration) rather than it being our bug.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Error::UserRejected(_)
                | Error::NoAccounts
                | Error::ChainMismatch(_)
                | Error::MissingCredential(_)
        )
    }

    /// Check if this error should be published as a session failure.
    /// Superseded attempts stay silent; their replacement publishes.
    pub fn is_publishable(&self) -> bool {
        !matches!(self, Error::Superseded)
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Unexpected(format!("malformed wallet response: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_actionable() {
        assert!(Error::UserRejected("declined".into()).is_user_actionable());
        assert!(Error::MissingCredential("project id".into()).is_user_actionable());
        assert!(!Error::LoadTimeout {
            capability: "ethers".into(),
            waited_ms: 6000
        }
        .is_user_actionable());
    }

    #[test]
    fn test_superseded_is_silent() {
        assert!(!Error::Superseded.is_publishable());
        assert!(Error::NoAccounts.is_publishable());
    }
}
