//! Disconnect confirmation policy
//!
//! Only an explicit, user-initiated disconnect asks for confirmation.
//! Wallet-originated teardown (disconnect notification, revoked accounts)
//! has nothing left to confirm and bypasses this entirely.

use async_trait::async_trait;
use dialoguer::Confirm;
use tracing::warn;

/// Asked before an explicit `disconnect()` is carried out
#[async_trait]
pub trait DisconnectPrompt: Send + Sync {
    /// True to proceed with the disconnect
    async fn confirm_disconnect(&self) -> bool;
}

/// Terminal confirmation prompt
pub struct ConsolePrompt;

#[async_trait]
impl DisconnectPrompt for ConsolePrompt {
    async fn confirm_disconnect(&self) -> bool {
        let answer = tokio::task::spawn_blocking(|| {
            Confirm::new()
                .with_prompt("Disconnect wallet? This cannot be undone.")
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(e)) => {
                warn!(error = %e, "confirmation prompt failed, keeping session");
                false
            }
            Err(e) => {
                warn!(error = %e, "confirmation prompt task failed, keeping session");
                false
            }
        }
    }
}

/// Always proceeds; for non-interactive embedders and
/// `session.require_disconnect_confirmation = false`
pub struct AutoConfirm;

#[async_trait]
impl DisconnectPrompt for AutoConfirm {
    async fn confirm_disconnect(&self) -> bool {
        true
    }
}
