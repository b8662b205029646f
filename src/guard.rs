//! Chain guarantor
//!
//! Makes sure the connected wallet is on the required network before (and
//! while) a session uses it. Switch first; if the wallet does not know the
//! chain, register it and retry the switch once. Anything else is the
//! user's to resolve and propagates unchanged.

use serde_json::json;
use tracing::{debug, info};

use crate::chain::ChainSpec;
use crate::error::{Error, Result};
use crate::transport::{methods, Provider, ProviderError};

/// Ensure the wallet behind `provider` is on `chain`.
///
/// Idempotent fast path when the wallet already reports the required chain.
/// Re-invoked by the event bridge after every chain-changed notification
/// while connected, not only at initial connect.
pub async fn ensure_chain(provider: &dyn Provider, chain: &ChainSpec) -> Result<()> {
    let current: String =
        serde_json::from_value(provider.request(methods::ETH_CHAIN_ID, json!(null)).await?)?;

    if chain.matches_hex(&current) {
        debug!(chain = %chain.chain_id_hex, "wallet already on required chain");
        return Ok(());
    }

    info!(from = %current, to = %chain.chain_id_hex, "requesting wallet network switch");
    let switch_params = json!([{ "chainId": chain.chain_id_hex }]);

    match provider
        .request(methods::WALLET_SWITCH_ETHEREUM_CHAIN, switch_params.clone())
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.is_unrecognized_chain() => {
            info!(chain = %chain.display_name, "wallet does not know the chain, registering it");
            provider
                .request(
                    methods::WALLET_ADD_ETHEREUM_CHAIN,
                    json!([chain.add_chain_params()]),
                )
                .await
                .map_err(classify)?;
            provider
                .request(methods::WALLET_SWITCH_ETHEREUM_CHAIN, switch_params)
                .await
                .map_err(classify)?;
            Ok(())
        }
        Err(e) => Err(classify(e)),
    }
}

fn classify(e: ProviderError) -> Error {
    if e.is_user_rejected() {
        Error::UserRejected(e.message)
    } else {
        Error::ChainMismatch(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::simulated::SimulatedWallet;

    fn polygon() -> ChainSpec {
        ChainSpec::polygon()
    }

    #[tokio::test]
    async fn test_matching_chain_is_a_no_op() {
        let wallet = SimulatedWallet::new("0x89");
        ensure_chain(wallet.as_ref(), &polygon()).await.unwrap();
        assert_eq!(wallet.request_log(), vec![methods::ETH_CHAIN_ID]);
    }

    #[tokio::test]
    async fn test_known_chain_switches_directly() {
        let wallet = SimulatedWallet::new("0x1");
        wallet.register_chain("0x89");

        ensure_chain(wallet.as_ref(), &polygon()).await.unwrap();

        assert_eq!(wallet.chain_id(), "0x89");
        assert_eq!(
            wallet.request_log(),
            vec![methods::ETH_CHAIN_ID, methods::WALLET_SWITCH_ETHEREUM_CHAIN]
        );
    }

    #[tokio::test]
    async fn test_unknown_chain_adds_then_switches() {
        // wallet on Ethereum, Polygon not registered
        let wallet = SimulatedWallet::new("0x1");

        ensure_chain(wallet.as_ref(), &polygon()).await.unwrap();

        assert_eq!(wallet.chain_id(), "0x89");
        assert_eq!(
            wallet.request_log(),
            vec![
                methods::ETH_CHAIN_ID,
                methods::WALLET_SWITCH_ETHEREUM_CHAIN,
                methods::WALLET_ADD_ETHEREUM_CHAIN,
                methods::WALLET_SWITCH_ETHEREUM_CHAIN,
            ]
        );
    }

    #[tokio::test]
    async fn test_message_pattern_counts_as_unrecognized() {
        let wallet = SimulatedWallet::new("0x1");
        wallet.set_switch_error(ProviderError::new(-32603, "Unrecognized chain ID 0x89"));

        // first switch fails with the message-only signal; add + retry succeed
        ensure_chain(wallet.as_ref(), &polygon()).await.unwrap();
        assert_eq!(wallet.chain_id(), "0x89");
    }

    #[tokio::test]
    async fn test_rejection_propagates_as_user_rejected() {
        let wallet = SimulatedWallet::new("0x1");
        wallet.register_chain("0x89");
        wallet.set_switch_error(ProviderError::user_rejected("User rejected the request"));

        let err = ensure_chain(wallet.as_ref(), &polygon()).await.unwrap_err();
        assert!(matches!(err, Error::UserRejected(_)), "got {:?}", err);
        assert_eq!(wallet.chain_id(), "0x1");
    }

    #[tokio::test]
    async fn test_failed_registration_is_chain_mismatch() {
        let wallet = SimulatedWallet::new("0x1");
        wallet.set_add_error(ProviderError::new(-32000, "chain registration failed"));

        let err = ensure_chain(wallet.as_ref(), &polygon()).await.unwrap_err();
        assert!(matches!(err, Error::ChainMismatch(_)), "got {:?}", err);
    }
}
