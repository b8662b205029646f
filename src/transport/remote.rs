//! WalletConnect-style remote transport
//!
//! The provider runtime is an external script (local copy preferred, CDN
//! fallback) that has shipped under several namespace shapes across
//! versions. Once the runtime is present, pairing runs out-of-band (QR scan,
//! deep link); only its completion or rejection is observed here. Requires
//! the project credential from page configuration; its absence is a
//! recoverable failure, never a crash.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};
use crate::loader::detector::CapabilityHandle;
use crate::loader::host::RuntimeHost;
use crate::loader::{LoadRequest, RuntimeLoader};
use crate::transport::{Provider, ProviderError, TransportKind, WalletTransport};

/// Namespace shapes the provider runtime has used across releases
pub fn default_candidates() -> Vec<CapabilityHandle> {
    [
        "WalletConnect",
        "WalletConnectEthereumProvider",
        "WalletConnectProvider",
        "EthereumProvider",
        "WalletConnect.default",
        "WalletConnect.EthereumProvider",
    ]
    .into_iter()
    .map(CapabilityHandle::new)
    .collect()
}

pub struct RemoteTransport {
    loader: RuntimeLoader,
    host: Arc<dyn RuntimeHost>,
    runtime: LoadRequest,
    project_id: String,
}

impl RemoteTransport {
    pub fn new(
        loader: RuntimeLoader,
        host: Arc<dyn RuntimeHost>,
        runtime: LoadRequest,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            loader,
            host,
            runtime,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl WalletTransport for RemoteTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Remote
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<Arc<dyn Provider>> {
        if self.project_id.trim().is_empty() {
            return Err(Error::MissingCredential(
                "WalletConnect project id (walletconnect.project_id)".to_string(),
            ));
        }

        let outcome = self.loader.ensure_loaded(&self.runtime, cancel).await?;

        let provider = self.host.provider(&outcome.resolved.path).ok_or_else(|| {
            Error::Unexpected(format!(
                "capability '{}' resolved without a provider handle",
                outcome.resolved
            ))
        })?;

        info!(capability = %outcome.resolved, "starting wallet pairing");
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Superseded),
            paired = provider.connect() => paired.map_err(classify)?,
        }

        Ok(provider)
    }
}

fn classify(e: ProviderError) -> Error {
    if e.is_user_rejected() {
        Error::UserRejected(e.message)
    } else {
        Error::Provider(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::host::{MemoryHost, ResourceFetcher, StaticFetcher};
    use crate::loader::LoaderTimings;
    use crate::transport::simulated::SimulatedWallet;

    const LOCAL: &str = "https://app.test/assets/wallet/index.min.js";
    const REMOTE: &str = "https://cdn.test/wallet-provider/index.min.js";

    fn runtime_request() -> LoadRequest {
        LoadRequest {
            capability: "wallet-provider".to_string(),
            local_url: LOCAL.to_string(),
            remote_url: REMOTE.to_string(),
            candidates: default_candidates(),
        }
    }

    fn transport(
        fetcher: &Arc<StaticFetcher>,
        host: &Arc<MemoryHost>,
        project_id: &str,
    ) -> RemoteTransport {
        let loader = RuntimeLoader::new(
            Arc::clone(fetcher) as Arc<dyn ResourceFetcher>,
            Arc::clone(host) as Arc<dyn RuntimeHost>,
            LoaderTimings::default(),
        );
        RemoteTransport::new(
            loader,
            Arc::clone(host) as Arc<dyn RuntimeHost>,
            runtime_request(),
            project_id,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_project_id_is_recoverable_failure() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();

        let err = transport(&fetcher, &host, "  ")
            .acquire(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredential(_)), "got {:?}", err);
        // nothing was loaded on behalf of a misconfigured page
        assert!(host.executions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loads_runtime_then_pairs() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        let wallet = SimulatedWallet::new("0x89");
        fetcher.put(LOCAL, b"umd bundle");
        host.stage(LOCAL, "EthereumProvider", Some(wallet.clone() as Arc<dyn Provider>), None);

        let provider = transport(&fetcher, &host, "test-project-id")
            .acquire(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(host.executions(), vec![LOCAL]);
        assert!(provider.take_events().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_pairing_maps_to_user_rejected() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        let wallet = SimulatedWallet::new("0x89");
        wallet.reject_pairing();
        fetcher.put(LOCAL, b"umd bundle");
        host.stage(LOCAL, "EthereumProvider", Some(wallet.clone() as Arc<dyn Provider>), None);

        let err = transport(&fetcher, &host, "test-project-id")
            .acquire(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UserRejected(_)), "got {:?}", err);
    }
}
