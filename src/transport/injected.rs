//! Browser-injected wallet transport
//!
//! Extension wallets publish their provider into the page's global scope,
//! sometimes well after page load. Acquisition is therefore a short
//! detector wait on the known injection points, then lifting the live
//! handle out of the host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::loader::detector::{CapabilityDetector, CapabilityHandle};
use crate::loader::host::RuntimeHost;
use crate::transport::{Provider, ProviderError, TransportKind, WalletTransport};

/// Globals that injected wallets are known to publish under
pub fn default_candidates() -> Vec<CapabilityHandle> {
    vec![
        CapabilityHandle::new("ethereum"),
        CapabilityHandle::new("web3.currentProvider"),
    ]
}

pub struct InjectedTransport {
    host: Arc<dyn RuntimeHost>,
    detector: CapabilityDetector,
    candidates: Vec<CapabilityHandle>,
    wait: Duration,
    poll_interval: Duration,
}

impl InjectedTransport {
    pub fn new(
        host: Arc<dyn RuntimeHost>,
        candidates: Vec<CapabilityHandle>,
        wait: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            detector: CapabilityDetector::new(Arc::clone(&host)),
            host,
            candidates,
            wait,
            poll_interval,
        }
    }

    pub fn with_defaults(host: Arc<dyn RuntimeHost>) -> Self {
        Self::new(
            host,
            default_candidates(),
            Duration::from_millis(1500),
            Duration::from_millis(200),
        )
    }
}

#[async_trait]
impl WalletTransport for InjectedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Injected
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<Arc<dyn Provider>> {
        let found = match self
            .detector
            .wait_for(&self.candidates, self.wait, self.poll_interval, cancel)
            .await
        {
            Some(found) => found,
            None if cancel.is_cancelled() => return Err(Error::Superseded),
            None => {
                return Err(Error::LoadTimeout {
                    capability: "injected wallet provider".to_string(),
                    waited_ms: self.wait.as_millis() as u64,
                })
            }
        };
        debug!(capability = %found, "injected provider detected");

        let provider = self.host.provider(&found.path).ok_or_else(|| {
            Error::Unexpected(format!(
                "capability '{}' resolved without a provider handle",
                found
            ))
        })?;

        // no-op for well-behaved injected providers; kept for the shared
        // transport capability set
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Superseded),
            connected = provider.connect() => connected.map_err(classify)?,
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
    use crate::loader::host::MemoryHost;
    use crate::transport::simulated::SimulatedWallet;

    fn transport(host: &Arc<MemoryHost>) -> InjectedTransport {
        InjectedTransport::new(
            Arc::clone(host) as Arc<dyn RuntimeHost>,
            default_candidates(),
            Duration::from_millis(1500),
            Duration::from_millis(200),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_present_provider() {
        let host = MemoryHost::new();
        let wallet = SimulatedWallet::new("0x89");
        host.install("ethereum", Some(wallet.clone() as Arc<dyn Provider>));

        let provider = transport(&host)
            .acquire(&CancellationToken::new())
            .await
            .unwrap();
        assert!(provider.connect().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_late_injection() {
        let host = MemoryHost::new();
        let wallet = SimulatedWallet::new("0x89");
        host.install_after("ethereum", Some(wallet.clone() as Arc<dyn Provider>), Duration::from_millis(800));

        let provider = transport(&host).acquire(&CancellationToken::new()).await;
        assert!(provider.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_absence_times_out() {
        let host = MemoryHost::new();
        let err = transport(&host)
            .acquire(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LoadTimeout { .. }), "got {:?}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_silent() {
        let host = MemoryHost::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport(&host).acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Superseded), "got {:?}", err);
    }
}
