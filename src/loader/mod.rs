//! Runtime library loading
//!
//! Wallet runtimes arrive as external scripts that may exist locally, only
//! on a CDN, or nowhere; once executed they may register their capability
//! asynchronously. The loader owns that whole dance: local-first existence
//! check, remote fallback, one in-flight load per capability, and a handoff
//! to the capability detector instead of assuming synchronous readiness.

pub mod detector;
pub mod host;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::loader::detector::{CapabilityDetector, CapabilityHandle};
use crate::loader::host::{ResourceFetcher, RuntimeHost};

/// Where a load attempt sourced its script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Local,
    Remote,
}

impl std::fmt::Display for LoadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadSource::Local => write!(f, "local"),
            LoadSource::Remote => write!(f, "remote"),
        }
    }
}

/// Outcome of a single injection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Loaded,
    Failed(String),
}

/// One injection attempt. Created when initiated, resolved exactly once,
/// never reused; retries create fresh attempts.
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    pub source: LoadSource,
    pub url: String,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
}

impl LoadAttempt {
    fn started(source: LoadSource, url: &str) -> Self {
        Self {
            source,
            url: url.to_string(),
            outcome: AttemptOutcome::Pending,
            started_at: Utc::now(),
        }
    }
}

/// Successful load: which candidate resolved, and what it took to get there.
/// An empty attempt list means the capability was already present.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub resolved: CapabilityHandle,
    pub attempts: Vec<LoadAttempt>,
}

/// Cloneable failure shared between concurrent waiters on the same load
#[derive(Debug, Clone)]
pub enum LoadFailure {
    Timeout { capability: String, waited_ms: u64 },
    AllSourcesFailed { capability: String, detail: String },
}

impl From<LoadFailure> for Error {
    fn from(failure: LoadFailure) -> Self {
        match failure {
            LoadFailure::Timeout {
                capability,
                waited_ms,
            } => Error::LoadTimeout {
                capability,
                waited_ms,
            },
            LoadFailure::AllSourcesFailed { capability, detail } => {
                Error::LoadFailed { capability, detail }
            }
        }
    }
}

type LoadResult = std::result::Result<LoadOutcome, LoadFailure>;

/// What to load and how to recognize it is ready
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Registry key; concurrent loads of the same capability are coalesced
    pub capability: String,
    pub local_url: String,
    pub remote_url: String,
    /// Candidate namespace paths, probed in order
    pub candidates: Vec<CapabilityHandle>,
}

/// Detection budget per injected source
#[derive(Debug, Clone, Copy)]
pub struct LoaderTimings {
    pub detect_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LoaderTimings {
    fn default() -> Self {
        Self {
            detect_timeout: Duration::from_millis(6000),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Loads external runtime scripts, local copy first, CDN fallback.
///
/// Safe to call concurrently for the same capability: a single injection
/// sequence runs per capability and later callers await its result.
#[derive(Clone)]
pub struct RuntimeLoader {
    fetcher: Arc<dyn ResourceFetcher>,
    host: Arc<dyn RuntimeHost>,
    detector: CapabilityDetector,
    timings: LoaderTimings,
    inflight: Arc<DashMap<String, broadcast::Sender<LoadResult>>>,
}

impl RuntimeLoader {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        host: Arc<dyn RuntimeHost>,
        timings: LoaderTimings,
    ) -> Self {
        Self {
            fetcher,
            detector: CapabilityDetector::new(Arc::clone(&host)),
            host,
            timings,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Ensure the requested capability is present, loading its script if
    /// needed. Returns immediately when the capability already resolves.
    ///
    /// Cancelling stops this caller's wait; the underlying load (if any)
    /// runs to completion on its own bounded budget so other waiters and
    /// future callers still benefit from it.
    pub async fn ensure_loaded(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadOutcome> {
        // already satisfied: no re-injection
        if let Some(found) = self.detector.probe(&request.candidates) {
            debug!(capability = %found, "capability already present, skipping load");
            return Ok(LoadOutcome {
                resolved: found,
                attempts: Vec::new(),
            });
        }

        let mut rx = match self.inflight.entry(request.capability.clone()) {
            Entry::Occupied(entry) => {
                debug!(capability = %request.capability, "joining in-flight load");
                entry.get().subscribe()
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(1);
                entry.insert(tx.clone());

                let loader = self.clone();
                let request = request.clone();
                tokio::spawn(async move {
                    let result = loader.perform_load(&request).await;
                    loader.inflight.remove(&request.capability);
                    let _ = tx.send(result);
                });
                rx
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Superseded),
            received = rx.recv() => match received {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(failure)) => Err(failure.into()),
                Err(_) => Err(Error::LoadFailed {
                    capability: request.capability.clone(),
                    detail: "load task dropped without a result".to_string(),
                }),
            },
        }
    }

    async fn perform_load(&self, request: &LoadRequest) -> LoadResult {
        let mut attempts: Vec<LoadAttempt> = Vec::new();

        // A failing existence check is not an error, just a reason to go
        // remote first.
        let local_present = match self.fetcher.exists(&request.local_url).await {
            Ok(present) => present,
            Err(e) => {
                debug!(url = %request.local_url, error = %e, "local existence check failed, using remote");
                false
            }
        };

        let order: [(LoadSource, &str); 2] = if local_present {
            [
                (LoadSource::Local, request.local_url.as_str()),
                (LoadSource::Remote, request.remote_url.as_str()),
            ]
        } else {
            [
                (LoadSource::Remote, request.remote_url.as_str()),
                (LoadSource::Local, request.local_url.as_str()),
            ]
        };

        for (source, url) in order {
            let mut attempt = LoadAttempt::started(source, url);
            match self.inject(url).await {
                Err(e) => {
                    warn!(capability = %request.capability, source = %source, url = %url, error = %e, "injection failed");
                    attempt.outcome = AttemptOutcome::Failed(e.to_string());
                    attempts.push(attempt);
                    continue;
                }
                Ok(()) => {
                    info!(capability = %request.capability, source = %source, url = %url, "script injected");
                    attempt.outcome = AttemptOutcome::Loaded;
                    attempts.push(attempt);
                }
            }

            // the script may register its capability asynchronously; observe,
            // don't assume
            if let Some(found) = self
                .detector
                .wait_for(
                    &request.candidates,
                    self.timings.detect_timeout,
                    self.timings.poll_interval,
                    &CancellationToken::new(),
                )
                .await
            {
                return Ok(LoadOutcome {
                    resolved: found,
                    attempts,
                });
            }
            warn!(capability = %request.capability, source = %source, "script loaded but capability never appeared");
        }

        let injected = attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::Loaded)
            .count() as u64;
        if injected > 0 {
            Err(LoadFailure::Timeout {
                capability: request.capability.clone(),
                waited_ms: injected * self.timings.detect_timeout.as_millis() as u64,
            })
        } else {
            let detail = attempts
                .iter()
                .map(|a| format!("{} {}: {:?}", a.source, a.url, a.outcome))
                .collect::<Vec<_>>()
                .join("; ");
            Err(LoadFailure::AllSourcesFailed {
                capability: request.capability.clone(),
                detail,
            })
        }
    }

    async fn inject(&self, url: &str) -> Result<()> {
        let body = self.fetcher.fetch(url).await?;
        self.host.execute(url, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::host::{MemoryHost, StaticFetcher};

    const LOCAL: &str = "https://app.test/assets/wallet/index.min.js";
    const REMOTE: &str = "https://cdn.test/wallet-provider/index.min.js";

    fn request() -> LoadRequest {
        LoadRequest {
            capability: "wallet-provider".to_string(),
            local_url: LOCAL.to_string(),
            remote_url: REMOTE.to_string(),
            candidates: vec![CapabilityHandle::new("EthereumProvider")],
        }
    }

    fn loader(fetcher: &Arc<StaticFetcher>, host: &Arc<MemoryHost>) -> RuntimeLoader {
        RuntimeLoader::new(
            Arc::clone(fetcher) as Arc<dyn ResourceFetcher>,
            Arc::clone(host) as Arc<dyn RuntimeHost>,
            LoaderTimings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_preferred_when_present() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        fetcher.put(LOCAL, b"local wrapper");
        fetcher.put(REMOTE, b"cdn build");
        // the local wrapper registers the capability a beat later
        host.stage(LOCAL, "EthereumProvider", None, Some(Duration::from_millis(400)));

        let outcome = loader(&fetcher, &host)
            .ensure_loaded(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.resolved.path, "EthereumProvider");
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].source, LoadSource::Local);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::Loaded);
        assert_eq!(host.executions(), vec![LOCAL]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existence_check_error_falls_back_silently() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        fetcher.fail(LOCAL); // HEAD itself errors (network / CORS)
        fetcher.put(REMOTE, b"cdn build");
        host.stage(REMOTE, "EthereumProvider", None, None);

        let outcome = loader(&fetcher, &host)
            .ensure_loaded(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].source, LoadSource::Remote);
        assert_eq!(host.executions(), vec![REMOTE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_injection_tries_other_source_once() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        fetcher.put(LOCAL, b"corrupt");
        fetcher.put(REMOTE, b"cdn build");
        host.fail_execution(LOCAL);
        host.stage(REMOTE, "EthereumProvider", None, None);

        let outcome = loader(&fetcher, &host)
            .ensure_loaded(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts.len(), 2);
        assert!(matches!(outcome.attempts[0].outcome, AttemptOutcome::Failed(_)));
        assert_eq!(outcome.attempts[1].source, LoadSource::Remote);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_sources_failing_is_load_failed() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        // local absent, remote body fetch fails
        fetcher.fail(REMOTE);

        let err = loader(&fetcher, &host)
            .ensure_loaded(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LoadFailed { .. }), "got {:?}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_never_appearing_is_load_timeout() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        fetcher.put(LOCAL, b"loads fine, registers nothing");
        fetcher.put(REMOTE, b"same story");

        let err = loader(&fetcher, &host)
            .ensure_loaded(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LoadTimeout { .. }), "got {:?}", err);
        // both sources got their chance before giving up
        assert_eq!(host.executions(), vec![LOCAL, REMOTE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_satisfied_short_circuits() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        host.install("EthereumProvider", None);

        let outcome = loader(&fetcher, &host)
            .ensure_loaded(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.attempts.is_empty());
        assert!(host.executions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_injection() {
        let fetcher = StaticFetcher::new();
        let host = MemoryHost::new();
        fetcher.put(LOCAL, b"wrapper");
        host.stage(LOCAL, "EthereumProvider", None, Some(Duration::from_millis(300)));

        let loader = loader(&fetcher, &host);
        let req = request();
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            loader.ensure_loaded(&req, &cancel),
            loader.ensure_loaded(&req, &cancel),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(host.executions(), vec![LOCAL], "exactly one injection");
    }
}
