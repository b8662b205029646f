//! Late-bound capability detection
//!
//! Library loading completes through side-effected globals, not a callback
//! we control. The detector turns that into a cancellable timed wait: poll a
//! set of candidate namespace paths until one resolves or the budget runs
//! out. Absence is an answer (`None`), not an error.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::loader::host::RuntimeHost;

/// A named path into the global namespace whose presence indicates a
/// finished library. Several candidates may denote the same capability
/// (libraries expose different namespace shapes across versions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityHandle {
    pub path: String,
}

impl CapabilityHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl std::fmt::Display for CapabilityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Polls candidate handles against the runtime host
#[derive(Clone)]
pub struct CapabilityDetector {
    host: Arc<dyn RuntimeHost>,
}

impl CapabilityDetector {
    pub fn new(host: Arc<dyn RuntimeHost>) -> Self {
        Self { host }
    }

    /// Instantaneous check: first candidate that currently resolves
    pub fn probe(&self, candidates: &[CapabilityHandle]) -> Option<CapabilityHandle> {
        candidates
            .iter()
            .find(|handle| self.host.resolve(&handle.path))
            .cloned()
    }

    /// Wait until a candidate resolves, the timeout elapses, or the token is
    /// cancelled. Once any of those happens no further polling ticks run.
    pub async fn wait_for(
        &self,
        candidates: &[CapabilityHandle],
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Option<CapabilityHandle> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!("capability wait cancelled");
                    return None;
                }
                _ = &mut deadline => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "capability wait timed out");
                    return None;
                }
                _ = ticker.tick() => {
                    if let Some(found) = self.probe(candidates) {
                        debug!(capability = %found, "capability resolved");
                        return Some(found);
                    }
                }
            }
        }
    }
}
