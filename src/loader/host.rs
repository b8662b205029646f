//! Seams to the world the loader cannot control
//!
//! The page's global namespace and its script registry are external, shared,
//! mutable state. The core only touches them through [`RuntimeHost`]; the
//! network only through [`ResourceFetcher`]. Both have in-memory
//! implementations so the whole connect lifecycle runs deterministically in
//! tests and in the demo binary.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Provider;

/// The capability store standing in for the page's global namespace plus its
/// script registry.
///
/// `resolve` must treat a path whose intermediate segments are undefined as
/// simply "not yet", never as an error.
#[async_trait]
pub trait RuntimeHost: Send + Sync {
    /// Whether the dotted namespace path currently resolves to a defined value
    fn resolve(&self, path: &str) -> bool;

    /// The live provider handle published at the path, if any
    fn provider(&self, path: &str) -> Option<Arc<dyn Provider>>;

    /// Execute a fetched resource for its side effects on the namespace.
    /// Capabilities may appear asynchronously after this returns.
    async fn execute(&self, url: &str, body: &[u8]) -> Result<()>;
}

/// Retrieval of external script resources
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Lightweight existence check (HEAD). `Ok(false)` means a definitive
    /// absence; `Err` means the check itself could not be performed.
    async fn exists(&self, url: &str) -> Result<bool>;

    /// Fetch the resource body
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP fetcher used outside tests
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(head_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(head_timeout)
            .build()
            .map_err(|e| Error::Unexpected(format!("http client build failed: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn exists(&self, url: &str) -> Result<bool> {
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| Error::Unexpected(format!("HEAD {} failed: {}", url, e)))?;
        Ok(resp.status().is_success())
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Unexpected(format!("GET {} failed: {}", url, e)))?;
        if !resp.status().is_success() {
            return Err(Error::Unexpected(format!(
                "GET {} returned {}",
                url,
                resp.status()
            )));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Unexpected(format!("reading {} failed: {}", url, e)))?;
        Ok(body.to_vec())
    }
}

type Namespace = Arc<Mutex<HashMap<String, Option<Arc<dyn Provider>>>>>;
type Staged = (String, Option<Arc<dyn Provider>>, Option<Duration>);

/// In-memory host: a namespace of defined paths, optional provider handles,
/// and scripted reactions to executions. Deterministic substitute for the
/// page environment.
#[derive(Default)]
pub struct MemoryHost {
    defined: Namespace,
    // url -> definitions applied when that url is executed
    staged: Mutex<HashMap<String, Vec<Staged>>>,
    fail_urls: Mutex<HashSet<String>>,
    executions: Mutex<Vec<String>>,
    resolve_calls: AtomicUsize,
}

impl MemoryHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Define a namespace path immediately, optionally with a provider handle
    pub fn install(&self, path: &str, provider: Option<Arc<dyn Provider>>) {
        self.defined
            .lock()
            .unwrap()
            .insert(path.to_string(), provider);
    }

    /// Define a namespace path after a delay, modelling late-bound globals
    pub fn install_after(&self, path: &str, provider: Option<Arc<dyn Provider>>, delay: Duration) {
        Self::deferred_install(Arc::clone(&self.defined), path.to_string(), provider, delay);
    }

    /// When `url` is executed, define `path` (after `delay`, if given).
    /// Models a script whose side effect registers the capability, possibly
    /// asynchronously (a thin wrapper fetching the real payload).
    pub fn stage(
        &self,
        url: &str,
        path: &str,
        provider: Option<Arc<dyn Provider>>,
        delay: Option<Duration>,
    ) {
        self.staged
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push((path.to_string(), provider, delay));
    }

    /// Make executing `url` fail (script error)
    pub fn fail_execution(&self, url: &str) {
        self.fail_urls.lock().unwrap().insert(url.to_string());
    }

    /// URLs executed so far, in order
    pub fn executions(&self) -> Vec<String> {
        self.executions.lock().unwrap().clone()
    }

    /// How many times `resolve` has been called (polling instrumentation)
    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    fn deferred_install(
        defined: Namespace,
        path: String,
        provider: Option<Arc<dyn Provider>>,
        delay: Duration,
    ) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(path = %path, "deferred capability now defined");
            defined.lock().unwrap().insert(path, provider);
        });
    }
}

#[async_trait]
impl RuntimeHost for MemoryHost {
    fn resolve(&self, path: &str) -> bool {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.defined.lock().unwrap().contains_key(path)
    }

    fn provider(&self, path: &str) -> Option<Arc<dyn Provider>> {
        self.defined.lock().unwrap().get(path).cloned().flatten()
    }

    async fn execute(&self, url: &str, _body: &[u8]) -> Result<()> {
        self.executions.lock().unwrap().push(url.to_string());

        if self.fail_urls.lock().unwrap().contains(url) {
            return Err(Error::Unexpected(format!("script error executing {}", url)));
        }

        let staged = self.staged.lock().unwrap().remove(url).unwrap_or_default();
        for (path, provider, delay) in staged {
            match delay {
                None => self.install(&path, provider),
                Some(d) => {
                    Self::deferred_install(Arc::clone(&self.defined), path, provider, d)
                }
            }
        }
        Ok(())
    }
}

/// In-memory fetcher backed by a URL -> body map; URLs in the error set fail
/// the existence check itself (network failure, CORS).
#[derive(Default)]
pub struct StaticFetcher {
    present: Mutex<HashMap<String, Vec<u8>>>,
    errors: Mutex<HashSet<String>>,
}

impl StaticFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, url: &str, body: &[u8]) {
        self.present
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }

    pub fn fail(&self, url: &str) {
        self.errors.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl ResourceFetcher for StaticFetcher {
    async fn exists(&self, url: &str) -> Result<bool> {
        if self.errors.lock().unwrap().contains(url) {
            return Err(Error::Unexpected(format!("network failure reaching {}", url)));
        }
        Ok(self.present.lock().unwrap().contains_key(url))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if self.errors.lock().unwrap().contains(url) {
            return Err(Error::Unexpected(format!("network failure reaching {}", url)));
        }
        self.present
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Unexpected(format!("{} not found", url)))
    }
}
