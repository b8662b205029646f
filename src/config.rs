//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::chain::ChainSpec;
use crate::loader::detector::CapabilityHandle;
use crate::loader::{LoadRequest, LoaderTimings};
use crate::transport::{injected, remote};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The network every session must end up on
    #[serde(default)]
    pub chain: ChainSpec,

    /// Page-level RPC endpoint override; replaces the chain's rpc list
    /// (the deployment equivalent of an rpc meta tag)
    #[serde(default)]
    pub rpc_override: Option<String>,

    #[serde(default)]
    pub loader: LoaderSettings,

    #[serde(default)]
    pub walletconnect: WalletConnectSettings,

    #[serde(default)]
    pub injected: InjectedSettings,

    #[serde(default)]
    pub session: SessionSettings,
}

/// Runtime script resolution settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderSettings {
    /// Preferred local copy of the wallet provider runtime
    #[serde(default = "default_local_url")]
    pub local_url: String,

    /// CDN fallback for the wallet provider runtime
    #[serde(default = "default_remote_url")]
    pub remote_url: String,

    #[serde(default = "default_head_timeout_ms")]
    pub head_timeout_ms: u64,

    /// How long to wait for the capability after each injection
    #[serde(default = "default_detect_timeout_ms")]
    pub detect_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl LoaderSettings {
    pub fn timings(&self) -> LoaderTimings {
        LoaderTimings {
            detect_timeout: Duration::from_millis(self.detect_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_millis(self.head_timeout_ms)
    }
}

/// Remote (WalletConnect) transport settings
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConnectSettings {
    /// Pairing project credential. Empty means the remote transport fails
    /// recoverably with a missing-credential reason.
    #[serde(default = "default_project_id")]
    pub project_id: String,

    /// Registry key coalescing concurrent runtime loads
    #[serde(default = "default_capability")]
    pub capability: String,

    /// Namespace shapes to accept, probed in order
    #[serde(default = "default_wc_candidates")]
    pub candidates: Vec<String>,
}

/// Injected transport settings
#[derive(Debug, Clone, Deserialize)]
pub struct InjectedSettings {
    #[serde(default = "default_injected_candidates")]
    pub candidates: Vec<String>,

    /// How long to wait for a late-injecting extension wallet
    #[serde(default = "default_injected_wait_ms")]
    pub wait_ms: u64,

    #[serde(default = "default_injected_poll_ms")]
    pub poll_interval_ms: u64,
}

/// Session behavior settings
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Ask before carrying out an explicit disconnect. Wallet-originated
    /// teardown never asks.
    #[serde(default = "default_true")]
    pub require_disconnect_confirmation: bool,
}

// Default value functions
fn default_local_url() -> String {
    std::env::var("WALLET_RUNTIME_LOCAL_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8080/assets/wallet-provider/index.min.js".into())
}

fn default_remote_url() -> String {
    "https://cdn.jsdelivr.net/npm/@walletconnect/ethereum-provider@2.6.0/dist/umd/index.min.js"
        .into()
}

fn default_head_timeout_ms() -> u64 {
    3000
}

fn default_detect_timeout_ms() -> u64 {
    6000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_project_id() -> String {
    std::env::var("WALLETCONNECT_PROJECT_ID").unwrap_or_default()
}

fn default_capability() -> String {
    "wallet-provider".to_string()
}

fn default_wc_candidates() -> Vec<String> {
    remote::default_candidates()
        .into_iter()
        .map(|handle| handle.path)
        .collect()
}

fn default_injected_candidates() -> Vec<String> {
    injected::default_candidates()
        .into_iter()
        .map(|handle| handle.path)
        .collect()
}

fn default_injected_wait_ms() -> u64 {
    1500
}

fn default_injected_poll_ms() -> u64 {
    200
}

fn default_true() -> bool {
    true
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            local_url: default_local_url(),
            remote_url: default_remote_url(),
            head_timeout_ms: default_head_timeout_ms(),
            detect_timeout_ms: default_detect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for WalletConnectSettings {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            capability: default_capability(),
            candidates: default_wc_candidates(),
        }
    }
}

impl Default for InjectedSettings {
    fn default() -> Self {
        Self {
            candidates: default_injected_candidates(),
            wait_ms: default_injected_wait_ms(),
            poll_interval_ms: default_injected_poll_ms(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            require_disconnect_confirmation: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainSpec::default(),
            rpc_override: None,
            loader: LoaderSettings::default(),
            walletconnect: WalletConnectSettings::default(),
            injected: InjectedSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix POLYWALLET_)
            .add_source(
                config::Environment::with_prefix("POLYWALLET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        self.chain
            .validate()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        for raw in self
            .chain
            .rpc_urls
            .iter()
            .chain(self.chain.block_explorer_urls.iter())
            .chain(self.rpc_override.iter())
            .chain([&self.loader.local_url, &self.loader.remote_url])
        {
            url::Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw))?;
        }

        if self.loader.poll_interval_ms == 0 || self.injected.poll_interval_ms == 0 {
            anyhow::bail!("poll intervals must be positive");
        }

        if self.loader.detect_timeout_ms == 0 {
            anyhow::bail!("detect_timeout_ms must be positive");
        }

        if self.walletconnect.candidates.is_empty() || self.injected.candidates.is_empty() {
            anyhow::bail!("capability candidate lists cannot be empty");
        }

        if self.walletconnect.project_id.trim().is_empty() {
            tracing::warn!(
                "walletconnect.project_id is not set - remote connects will fail until it is"
            );
        }

        Ok(())
    }

    /// The chain sessions must verify, with the page-level RPC override
    /// applied
    pub fn effective_chain(&self) -> ChainSpec {
        let mut chain = self.chain.clone();
        if let Some(rpc) = &self.rpc_override {
            chain.rpc_urls = vec![rpc.clone()];
        }
        chain
    }

    /// Load request for the remote transport's provider runtime
    pub fn wallet_runtime_request(&self) -> LoadRequest {
        LoadRequest {
            capability: self.walletconnect.capability.clone(),
            local_url: self.loader.local_url.clone(),
            remote_url: self.loader.remote_url.clone(),
            candidates: self
                .walletconnect
                .candidates
                .iter()
                .map(CapabilityHandle::new)
                .collect(),
        }
    }

    pub fn injected_candidates(&self) -> Vec<CapabilityHandle> {
        self.injected
            .candidates
            .iter()
            .map(CapabilityHandle::new)
            .collect()
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Chain:
    id: {} ({})
    name: {}
    currency: {} ({} decimals)
    rpc: {}
  Loader:
    local: {}
    remote: {}
    detect_timeout: {}ms, poll: {}ms
  WalletConnect:
    project_id: {}
    candidates: {:?}
  Injected:
    candidates: {:?}
    wait: {}ms
  Session:
    require_disconnect_confirmation: {}
"#,
            self.chain.chain_id_hex,
            self.chain.chain_id_dec,
            self.chain.display_name,
            self.chain.native_currency.symbol,
            self.chain.native_currency.decimals,
            self.effective_chain().rpc_urls.join(", "),
            self.loader.local_url,
            self.loader.remote_url,
            self.loader.detect_timeout_ms,
            self.loader.poll_interval_ms,
            if self.walletconnect.project_id.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.walletconnect.candidates,
            self.injected.candidates,
            self.injected.wait_ms,
            self.session.require_disconnect_confirmation,
        )
    }
}
