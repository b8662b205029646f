//! Target network description
//!
//! A `ChainSpec` carries everything a wallet needs to identify, register and
//! describe the network the orchestrator requires. It is loaded once from
//! configuration and never mutated afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Native currency of a network (EIP-3085 `nativeCurrency` shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Parameters identifying and describing a target network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSpec {
    /// Hex chain id as wallets report it, e.g. "0x89"
    pub chain_id_hex: String,

    /// Decimal chain id, e.g. 137. Must agree with `chain_id_hex`.
    pub chain_id_dec: u64,

    /// Human-readable network name shown in wallet prompts
    pub display_name: String,

    pub native_currency: NativeCurrency,

    /// RPC endpoints in preference order; the first entry is handed to
    /// wallets when registering the chain
    pub rpc_urls: Vec<String>,

    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
}

impl ChainSpec {
    /// Polygon mainnet, the default target network.
    pub fn polygon() -> Self {
        Self {
            chain_id_hex: "0x89".to_string(),
            chain_id_dec: 137,
            display_name: "Polygon Mainnet".to_string(),
            native_currency: NativeCurrency {
                name: "MATIC".to_string(),
                symbol: "MATIC".to_string(),
                decimals: 18,
            },
            rpc_urls: vec!["https://polygon-rpc.com/".to_string()],
            block_explorer_urls: vec!["https://polygonscan.com".to_string()],
        }
    }

    /// Case-insensitive comparison against a wallet-reported hex chain id
    pub fn matches_hex(&self, reported: &str) -> bool {
        reported.eq_ignore_ascii_case(&self.chain_id_hex)
    }

    /// Wire-shape parameters for `wallet_addEthereumChain` (EIP-3085)
    pub fn add_chain_params(&self) -> Value {
        json!({
            "chainId": self.chain_id_hex,
            "chainName": self.display_name,
            "nativeCurrency": {
                "name": self.native_currency.name,
                "symbol": self.native_currency.symbol,
                "decimals": self.native_currency.decimals,
            },
            "rpcUrls": self.rpc_urls,
            "blockExplorerUrls": self.block_explorer_urls,
        })
    }

    /// Validate internal consistency. Called once at configuration load.
    pub fn validate(&self) -> Result<()> {
        let hex = self
            .chain_id_hex
            .strip_prefix("0x")
            .or_else(|| self.chain_id_hex.strip_prefix("0X"))
            .ok_or_else(|| {
                Error::Config(format!(
                    "chain_id_hex must start with 0x, got '{}'",
                    self.chain_id_hex
                ))
            })?;

        let parsed = u64::from_str_radix(hex, 16).map_err(|_| {
            Error::Config(format!("chain_id_hex '{}' is not hex", self.chain_id_hex))
        })?;

        if parsed != self.chain_id_dec {
            return Err(Error::Config(format!(
                "chain_id_hex '{}' ({}) disagrees with chain_id_dec {}",
                self.chain_id_hex, parsed, self.chain_id_dec
            )));
        }

        if self.rpc_urls.is_empty() {
            return Err(Error::Config(
                "chain needs at least one rpc url".to_string(),
            ));
        }

        if self.native_currency.decimals > 30 {
            return Err(Error::Config(format!(
                "native currency decimals {} out of range",
                self.native_currency.decimals
            )));
        }

        Ok(())
    }
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self::polygon()
    }
}
