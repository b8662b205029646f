//! Account state and address/balance normalization
//!
//! Addresses are stored EIP-55 checksummed; balances are stored as full
//! precision decimal strings of the chain's native unit. Display rounding
//! belongs to the UI layer (`truncate_display`), not the account itself.

use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

use crate::error::{Error, Result};

/// Connected account snapshot. Always derived from the latest wallet
/// notification, never independently mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// EIP-55 checksummed address
    pub address: String,

    /// Balance in whole native units, full precision decimal string.
    /// Eventually consistent: refreshed asynchronously after account changes.
    pub balance: String,
}

/// Normalize an address to its EIP-55 checksummed form.
///
/// Accepts any mix of case with or without a 0x prefix; rejects anything
/// that is not 20 bytes of hex.
pub fn to_checksum_address(input: &str) -> Result<String> {
    let hex = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidAddress(input.to_string()));
    }

    let lower = hex.to_ascii_lowercase();

    let mut hash = [0u8; 32];
    let mut keccak = Keccak::v256();
    keccak.update(lower.as_bytes());
    keccak.finalize(&mut hash);

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }

    Ok(out)
}

/// Convert a hex wei quantity ("0x..." as wallets return it) into a decimal
/// string of whole native units, trimming trailing fractional zeros.
pub fn format_units(wei_hex: &str, decimals: u8) -> Result<String> {
    let hex = wei_hex
        .strip_prefix("0x")
        .or_else(|| wei_hex.strip_prefix("0X"))
        .unwrap_or(wei_hex);

    if hex.is_empty() {
        return Err(Error::InvalidBalance(wei_hex.to_string()));
    }

    let value = u128::from_str_radix(hex, 16)
        .map_err(|_| Error::InvalidBalance(wei_hex.to_string()))?;

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| Error::InvalidBalance(format!("decimals {} out of range", decimals)))?;

    let integral = value / scale;
    let fractional = value % scale;

    if fractional == 0 {
        return Ok(integral.to_string());
    }

    let frac = format!("{:0width$}", fractional, width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    Ok(format!("{}.{}", integral, frac))
}

/// Shorten an address for chip-style display: "0x1234…abcd"
pub fn short_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}

/// Truncate a decimal balance string to a fixed number of places for
/// display. Does not round; the stored balance keeps full precision.
pub fn truncate_display(balance: &str, places: usize) -> String {
    match balance.find('.') {
        None => balance.to_string(),
        Some(dot) => {
            let end = (dot + 1 + places).min(balance.len());
            if places == 0 {
                balance[..dot].to_string()
            } else {
                balance[..end].to_string()
            }
        }
    }
}
