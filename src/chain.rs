//! Supported chains and address handling

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EVM null address, the counterparty of mints and burns
pub const EVM_ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Finest unit movements are rounded to. Wei are below f64 resolution at
/// whale-sized totals, so 18-decimal amounts stop at gwei.
pub const MAX_DELTA_SCALE: f64 = 1e9;

/// A chain the watcher can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Bitcoin,
    Ethereum,
    Litecoin,
    Dogecoin,
}

impl Chain {
    /// All supported chains
    pub const ALL: [Chain; 4] = [
        Chain::Bitcoin,
        Chain::Ethereum,
        Chain::Litecoin,
        Chain::Dogecoin,
    ];

    /// Base units per whole coin (satoshi, wei, litoshi, koinu)
    pub fn base_unit_scale(&self) -> f64 {
        match self {
            Chain::Ethereum => 1e18,
            Chain::Bitcoin | Chain::Litecoin | Chain::Dogecoin => 1e8,
        }
    }

    /// Native asset symbol
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "BTC",
            Chain::Ethereum => "ETH",
            Chain::Litecoin => "LTC",
            Chain::Dogecoin => "DOGE",
        }
    }

    /// Whether addresses on this chain are hex and case-insensitive
    pub fn is_evm(&self) -> bool {
        matches!(self, Chain::Ethereum)
    }

    /// Units per coin that deltas are rounded to
    pub fn delta_scale(&self) -> f64 {
        self.base_unit_scale().min(MAX_DELTA_SCALE)
    }

    /// Convert a base-unit amount into whole coins
    pub fn from_base_units(&self, raw: f64) -> f64 {
        raw / self.base_unit_scale()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Chain::Bitcoin => "Bitcoin",
            Chain::Ethereum => "Ethereum",
            Chain::Litecoin => "Litecoin",
            Chain::Dogecoin => "Dogecoin",
        };
        f.write_str(name)
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Chain::Bitcoin),
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "litecoin" | "ltc" => Ok(Chain::Litecoin),
            "dogecoin" | "doge" => Ok(Chain::Dogecoin),
            other => Err(format!("unknown chain: {}", other)),
        }
    }
}

/// Canonical form of an address for lookups and ledger keys.
///
/// Hex (`0x`) addresses are checksummed by case only, so they are folded to
/// lowercase. Base58 and bech32 addresses are kept verbatim.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    if is_hex_address(trimmed) {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

fn is_hex_address(address: &str) -> bool {
    (address.starts_with("0x") || address.starts_with("0X"))
        && address.len() > 2
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether the address is the EVM null address
pub fn is_zero_address(address: &str) -> bool {
    normalize_address(address) == EVM_ZERO_ADDRESS
}

/// Snap a whole-coin amount to the nearest `1 / scale`
pub fn round_to_scale(amount: f64, scale: f64) -> f64 {
    (amount * scale).round() / scale
}

/// Short display form `first6…last4` for unlabelled addresses
pub fn truncate_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
