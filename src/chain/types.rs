//! Types shared by the chain adapters.

use serde::{Deserialize, Serialize};

/// Supported Bitcoin-family chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
	Bitcoin,
	Dogecoin,
}

impl Chain {
	/// Durable queue name for this chain's sync jobs.
	pub fn queue_name(&self) -> &'static str {
		match self {
			Chain::Bitcoin => "btc-utxo-syncer",
			Chain::Dogecoin => "doge-utxo-syncer-queue",
		}
	}

	/// Cache key prefix for this chain's sync results.
	pub fn cache_prefix(&self) -> &'static str {
		match self {
			Chain::Bitcoin => "btc-utxo-syncer-data",
			Chain::Dogecoin => "doge-utxo-syncer-data",
		}
	}
}

impl std::fmt::Display for Chain {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Chain::Bitcoin => write!(f, "bitcoin"),
			Chain::Dogecoin => write!(f, "dogecoin"),
		}
	}
}

impl std::str::FromStr for Chain {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"bitcoin" | "btc" => Ok(Chain::Bitcoin),
			"dogecoin" | "doge" => Ok(Chain::Dogecoin),
			other => Err(format!("unknown chain: {}", other)),
		}
	}
}

/// Network the service runs against; selects address version bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
	Mainnet,
	Testnet,
}

impl std::fmt::Display for Network {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Network::Mainnet => write!(f, "mainnet"),
			Network::Testnet => write!(f, "testnet"),
		}
	}
}

/// Confirmation status of a transaction as reported by the chain API.
///
/// Any change here (new confirmation, reorged block hash, updated height)
/// changes the history digest and forces a resync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
	pub confirmed: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub block_height: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub block_hash: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub block_time: Option<u64>,
}

/// An unspent transaction output for a tracked address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
	pub txid: String,
	pub vout: u32,
	pub value: u64,
	pub status: TxStatus,
}

/// One entry of an address's transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTx {
	pub txid: String,
	pub status: TxStatus,
}

/// A single transaction looked up by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
	pub txid: String,
	pub status: TxStatus,
}

/// Error type for chain adapter operations
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("unexpected status {status} from {url}")]
	Status { status: u16, url: String },

	#[error("all {chain} providers failed: {}", causes.join("; "))]
	AllProvidersFailed { chain: Chain, causes: Vec<String> },
}
