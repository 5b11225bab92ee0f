//! Environment-driven service settings.
//!
//! Every knob has a default matching the production deployment, so the
//! service starts with no environment at all. Parsing is tolerant: a value
//! that fails to parse falls back to the default with a warning rather than
//! aborting startup.

use std::collections::HashSet;
use std::time::Duration;

use tracing::warn;

use crate::chain::Network;
use crate::sync::SyncerConfig;

#[derive(Debug, Clone)]
pub struct Settings {
	pub network: Network,
	/// Base directory of the file-backed store; `:memory:` selects the
	/// in-memory store.
	pub data_dir: String,
	pub bitcoin_esplora_urls: Vec<String>,
	pub dogecoin_esplora_urls: Vec<String>,
	pub bitcoin_spv_service_url: String,
	pub repeat_base: Duration,
	pub repeat_max: Duration,
	pub repeat_horizon: Duration,
	pub cache_enable: bool,
	pub cache_expire: Duration,
	pub worker_concurrency: usize,
	pub ignore_addresses: HashSet<String>,
	/// Bounded run window of one service invocation.
	pub run_duration: Duration,
}

impl Settings {
	pub fn from_env() -> Self {
		Self {
			network: parse_network(env("NETWORK").as_deref()),
			data_dir: env("DATA_DIR").unwrap_or_else(|| "./data".to_string()),
			bitcoin_esplora_urls: parse_list(env("BITCOIN_ESPLORA_URLS").as_deref()),
			dogecoin_esplora_urls: parse_list(env("DOGECOIN_ESPLORA_URLS").as_deref()),
			bitcoin_spv_service_url: env("BITCOIN_SPV_SERVICE_URL")
				.unwrap_or_else(|| "http://localhost:8080/rpc".to_string()),
			repeat_base: Duration::from_millis(parse_number(
				"UTXO_SYNC_REPEAT_BASE_DURATION",
				env("UTXO_SYNC_REPEAT_BASE_DURATION").as_deref(),
				10_000,
			)),
			repeat_max: Duration::from_millis(parse_number(
				"UTXO_SYNC_REPEAT_MAX_DURATION",
				env("UTXO_SYNC_REPEAT_MAX_DURATION").as_deref(),
				3_600_000,
			)),
			repeat_horizon: Duration::from_millis(parse_number(
				"UTXO_SYNC_REPEAT_EXPIRED_DURATION",
				env("UTXO_SYNC_REPEAT_EXPIRED_DURATION").as_deref(),
				86_400_000,
			)),
			cache_enable: parse_bool(
				"UTXO_SYNC_DATA_CACHE_ENABLE",
				env("UTXO_SYNC_DATA_CACHE_ENABLE").as_deref(),
				true,
			),
			cache_expire: Duration::from_secs(parse_number(
				"UTXO_SYNC_DATA_CACHE_EXPIRE",
				env("UTXO_SYNC_DATA_CACHE_EXPIRE").as_deref(),
				3_600,
			)),
			worker_concurrency: parse_number(
				"UTXO_SYNC_WORKER_CONCURRENCY",
				env("UTXO_SYNC_WORKER_CONCURRENCY").as_deref(),
				4usize,
			),
			ignore_addresses: parse_list(env("IGNORE_UTXO_SYNC_ERROR_ADDRESSES").as_deref())
				.into_iter()
				.collect(),
			run_duration: Duration::from_secs(parse_number(
				"SYNC_RUN_DURATION",
				env("SYNC_RUN_DURATION").as_deref(),
				290,
			)),
		}
	}

	pub fn syncer_config(&self) -> SyncerConfig {
		SyncerConfig {
			repeat_base: self.repeat_base,
			repeat_max: self.repeat_max,
			repeat_horizon: self.repeat_horizon,
			cache_enable: self.cache_enable,
			cache_expire: self.cache_expire,
			worker_concurrency: self.worker_concurrency,
			ignore_addresses: self.ignore_addresses.clone(),
		}
	}
}

fn env(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_network(value: Option<&str>) -> Network {
	match value {
		Some("mainnet") => Network::Mainnet,
		Some("testnet") | None => Network::Testnet,
		Some(other) => {
			warn!("unknown NETWORK value {}, using testnet", other);
			Network::Testnet
		}
	}
}

fn parse_list(value: Option<&str>) -> Vec<String> {
	value
		.map(|v| {
			v.split(',')
				.map(|item| item.trim().to_string())
				.filter(|item| !item.is_empty())
				.collect()
		})
		.unwrap_or_default()
}

fn parse_number<T: std::str::FromStr + Copy>(name: &str, value: Option<&str>, default: T) -> T {
	match value {
		Some(raw) => raw.parse().unwrap_or_else(|_| {
			warn!("invalid {} value {}, using default", name, raw);
			default
		}),
		None => default,
	}
}

fn parse_bool(name: &str, value: Option<&str>, default: bool) -> bool {
	match value {
		Some("true") | Some("1") => true,
		Some("false") | Some("0") => false,
		Some(other) => {
			warn!("invalid {} value {}, using default", name, other);
			default
		}
		None => default,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn network_parsing_defaults_to_testnet() {
		assert_eq!(parse_network(Some("mainnet")), Network::Mainnet);
		assert_eq!(parse_network(Some("testnet")), Network::Testnet);
		assert_eq!(parse_network(Some("regtest")), Network::Testnet);
		assert_eq!(parse_network(None), Network::Testnet);
	}

	#[test]
	fn list_parsing_trims_and_drops_empty_items() {
		assert_eq!(
			parse_list(Some("https://a.example, https://b.example ,")),
			vec!["https://a.example".to_string(), "https://b.example".to_string()]
		);
		assert!(parse_list(None).is_empty());
		assert!(parse_list(Some("")).is_empty());
	}

	#[test]
	fn number_parsing_falls_back_to_default() {
		assert_eq!(parse_number("N", Some("2500"), 10u64), 2_500);
		assert_eq!(parse_number("N", Some("not-a-number"), 10u64), 10);
		assert_eq!(parse_number("N", None, 10u64), 10);
	}

	#[test]
	fn bool_parsing_accepts_both_spellings() {
		assert!(parse_bool("B", Some("true"), false));
		assert!(parse_bool("B", Some("1"), false));
		assert!(!parse_bool("B", Some("false"), true));
		assert!(!parse_bool("B", Some("0"), true));
		assert!(parse_bool("B", Some("yes"), true));
		assert!(!parse_bool("B", None, false));
	}
}
