//! Esplora-style REST client.
//!
//! One concrete chain adapter implementation speaking the Esplora/electrs
//! HTTP API, which both the Bitcoin and Dogecoin deployments expose. All
//! methods are async and designed for use with Tokio.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::address::validate_address;
use super::adapter::ChainAdapter;
use super::types::{AddressTx, Chain, ChainError, Network, TxInfo, Utxo};

/// REST client for one Esplora-compatible provider endpoint.
#[derive(Clone)]
pub struct EsploraClient {
	chain: Chain,
	network: Network,
	http_client: Client,
	base_url: String,
}

impl EsploraClient {
	pub fn new(chain: Chain, network: Network, base_url: String) -> Self {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("Failed to create HTTP client");

		Self {
			chain,
			network,
			http_client,
			base_url: base_url.trim_end_matches('/').to_string(),
		}
	}

	async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
		let url = format!("{}/{}", self.base_url, path);
		debug!("GET {}", url);

		let response = self.http_client.get(&url).send().await?;
		if !response.status().is_success() {
			return Err(ChainError::Status {
				status: response.status().as_u16(),
				url,
			});
		}
		Ok(response.json().await?)
	}
}

#[async_trait::async_trait]
impl ChainAdapter for EsploraClient {
	fn chain(&self) -> Chain {
		self.chain
	}

	fn validate_address(&self, address: &str) -> bool {
		validate_address(self.chain, self.network, address)
	}

	async fn get_address_txs(&self, address: &str) -> Result<Vec<AddressTx>, ChainError> {
		self.get_json(&format!("address/{}/txs", address)).await
	}

	async fn get_address_txs_utxo(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
		self.get_json(&format!("address/{}/utxo", address)).await
	}

	async fn get_tx(&self, txid: &str) -> Result<TxInfo, ChainError> {
		self.get_json(&format!("tx/{}", txid)).await
	}

	async fn get_block_txids(&self, block_hash: &str) -> Result<Vec<String>, ChainError> {
		self.get_json(&format!("block/{}/txids", block_hash)).await
	}
}
