//! Uniform chain adapter capability.
//!
//! Every chain exposes the same small capability set: validate an address,
//! fetch its transaction history, fetch its UTXO set, and resolve
//! transactions and block txid lists for proof retrieval. The sync core and
//! the SPV client only ever talk to this trait.

use std::sync::Arc;

use tracing::warn;

use super::address::validate_address;
use super::types::{AddressTx, Chain, ChainError, Network, TxInfo, Utxo};

#[async_trait::async_trait]
pub trait ChainAdapter: Send + Sync {
	/// The chain this adapter serves.
	fn chain(&self) -> Chain;

	/// Check whether an address is well-formed for this chain.
	fn validate_address(&self, address: &str) -> bool;

	/// Fetch the ordered transaction history for an address.
	async fn get_address_txs(&self, address: &str) -> Result<Vec<AddressTx>, ChainError>;

	/// Fetch the current UTXO set for an address.
	async fn get_address_txs_utxo(&self, address: &str) -> Result<Vec<Utxo>, ChainError>;

	/// Look up a single transaction by id.
	async fn get_tx(&self, txid: &str) -> Result<TxInfo, ChainError>;

	/// Fetch the ordered txid list of a block.
	async fn get_block_txids(&self, block_hash: &str) -> Result<Vec<String>, ChainError>;
}

/// Adapter that tries an ordered list of providers in sequence.
///
/// Each call walks the providers in order and returns the first success.
/// When every provider fails, the error carries the full cause chain so the
/// caller can see why each one was skipped.
pub struct FallbackAdapter {
	chain: Chain,
	network: Network,
	providers: Vec<Arc<dyn ChainAdapter>>,
}

impl FallbackAdapter {
	pub fn new(chain: Chain, network: Network, providers: Vec<Arc<dyn ChainAdapter>>) -> Self {
		Self {
			chain,
			network,
			providers,
		}
	}

	fn exhausted(&self, causes: Vec<String>) -> ChainError {
		ChainError::AllProvidersFailed {
			chain: self.chain,
			causes,
		}
	}
}

#[async_trait::async_trait]
impl ChainAdapter for FallbackAdapter {
	fn chain(&self) -> Chain {
		self.chain
	}

	fn validate_address(&self, address: &str) -> bool {
		validate_address(self.chain, self.network, address)
	}

	async fn get_address_txs(&self, address: &str) -> Result<Vec<AddressTx>, ChainError> {
		let mut causes = Vec::new();
		for (i, provider) in self.providers.iter().enumerate() {
			match provider.get_address_txs(address).await {
				Ok(txs) => return Ok(txs),
				Err(e) => {
					warn!("{} provider {} failed to fetch txs: {}", self.chain, i, e);
					causes.push(e.to_string());
				}
			}
		}
		Err(self.exhausted(causes))
	}

	async fn get_address_txs_utxo(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
		let mut causes = Vec::new();
		for (i, provider) in self.providers.iter().enumerate() {
			match provider.get_address_txs_utxo(address).await {
				Ok(utxos) => return Ok(utxos),
				Err(e) => {
					warn!("{} provider {} failed to fetch utxos: {}", self.chain, i, e);
					causes.push(e.to_string());
				}
			}
		}
		Err(self.exhausted(causes))
	}

	async fn get_tx(&self, txid: &str) -> Result<TxInfo, ChainError> {
		let mut causes = Vec::new();
		for (i, provider) in self.providers.iter().enumerate() {
			match provider.get_tx(txid).await {
				Ok(tx) => return Ok(tx),
				Err(e) => {
					warn!("{} provider {} failed to fetch tx: {}", self.chain, i, e);
					causes.push(e.to_string());
				}
			}
		}
		Err(self.exhausted(causes))
	}

	async fn get_block_txids(&self, block_hash: &str) -> Result<Vec<String>, ChainError> {
		let mut causes = Vec::new();
		for (i, provider) in self.providers.iter().enumerate() {
			match provider.get_block_txids(block_hash).await {
				Ok(txids) => return Ok(txids),
				Err(e) => {
					warn!("{} provider {} failed to fetch block txids: {}", self.chain, i, e);
					causes.push(e.to_string());
				}
			}
		}
		Err(self.exhausted(causes))
	}
}
