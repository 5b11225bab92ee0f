//! SPV inclusion proof retrieval.
//!
//! Given a confirmed transaction, the client resolves the transaction's
//! position inside its containing block through the chain adapter and asks
//! the external attestation service for an inclusion proof over JSON-RPC.
//!
//! The service rejects with coded failures; each code implies a different
//! external remediation (wait, resubmit, or treat as a reorg signal), so the
//! codes are passed through as typed errors and never retried here.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::{ChainAdapter, ChainError};

/// Rejection codes of the attestation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpvErrorCode {
	/// The transaction is too recent for the service's storage.
	StorageTxTooNew,
	/// The service's storage has not seen the transaction confirm.
	StorageTxUnconfirmed,
	/// The containing block header is missing on the service side.
	StorageHeaderMissing,
	/// The service's stored header does not match the chain.
	StorageHeaderUnmatched,
	/// The transaction is unconfirmed on chain.
	OnchainTxUnconfirmed,
	/// The chain reorganized; the caller must resubmit.
	OnchainReorgRequired,
}

impl SpvErrorCode {
	pub fn from_code(code: i64) -> Option<Self> {
		match code {
			23101 => Some(Self::StorageTxTooNew),
			23102 => Some(Self::StorageTxUnconfirmed),
			23301 => Some(Self::StorageHeaderMissing),
			23302 => Some(Self::StorageHeaderUnmatched),
			25101 => Some(Self::OnchainTxUnconfirmed),
			25901 => Some(Self::OnchainReorgRequired),
			_ => None,
		}
	}

	pub fn code(&self) -> i64 {
		match self {
			Self::StorageTxTooNew => 23101,
			Self::StorageTxUnconfirmed => 23102,
			Self::StorageHeaderMissing => 23301,
			Self::StorageHeaderUnmatched => 23302,
			Self::OnchainTxUnconfirmed => 25101,
			Self::OnchainReorgRequired => 25901,
		}
	}
}

/// Error type for proof retrieval
#[derive(Debug, thiserror::Error)]
pub enum SpvError {
	#[error("chain error: {0}")]
	Chain(#[from] ChainError),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("transaction {txid} not found in block {block_hash}")]
	TxNotInBlock { txid: String, block_hash: String },

	#[error("attestation service rejected ({}): {message}", code.code())]
	Coded { code: SpvErrorCode, message: String },

	#[error("attestation service error {code}: {message}")]
	UnknownCode { code: i64, message: String },

	#[error("attestation service returned neither result nor error")]
	MalformedResponse,
}

/// Proof position of the transaction inside its block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpvClientProof {
	#[serde(rename = "txHash")]
	pub tx_hash: String,
	pub index: u64,
}

/// An inclusion proof as returned by the attestation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxProof {
	#[serde(rename = "spvClient")]
	pub spv_client: SpvClientProof,
	pub proof: String,
}

#[derive(Deserialize)]
struct RpcError {
	code: i64,
	message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
	result: Option<TxProof>,
	error: Option<RpcError>,
}

fn proof_from_response(response: RpcResponse) -> Result<TxProof, SpvError> {
	if let Some(error) = response.error {
		return Err(match SpvErrorCode::from_code(error.code) {
			Some(code) => SpvError::Coded {
				code,
				message: error.message,
			},
			None => SpvError::UnknownCode {
				code: error.code,
				message: error.message,
			},
		});
	}
	response.result.ok_or(SpvError::MalformedResponse)
}

pub struct SpvClient {
	adapter: Arc<dyn ChainAdapter>,
	service_url: String,
	http_client: reqwest::Client,
}

impl SpvClient {
	pub fn new(adapter: Arc<dyn ChainAdapter>, service_url: impl Into<String>) -> Self {
		let http_client = reqwest::Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("Failed to create HTTP client");
		Self {
			adapter,
			service_url: service_url.into(),
			http_client,
		}
	}

	/// Retrieve the inclusion proof for a confirmed transaction.
	///
	/// Resolves the transaction's zero-based index within its containing
	/// block and calls `getTxProof(txid, index, confirmations)`. A
	/// transaction with no containing block yet short-circuits to the
	/// onchain-unconfirmed code without calling the service.
	pub async fn get_tx_proof(&self, txid: &str, confirmations: u32) -> Result<TxProof, SpvError> {
		let txid = txid.trim_start_matches("0x");
		let tx = self.adapter.get_tx(txid).await?;

		let Some(block_hash) = tx.status.block_hash else {
			return Err(SpvError::Coded {
				code: SpvErrorCode::OnchainTxUnconfirmed,
				message: format!("transaction {} is not confirmed on chain", txid),
			});
		};

		let txids = self.adapter.get_block_txids(&block_hash).await?;
		let index = txids
			.iter()
			.position(|id| id == txid)
			.ok_or_else(|| SpvError::TxNotInBlock {
				txid: txid.to_string(),
				block_hash: block_hash.clone(),
			})? as u64;
		debug!("transaction {} is at index {} of block {}", txid, index, block_hash);

		self.call_get_tx_proof(txid, index, confirmations).await
	}

	async fn call_get_tx_proof(
		&self,
		txid: &str,
		index: u64,
		confirmations: u32,
	) -> Result<TxProof, SpvError> {
		let body = serde_json::json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "getTxProof",
			"params": [txid, index, confirmations],
		});
		let response: RpcResponse = self
			.http_client
			.post(&self.service_url)
			.json(&body)
			.send()
			.await?
			.json()
			.await?;
		proof_from_response(response)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::testing::MockChainAdapter;
	use crate::chain::{Chain, TxInfo};

	fn client(adapter: Arc<MockChainAdapter>) -> SpvClient {
		SpvClient::new(adapter, "http://localhost:0/rpc")
	}

	#[test]
	fn known_codes_roundtrip() {
		for code in [23101, 23102, 23301, 23302, 25101, 25901] {
			let mapped = SpvErrorCode::from_code(code).unwrap();
			assert_eq!(mapped.code(), code);
		}
		assert_eq!(SpvErrorCode::from_code(0), None);
		assert_eq!(SpvErrorCode::from_code(23103), None);
	}

	#[test]
	fn service_rejections_map_to_typed_errors() {
		let rejected: RpcResponse = serde_json::from_value(serde_json::json!({
			"error": {"code": 25101, "message": "tx unconfirmed"}
		}))
		.unwrap();
		match proof_from_response(rejected) {
			Err(SpvError::Coded { code, message }) => {
				assert_eq!(code, SpvErrorCode::OnchainTxUnconfirmed);
				assert_eq!(message, "tx unconfirmed");
			}
			other => panic!("unexpected: {other:?}"),
		}

		let unknown: RpcResponse = serde_json::from_value(serde_json::json!({
			"error": {"code": -32601, "message": "method not found"}
		}))
		.unwrap();
		assert!(matches!(
			proof_from_response(unknown),
			Err(SpvError::UnknownCode { code: -32601, .. })
		));

		let ok: RpcResponse = serde_json::from_value(serde_json::json!({
			"result": {
				"spvClient": {"txHash": "aa", "index": 3},
				"proof": "deadbeef"
			}
		}))
		.unwrap();
		let proof = proof_from_response(ok).unwrap();
		assert_eq!(proof.spv_client.index, 3);
		assert_eq!(proof.proof, "deadbeef");
	}

	#[tokio::test]
	async fn unconfirmed_tx_short_circuits_to_coded_error() {
		let adapter = Arc::new(MockChainAdapter::new(Chain::Dogecoin));
		adapter.set_tx_info(TxInfo {
			txid: "aa".to_string(),
			status: MockChainAdapter::unconfirmed_status(),
		});

		let err = client(adapter).get_tx_proof("0xaa", 6).await.unwrap_err();
		match err {
			SpvError::Coded { code, .. } => assert_eq!(code, SpvErrorCode::OnchainTxUnconfirmed),
			other => panic!("unexpected: {other:?}"),
		}
	}

	#[tokio::test]
	async fn missing_txid_in_block_is_a_typed_error() {
		let adapter = Arc::new(MockChainAdapter::new(Chain::Dogecoin));
		adapter.set_tx_info(TxInfo {
			txid: "aa".to_string(),
			status: MockChainAdapter::confirmed_status(100),
		});
		adapter.set_block_txids(vec!["bb".to_string(), "cc".to_string()]);

		let err = client(adapter).get_tx_proof("aa", 6).await.unwrap_err();
		assert!(matches!(err, SpvError::TxNotInBlock { .. }));
	}
}
