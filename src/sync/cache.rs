//! Staleness cache for sync results.
//!
//! Keyed store of last-synced results with a TTL. The change-detection
//! policy (skip the write when the history digest is unchanged) is enforced
//! by the orchestrator, not here; the cache itself only offers `get` and an
//! unconditional `set` that resets the TTL.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::store::{KvStore, StoreError};

/// Error type for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
	#[error("store error: {0}")]
	Store(#[from] StoreError),

	#[error("cache entry serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

#[derive(serde::Deserialize)]
struct CacheEnvelope<T> {
	value: T,
	#[serde(rename = "expiresAt")]
	expires_at: i64,
}

#[derive(Serialize)]
struct CacheEnvelopeRef<'a, T> {
	value: &'a T,
	#[serde(rename = "expiresAt")]
	expires_at: i64,
}

/// TTL'd cache over the shared key-value store.
///
/// Entries expire autonomously: a read after the TTL elapses behaves as
/// absent (and removes the stale entry) even if no write superseded it.
pub struct SyncDataCache<T> {
	store: Arc<dyn KvStore>,
	prefix: String,
	expire: Duration,
	_marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> SyncDataCache<T> {
	pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>, expire: Duration) -> Self {
		Self {
			store,
			prefix: prefix.into(),
			expire,
			_marker: PhantomData,
		}
	}

	fn entry_key(&self, key: &str) -> String {
		format!("{}:{}", self.prefix, key)
	}

	pub async fn get(&self, key: &str) -> Result<Option<T>, CacheError> {
		let entry_key = self.entry_key(key);
		let Some(bytes) = self.store.get(&entry_key).await? else {
			return Ok(None);
		};
		let envelope: CacheEnvelope<T> = serde_json::from_slice(&bytes)?;
		if envelope.expires_at <= Utc::now().timestamp_millis() {
			debug!("cache entry {} expired", entry_key);
			self.store.delete(&entry_key).await?;
			return Ok(None);
		}
		Ok(Some(envelope.value))
	}

	/// Overwrite the entry for `key` and reset its TTL.
	pub async fn set(&self, key: &str, value: &T) -> Result<(), CacheError> {
		let envelope = CacheEnvelopeRef {
			value,
			expires_at: Utc::now().timestamp_millis() + self.expire.as_millis() as i64,
		};
		let bytes = serde_json::to_vec(&envelope)?;
		self.store.put(&self.entry_key(key), &bytes).await?;
		Ok(())
	}
}
