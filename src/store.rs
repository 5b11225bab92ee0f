//! Persistent key-value store abstraction.
//!
//! The durable job queue and the sync data cache both live in an external
//! shared store. This module defines the `KvStore` trait they depend on and
//! two implementations: an in-memory store for tests and ephemeral runs, and
//! a file-backed store for durable deployments.
//!
//! The only mutual-exclusion primitive the store provides is a per-key lock
//! with a TTL, used by the queue worker to guarantee at most one concurrent
//! execution per job id.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::io::AsyncWriteExt;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("invalid store key in {0}")]
	KeyEncoding(String),
}

/// Shared persistent key-value store.
///
/// Keys are flat strings; namespacing is done by the callers with prefixes
/// (`queue:<name>:job:<id>`, `<cache-prefix>:<address>`). Values are raw
/// bytes, serialized by the caller.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

	async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

	async fn delete(&self, key: &str) -> Result<(), StoreError>;

	/// List all keys starting with the given prefix.
	async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

	/// Try to acquire the named lock for `ttl`. Returns false if another
	/// holder owns an unexpired lock. Expired locks are reclaimed.
	async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

	/// Release the named lock. Releasing an absent lock is a no-op.
	async fn unlock(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store, used by tests and `:memory:` deployments.
pub struct MemoryKvStore {
	entries: Mutex<HashMap<String, Vec<u8>>>,
	locks: Mutex<HashMap<String, Instant>>,
}

impl MemoryKvStore {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
			locks: Mutex::new(HashMap::new()),
		}
	}
}

impl Default for MemoryKvStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
		Ok(self.entries.lock().unwrap().get(key).cloned())
	}

	async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
		self.entries
			.lock()
			.unwrap()
			.insert(key.to_string(), value.to_vec());
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StoreError> {
		self.entries.lock().unwrap().remove(key);
		Ok(())
	}

	async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
		let mut keys: Vec<String> = self
			.entries
			.lock()
			.unwrap()
			.keys()
			.filter(|k| k.starts_with(prefix))
			.cloned()
			.collect();
		keys.sort();
		Ok(keys)
	}

	async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
		let now = Instant::now();
		let mut locks = self.locks.lock().unwrap();
		if let Some(deadline) = locks.get(key) {
			if *deadline > now {
				return Ok(false);
			}
		}
		locks.insert(key.to_string(), now + ttl);
		Ok(true)
	}

	async fn unlock(&self, key: &str) -> Result<(), StoreError> {
		self.locks.lock().unwrap().remove(key);
		Ok(())
	}
}

/// Expiry timestamp recorded in a lock file. A missing or unreadable file
/// reads as held forever, which makes contenders back off.
async fn lock_expiry(path: &Path) -> i64 {
	let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
	content.trim().parse::<i64>().unwrap_or(i64::MAX)
}

/// File-backed store. Each entry is a file under the data directory, named
/// by the hex encoding of its key so arbitrary key characters are safe on
/// any filesystem. Locks are separate `.lock` files holding their expiry
/// timestamp in milliseconds, created with `create_new` for atomicity.
pub struct FileKvStore {
	data_dir: PathBuf,
}

impl FileKvStore {
	pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let data_dir = data_dir.into();
		std::fs::create_dir_all(&data_dir)?;
		Ok(Self { data_dir })
	}

	fn entry_path(&self, key: &str) -> PathBuf {
		self.data_dir.join(format!("{}.bin", hex::encode(key)))
	}

	fn lock_path(&self, key: &str) -> PathBuf {
		self.data_dir.join(format!("{}.lock", hex::encode(key)))
	}

	fn claim_path(&self, key: &str) -> PathBuf {
		let mut suffix = [0u8; 8];
		rand::rng().fill(&mut suffix);
		self.data_dir
			.join(format!("{}.reclaim-{}", hex::encode(key), hex::encode(suffix)))
	}

	async fn create_lock_file(&self, path: &Path, ttl: Duration) -> Result<bool, StoreError> {
		let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
		match tokio::fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(path)
			.await
		{
			Ok(mut file) => {
				file.write_all(expires_at.to_string().as_bytes()).await?;
				Ok(true)
			}
			Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
			Err(e) => Err(e.into()),
		}
	}
}

#[async_trait::async_trait]
impl KvStore for FileKvStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
		match tokio::fs::read(self.entry_path(key)).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
		tokio::fs::write(self.entry_path(key), value).await?;
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StoreError> {
		match tokio::fs::remove_file(self.entry_path(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
		let mut keys = Vec::new();
		let mut dir = tokio::fs::read_dir(&self.data_dir).await?;
		while let Some(entry) = dir.next_entry().await? {
			let file_name = entry.file_name();
			let Some(name) = file_name.to_str() else {
				continue;
			};
			let Some(encoded) = name.strip_suffix(".bin") else {
				continue;
			};
			let bytes = hex::decode(encoded)
				.map_err(|_| StoreError::KeyEncoding(name.to_string()))?;
			let key = String::from_utf8(bytes)
				.map_err(|_| StoreError::KeyEncoding(name.to_string()))?;
			if key.starts_with(prefix) {
				keys.push(key);
			}
		}
		keys.sort();
		Ok(keys)
	}

	async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
		let path = self.lock_path(key);
		if self.create_lock_file(&path, ttl).await? {
			return Ok(true);
		}

		// A lock file exists; reclaim it if its expiry has passed. The
		// reclaim must be atomic across contenders: rename the expired file
		// to a contender-unique name, so exactly one rename consumes it and
		// the losers back off.
		if lock_expiry(&path).await > Utc::now().timestamp_millis() {
			return Ok(false);
		}
		let claim_path = self.claim_path(key);
		if tokio::fs::rename(&path, &claim_path).await.is_err() {
			return Ok(false);
		}
		// The file may have been swapped for a fresh lock between the expiry
		// read and the rename. Put a live lock back and back off; hard_link
		// refuses to clobber a lock created in the meantime.
		if lock_expiry(&claim_path).await > Utc::now().timestamp_millis() {
			let _ = tokio::fs::hard_link(&claim_path, &path).await;
			let _ = tokio::fs::remove_file(&claim_path).await;
			return Ok(false);
		}
		tokio::fs::remove_file(&claim_path).await?;
		self.create_lock_file(&path, ttl).await
	}

	async fn unlock(&self, key: &str) -> Result<(), StoreError> {
		match tokio::fs::remove_file(self.lock_path(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}
