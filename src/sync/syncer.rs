//! Per-chain UTXO sync orchestrator.
//!
//! One `UtxoSyncer` exists per chain. It composes the chain adapter, the
//! staleness cache, the durable queue worker, the dedup throttle gate, and
//! the failure telemetry sink, all passed in at construction.
//!
//! The job body is a state machine per tracked address: validate the address,
//! fetch its transaction history, compute the history digest, short-circuit
//! to the cached result when the digest is unchanged, otherwise fetch the
//! UTXO set and overwrite the cache entry. The digest comparison is the
//! primary cost saver: UTXO-set queries are more expensive than history
//! queries, so an unchanged digest skips them entirely.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::chain::{AddressTx, Chain, ChainAdapter, ChainError, Utxo};
use crate::store::KvStore;
use crate::sync::cache::{CacheError, SyncDataCache};
use crate::sync::queue::{
	Job, JobProcessor, ProcessFailure, QueueError, QueueOptions, QueueWorker, RepeatOptions,
	WorkerCallbacks,
};
use crate::sync::throttle::EnqueueThrottle;
use crate::telemetry::{FailureSink, FailureTags};

/// Error type for sync orchestration
#[derive(Debug, thiserror::Error)]
pub enum SyncerError {
	#[error("invalid {chain} address: {address}")]
	InvalidAddress { chain: Chain, address: String },

	#[error("chain error for {chain} address {address}: {source}")]
	Chain {
		chain: Chain,
		address: String,
		#[source]
		source: ChainError,
	},

	#[error("cache error: {0}")]
	Cache(#[from] CacheError),

	#[error("queue error: {0}")]
	Queue(#[from] QueueError),

	#[error("digest serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Payload of a scheduled sync job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
	pub address: String,
	#[serde(rename = "coinType")]
	pub coin_type: Chain,
}

/// Result of one sync execution; supersedes the previous result for the
/// same address entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
	pub address: String,
	#[serde(rename = "coinType")]
	pub coin_type: Chain,
	pub utxos: Vec<Utxo>,
	#[serde(rename = "txsHash")]
	pub txs_hash: String,
}

/// Digest over an address's transaction history.
///
/// Transactions are sort-normalized by txid first, so the digest is stable
/// across providers that return the history in different orders. Any change
/// in membership or confirmation status changes the digest.
pub fn history_digest(txs: &[AddressTx]) -> Result<String, serde_json::Error> {
	let mut sorted: Vec<&AddressTx> = txs.iter().collect();
	sorted.sort_by(|a, b| a.txid.cmp(&b.txid));

	let mut parts = Vec::with_capacity(sorted.len());
	for tx in sorted {
		parts.push(format!("{}{}", tx.txid, serde_json::to_string(&tx.status)?));
	}
	let mut hasher = Sha256::new();
	hasher.update(parts.join(",").as_bytes());
	Ok(hex::encode(hasher.finalize()))
}

/// Tuning for one chain's syncer.
#[derive(Debug, Clone)]
pub struct SyncerConfig {
	/// Backoff base for repeat occurrences and retries.
	pub repeat_base: Duration,
	/// Backoff cap.
	pub repeat_max: Duration,
	/// Repeat horizon: no occurrence is scheduled past enqueue time plus this.
	pub repeat_horizon: Duration,
	pub cache_enable: bool,
	pub cache_expire: Duration,
	pub worker_concurrency: usize,
	/// Addresses whose failures are not reported to telemetry.
	pub ignore_addresses: HashSet<String>,
}

impl Default for SyncerConfig {
	fn default() -> Self {
		Self {
			repeat_base: Duration::from_millis(10_000),
			repeat_max: Duration::from_millis(3_600_000),
			repeat_horizon: Duration::from_millis(86_400_000),
			cache_enable: true,
			cache_expire: Duration::from_secs(3_600),
			worker_concurrency: 4,
			ignore_addresses: HashSet::new(),
		}
	}
}

pub struct UtxoSyncer {
	chain: Chain,
	adapter: Arc<dyn ChainAdapter>,
	cache: SyncDataCache<SyncResult>,
	queue: Arc<QueueWorker<SyncRequest>>,
	throttle: EnqueueThrottle,
	sink: Arc<dyn FailureSink>,
	config: SyncerConfig,
}

impl UtxoSyncer {
	pub fn new(
		adapter: Arc<dyn ChainAdapter>,
		store: Arc<dyn KvStore>,
		sink: Arc<dyn FailureSink>,
		config: SyncerConfig,
	) -> Self {
		let chain = adapter.chain();
		let cache = SyncDataCache::new(store.clone(), chain.cache_prefix(), config.cache_expire);
		let queue = Arc::new(QueueWorker::new(
			chain.queue_name(),
			store,
			QueueOptions {
				backoff_base: config.repeat_base,
				backoff_max: config.repeat_max,
				concurrency: config.worker_concurrency,
				..QueueOptions::default()
			},
		));
		Self {
			chain,
			adapter,
			cache,
			queue,
			throttle: EnqueueThrottle::new(),
			sink,
			config,
		}
	}

	pub fn chain(&self) -> Chain {
		self.chain
	}

	pub fn queue(&self) -> &Arc<QueueWorker<SyncRequest>> {
		&self.queue
	}

	/// Request a sync schedule for an address.
	///
	/// Validates the address before touching the scheduler, collapses bursts
	/// through the throttle gate, and replaces any live schedule for the
	/// address so the new occurrence runs immediately at attempt zero.
	/// Returns whether a schedule was actually created.
	pub async fn enqueue_sync(&self, address: &str) -> Result<bool, SyncerError> {
		if !self.adapter.validate_address(address) {
			return Err(SyncerError::InvalidAddress {
				chain: self.chain,
				address: address.to_string(),
			});
		}
		if !self.throttle.should_fire(address) {
			debug!("sync request for {} {} throttled", self.chain, address);
			return Ok(false);
		}

		let end_at = Utc::now().timestamp_millis() + self.config.repeat_horizon.as_millis() as i64;
		let request = SyncRequest {
			address: address.to_string(),
			coin_type: self.chain,
		};
		let job = self
			.queue
			.add_job(address, request, Some(RepeatOptions { end_at }))
			.await?;
		info!("scheduled {} sync for {} (job {})", self.chain, address, job.id);
		Ok(true)
	}

	/// Read path, independent of scheduling.
	///
	/// Returns the cached UTXO set when caching is enabled, not bypassed,
	/// and an entry is present; otherwise fetches directly from the adapter.
	/// Never touches the scheduler.
	pub async fn get_utxos_by_address(
		&self,
		address: &str,
		bypass_cache: bool,
	) -> Result<Vec<Utxo>, SyncerError> {
		if !self.adapter.validate_address(address) {
			return Err(SyncerError::InvalidAddress {
				chain: self.chain,
				address: address.to_string(),
			});
		}
		if self.config.cache_enable && !bypass_cache {
			if let Some(result) = self.cache.get(address).await? {
				debug!("serving {} utxos for {} from cache", self.chain, address);
				return Ok(result.utxos);
			}
		}
		self.adapter
			.get_address_txs_utxo(address)
			.await
			.map_err(|source| self.chain_error(address, source))
	}

	/// Execute one sync for an address.
	pub async fn process_request(&self, request: &SyncRequest) -> Result<SyncResult, SyncerError> {
		let address = request.address.as_str();
		if !self.adapter.validate_address(address) {
			return Err(SyncerError::InvalidAddress {
				chain: self.chain,
				address: address.to_string(),
			});
		}

		let txs = self
			.adapter
			.get_address_txs(address)
			.await
			.map_err(|source| self.chain_error(address, source))?;
		let txs_hash = history_digest(&txs)?;

		if self.config.cache_enable {
			if let Some(cached) = self.cache.get(address).await? {
				if cached.txs_hash == txs_hash {
					debug!(
						"{} history for {} unchanged ({}), skipping utxo fetch",
						self.chain, address, txs_hash
					);
					return Ok(cached);
				}
			}
		}

		let utxos = self
			.adapter
			.get_address_txs_utxo(address)
			.await
			.map_err(|source| self.chain_error(address, source))?;
		let result = SyncResult {
			address: address.to_string(),
			coin_type: self.chain,
			utxos,
			txs_hash,
		};
		if self.config.cache_enable {
			self.cache.set(address, &result).await?;
		}
		info!(
			"synced {} utxos for {} {} ({})",
			result.utxos.len(),
			self.chain,
			address,
			result.txs_hash
		);
		Ok(result)
	}

	/// Begin consuming sync jobs, with state transitions logged.
	pub fn start_process(self: Arc<Self>) {
		let chain = self.chain;
		let callbacks = WorkerCallbacks {
			on_active: Some(Box::new(move |job: &Job<SyncRequest>| {
				info!("{} sync job {} active for {}", chain, job.id, job.data.address);
			})),
			on_completed: Some(Box::new(move |job: &Job<SyncRequest>| {
				info!("{} sync job {} completed for {}", chain, job.id, job.data.address);
			})),
		};
		self.queue.clone().start_process(self.clone(), callbacks);
	}

	pub fn pause_process(&self) {
		self.queue.pause_process();
	}

	pub async fn close_process(&self) {
		self.queue.close_process().await;
	}

	fn chain_error(&self, address: &str, source: ChainError) -> SyncerError {
		SyncerError::Chain {
			chain: self.chain,
			address: address.to_string(),
			source,
		}
	}
}

#[async_trait::async_trait]
impl JobProcessor<SyncRequest> for UtxoSyncer {
	async fn process(&self, job: &Job<SyncRequest>) -> Result<(), ProcessFailure> {
		match self.process_request(&job.data).await {
			Ok(_) => Ok(()),
			Err(error) => {
				if !self.config.ignore_addresses.contains(&job.data.address) {
					self.sink.capture(
						&error,
						&FailureTags {
							chain: self.chain,
							address: job.data.address.clone(),
						},
					);
				}
				match error {
					// Invalid addresses must never occupy a recurring
					// schedule: tear the descriptor down and fail for good.
					SyncerError::InvalidAddress { .. } => {
						if job.is_repeatable() {
							if let Err(e) = self.queue.remove_repeatable(&job.name).await {
								tracing::error!(
									"failed to remove schedule for invalid address {}: {}",
									job.data.address,
									e
								);
							}
						}
						Err(ProcessFailure::terminal(error))
					}
					other => Err(ProcessFailure::retryable(other)),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::testing::MockChainAdapter;
	use crate::store::{MemoryKvStore, StoreError};
	use crate::sync::queue::JobState;
	use crate::telemetry::testing::RecordingFailureSink;
	use std::sync::atomic::{AtomicUsize, Ordering};

	/// Store wrapper counting writes under the cache prefix.
	struct CountingStore {
		inner: MemoryKvStore,
		cache_puts: AtomicUsize,
	}

	impl CountingStore {
		fn new() -> Self {
			Self {
				inner: MemoryKvStore::new(),
				cache_puts: AtomicUsize::new(0),
			}
		}

		fn cache_puts(&self) -> usize {
			self.cache_puts.load(Ordering::SeqCst)
		}
	}

	#[async_trait::async_trait]
	impl KvStore for CountingStore {
		async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
			self.inner.get(key).await
		}

		async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
			if key.starts_with(Chain::Bitcoin.cache_prefix()) {
				self.cache_puts.fetch_add(1, Ordering::SeqCst);
			}
			self.inner.put(key, value).await
		}

		async fn delete(&self, key: &str) -> Result<(), StoreError> {
			self.inner.delete(key).await
		}

		async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
			self.inner.scan_prefix(prefix).await
		}

		async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
			self.inner.try_lock(key, ttl).await
		}

		async fn unlock(&self, key: &str) -> Result<(), StoreError> {
			self.inner.unlock(key).await
		}
	}

	struct Fixture {
		adapter: Arc<MockChainAdapter>,
		store: Arc<CountingStore>,
		sink: Arc<RecordingFailureSink>,
		syncer: Arc<UtxoSyncer>,
	}

	fn fixture_with_config(config: SyncerConfig) -> Fixture {
		let adapter = Arc::new(MockChainAdapter::new(Chain::Bitcoin));
		let store = Arc::new(CountingStore::new());
		let sink = Arc::new(RecordingFailureSink::new());
		let syncer = Arc::new(UtxoSyncer::new(
			adapter.clone(),
			store.clone(),
			sink.clone(),
			config,
		));
		Fixture {
			adapter,
			store,
			sink,
			syncer,
		}
	}

	fn fixture() -> Fixture {
		fixture_with_config(SyncerConfig::default())
	}

	fn request(address: &str) -> SyncRequest {
		SyncRequest {
			address: address.to_string(),
			coin_type: Chain::Bitcoin,
		}
	}

	fn job(address: &str, repeatable: bool) -> Job<SyncRequest> {
		let now = Utc::now().timestamp_millis();
		Job {
			id: "job-1".to_string(),
			name: address.to_string(),
			data: request(address),
			state: JobState::Active,
			attempts_made: 0,
			repeat: repeatable.then(|| RepeatOptions { end_at: now + 3_600_000 }),
			repeat_count: 0,
			next_run_at: now,
			created_at: now,
		}
	}

	#[test]
	fn digest_is_order_insensitive_and_status_sensitive() {
		let a = MockChainAdapter::tx("aa", Some(100));
		let b = MockChainAdapter::tx("bb", Some(101));

		let forward = history_digest(&[a.clone(), b.clone()]).unwrap();
		let reversed = history_digest(&[b.clone(), a.clone()]).unwrap();
		assert_eq!(forward, reversed);

		let reorged = MockChainAdapter::tx("aa", Some(102));
		let changed = history_digest(&[reorged, b]).unwrap();
		assert_ne!(forward, changed);

		assert_ne!(history_digest(&[]).unwrap(), forward);
	}

	#[tokio::test]
	async fn enqueue_creates_one_schedule_and_throttles_bursts() {
		let f = fixture();
		assert!(f.syncer.enqueue_sync("addr-1").await.unwrap());
		assert!(!f.syncer.enqueue_sync("addr-1").await.unwrap(), "burst is throttled");

		let jobs = f.syncer.queue().jobs().await.unwrap();
		assert_eq!(jobs.len(), 1);

		// Past the throttle window, a new request replaces the schedule.
		tokio::time::sleep(Duration::from_millis(1_050)).await;
		assert!(f.syncer.enqueue_sync("addr-1").await.unwrap());

		let jobs = f.syncer.queue().jobs().await.unwrap();
		assert_eq!(jobs.len(), 1, "replace keeps one live schedule");
		assert!(jobs[0].next_run_at <= Utc::now().timestamp_millis());
		assert_eq!(jobs[0].repeat_count, 0);
	}

	#[tokio::test]
	async fn enqueue_rejects_invalid_address_without_scheduling() {
		let f = fixture();
		f.adapter.mark_invalid("bad-addr");

		let err = f.syncer.enqueue_sync("bad-addr").await.unwrap_err();
		assert!(matches!(err, SyncerError::InvalidAddress { .. }));
		assert!(f.syncer.queue().jobs().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn unchanged_digest_short_circuits_to_cached_result() {
		let f = fixture();
		f.adapter.set_txs(vec![MockChainAdapter::tx("aa", Some(100))]);
		f.adapter.set_utxos(vec![Utxo {
			txid: "aa".to_string(),
			vout: 0,
			value: 5_000,
			status: MockChainAdapter::confirmed_status(100),
		}]);

		let first = f.syncer.process_request(&request("addr-1")).await.unwrap();
		assert_eq!(f.adapter.utxo_fetches(), 1);
		assert_eq!(f.store.cache_puts(), 1);

		let second = f.syncer.process_request(&request("addr-1")).await.unwrap();
		assert_eq!(second, first, "cached result returned unchanged");
		assert_eq!(f.adapter.utxo_fetches(), 1, "no second utxo fetch");
		assert_eq!(f.store.cache_puts(), 1, "no second cache write");
		assert_eq!(f.adapter.history_fetches(), 2);
	}

	#[tokio::test]
	async fn changed_digest_refetches_and_overwrites_cache() {
		let f = fixture();
		f.adapter.set_txs(vec![MockChainAdapter::tx("aa", Some(100))]);
		let first = f.syncer.process_request(&request("addr-1")).await.unwrap();

		// A new confirmation appears: digest changes.
		f.adapter.set_txs(vec![
			MockChainAdapter::tx("aa", Some(100)),
			MockChainAdapter::tx("bb", Some(101)),
		]);
		f.adapter.set_utxos(vec![Utxo {
			txid: "bb".to_string(),
			vout: 1,
			value: 7_000,
			status: MockChainAdapter::confirmed_status(101),
		}]);

		let second = f.syncer.process_request(&request("addr-1")).await.unwrap();
		assert_ne!(second.txs_hash, first.txs_hash);
		assert_eq!(f.adapter.utxo_fetches(), 2);
		assert_eq!(f.store.cache_puts(), 2);

		let cached = f.syncer.get_utxos_by_address("addr-1", false).await.unwrap();
		assert_eq!(cached, second.utxos);
	}

	#[tokio::test]
	async fn read_path_serves_cache_unless_bypassed() {
		let f = fixture();
		f.adapter.set_utxos(vec![Utxo {
			txid: "aa".to_string(),
			vout: 0,
			value: 5_000,
			status: MockChainAdapter::confirmed_status(100),
		}]);
		f.syncer.process_request(&request("addr-1")).await.unwrap();
		assert_eq!(f.adapter.utxo_fetches(), 1);

		let utxos = f.syncer.get_utxos_by_address("addr-1", false).await.unwrap();
		assert_eq!(utxos.len(), 1);
		assert_eq!(f.adapter.utxo_fetches(), 1, "served from cache");

		f.syncer.get_utxos_by_address("addr-1", true).await.unwrap();
		assert_eq!(f.adapter.utxo_fetches(), 2, "bypass hits the adapter");
	}

	#[tokio::test]
	async fn read_path_fetches_directly_when_cache_disabled() {
		let f = fixture_with_config(SyncerConfig {
			cache_enable: false,
			..SyncerConfig::default()
		});
		f.syncer.process_request(&request("addr-1")).await.unwrap();
		assert_eq!(f.store.cache_puts(), 0, "no cache writes when disabled");

		f.syncer.get_utxos_by_address("addr-1", false).await.unwrap();
		assert_eq!(f.adapter.utxo_fetches(), 2);
	}

	#[tokio::test]
	async fn invalid_address_job_tears_down_schedule_and_fails_terminally() {
		let f = fixture();
		assert!(f.syncer.enqueue_sync("addr-1").await.unwrap());
		assert!(f.syncer.queue().get_repeatable_job("addr-1").await.unwrap().is_some());

		// The address later turns out invalid (e.g. a network switch).
		f.adapter.mark_invalid("addr-1");
		let failure = JobProcessor::process(&*f.syncer, &job("addr-1", true))
			.await
			.unwrap_err();
		assert!(!failure.retryable, "validation failures are terminal");
		assert!(
			f.syncer.queue().get_repeatable_job("addr-1").await.unwrap().is_none(),
			"schedule removed"
		);
	}

	#[tokio::test]
	async fn fetch_failures_are_retryable_and_reported() {
		let f = fixture();
		f.adapter.fail_history();

		let failure = JobProcessor::process(&*f.syncer, &job("addr-1", false))
			.await
			.unwrap_err();
		assert!(failure.retryable);

		let captures = f.sink.captures();
		assert_eq!(captures.len(), 1);
		assert_eq!(captures[0].1.address, "addr-1");
	}

	#[tokio::test]
	async fn ignored_addresses_fail_without_telemetry() {
		let f = fixture_with_config(SyncerConfig {
			ignore_addresses: HashSet::from(["addr-1".to_string()]),
			..SyncerConfig::default()
		});
		f.adapter.fail_history();

		let failure = JobProcessor::process(&*f.syncer, &job("addr-1", false))
			.await
			.unwrap_err();
		assert!(failure.retryable, "suppression never alters retry mechanics");
		assert!(f.sink.captures().is_empty());
	}
}
