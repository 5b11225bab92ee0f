//! Durable job queue and worker loop.
//!
//! Job records are serialized into the shared key-value store under
//! `queue:<name>:job:<id>`, so any worker process over the same store sees
//! the same queue. The worker loop polls for due jobs, takes the per-job-id
//! execution lock, and runs the registered processor with bounded
//! concurrency. Repeatable jobs reschedule themselves through the backoff
//! policy until their repeat horizon; failed jobs are retried up to the
//! configured attempt limit and then parked for an explicit external retry.
//!
//! Replace-not-merge: adding a repeatable job removes any live descriptor
//! with the same name first, so the new occurrence always starts at attempt
//! zero and runs immediately.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::store::{KvStore, StoreError};
use crate::sync::backoff;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
	#[error("store error: {0}")]
	Store(#[from] StoreError),

	#[error("job serialization error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("no such job: {0}")]
	JobNotFound(String),
}

/// Lifecycle state of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
	Waiting,
	Active,
	Completed,
	Failed,
	Delayed,
}

/// Repeat settings for a self-rescheduling job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatOptions {
	/// No occurrence is scheduled past this instant (epoch milliseconds).
	#[serde(rename = "endAt")]
	pub end_at: i64,
}

/// One durable job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job<P> {
	pub id: String,
	pub name: String,
	pub data: P,
	pub state: JobState,
	/// Failed attempts of the current occurrence.
	pub attempts_made: u32,
	pub repeat: Option<RepeatOptions>,
	/// Completed occurrences of a repeatable job.
	pub repeat_count: u32,
	pub next_run_at: i64,
	pub created_at: i64,
}

impl<P> Job<P> {
	pub fn is_repeatable(&self) -> bool {
		self.repeat.is_some()
	}
}

/// A failed job execution, with the retry decision attached.
#[derive(Debug)]
pub struct ProcessFailure {
	pub retryable: bool,
	pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl ProcessFailure {
	pub fn retryable(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Self {
			retryable: true,
			error: error.into(),
		}
	}

	pub fn terminal(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Self {
			retryable: false,
			error: error.into(),
		}
	}
}

/// The job body executed by the worker loop.
#[async_trait::async_trait]
pub trait JobProcessor<P>: Send + Sync {
	async fn process(&self, job: &Job<P>) -> Result<(), ProcessFailure>;
}

pub type JobCallback<P> = Box<dyn Fn(&Job<P>) + Send + Sync>;

/// Callbacks invoked on job state transitions.
pub struct WorkerCallbacks<P> {
	pub on_active: Option<JobCallback<P>>,
	pub on_completed: Option<JobCallback<P>>,
}

impl<P> Default for WorkerCallbacks<P> {
	fn default() -> Self {
		Self {
			on_active: None,
			on_completed: None,
		}
	}
}

/// Tuning knobs for a queue worker.
#[derive(Debug, Clone)]
pub struct QueueOptions {
	/// How long a job id stays locked while active.
	pub lock_duration: Duration,
	/// Attempts per occurrence before the job is parked as failed.
	pub max_attempts: u32,
	pub backoff_base: Duration,
	pub backoff_max: Duration,
	/// Maximum simultaneously active jobs.
	pub concurrency: usize,
	pub poll_interval: Duration,
}

impl Default for QueueOptions {
	fn default() -> Self {
		Self {
			lock_duration: Duration::from_secs(60),
			max_attempts: 2,
			backoff_base: Duration::from_secs(10),
			backoff_max: Duration::from_secs(3600),
			concurrency: 4,
			poll_interval: Duration::from_millis(250),
		}
	}
}

fn now_ms() -> i64 {
	Utc::now().timestamp_millis()
}

fn new_job_id() -> String {
	let mut bytes = [0u8; 12];
	rand::rng().fill(&mut bytes);
	hex::encode(bytes)
}

/// Durable named queue plus its worker loop.
pub struct QueueWorker<P> {
	name: String,
	store: Arc<dyn KvStore>,
	opts: QueueOptions,
	paused: AtomicBool,
	started: AtomicBool,
	shutdown_tx: watch::Sender<bool>,
	handle: Mutex<Option<JoinHandle<()>>>,
	_marker: PhantomData<fn(P) -> P>,
}

impl<P> QueueWorker<P>
where
	P: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
	pub fn new(name: impl Into<String>, store: Arc<dyn KvStore>, opts: QueueOptions) -> Self {
		let (shutdown_tx, _) = watch::channel(false);
		Self {
			name: name.into(),
			store,
			opts,
			paused: AtomicBool::new(false),
			started: AtomicBool::new(false),
			shutdown_tx,
			handle: Mutex::new(None),
			_marker: PhantomData,
		}
	}

	fn job_key(&self, id: &str) -> String {
		format!("queue:{}:job:{}", self.name, id)
	}

	fn lock_key(&self, id: &str) -> String {
		format!("queue:{}:lock:{}", self.name, id)
	}

	fn job_prefix(&self) -> String {
		format!("queue:{}:job:", self.name)
	}

	async fn load_job(&self, id: &str) -> Result<Option<Job<P>>, QueueError> {
		match self.store.get(&self.job_key(id)).await? {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	async fn save_job(&self, job: &Job<P>) -> Result<(), QueueError> {
		let bytes = serde_json::to_vec(job)?;
		self.store.put(&self.job_key(&job.id), &bytes).await?;
		Ok(())
	}

	async fn remove_job(&self, id: &str) -> Result<(), QueueError> {
		self.store.delete(&self.job_key(id)).await?;
		Ok(())
	}

	/// Load every job record in this queue.
	pub async fn jobs(&self) -> Result<Vec<Job<P>>, QueueError> {
		let mut jobs = Vec::new();
		for key in self.store.scan_prefix(&self.job_prefix()).await? {
			if let Some(bytes) = self.store.get(&key).await? {
				jobs.push(serde_json::from_slice(&bytes)?);
			}
		}
		Ok(jobs)
	}

	pub async fn get_job(&self, id: &str) -> Result<Option<Job<P>>, QueueError> {
		self.load_job(id).await
	}

	/// Find the live repeatable descriptor for a job name, if any.
	pub async fn get_repeatable_job(&self, name: &str) -> Result<Option<Job<P>>, QueueError> {
		Ok(self
			.jobs()
			.await?
			.into_iter()
			.find(|job| job.is_repeatable() && job.name == name))
	}

	/// Remove the live repeatable descriptor for a job name. Returns whether
	/// one existed.
	pub async fn remove_repeatable(&self, name: &str) -> Result<bool, QueueError> {
		match self.get_repeatable_job(name).await? {
			Some(job) => {
				self.remove_job(&job.id).await?;
				debug!("removed repeatable job {} ({})", job.id, name);
				Ok(true)
			}
			None => Ok(false),
		}
	}

	/// Insert a job that runs immediately.
	///
	/// When `repeat` is set, any live repeatable descriptor with the same
	/// name is removed first, so the new occurrence starts at attempt zero
	/// and never inherits the old backoff state.
	pub async fn add_job(
		&self,
		name: &str,
		data: P,
		repeat: Option<RepeatOptions>,
	) -> Result<Job<P>, QueueError> {
		if repeat.is_some() {
			self.remove_repeatable(name).await?;
		}
		let now = now_ms();
		let job = Job {
			id: new_job_id(),
			name: name.to_string(),
			data,
			state: JobState::Waiting,
			attempts_made: 0,
			repeat,
			repeat_count: 0,
			next_run_at: now,
			created_at: now,
		};
		self.save_job(&job).await?;
		debug!("added job {} ({}) to queue {}", job.id, name, self.name);
		Ok(job)
	}

	/// Requeue a failed job. This is the only transition out of the failed
	/// state; the worker itself never resurrects an exhausted job.
	pub async fn retry_job(&self, id: &str) -> Result<(), QueueError> {
		let mut job = self
			.load_job(id)
			.await?
			.ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
		if job.state != JobState::Failed {
			warn!("job {} is not failed, ignoring retry request", id);
			return Ok(());
		}
		job.state = JobState::Waiting;
		job.attempts_made = 0;
		job.next_run_at = now_ms();
		self.save_job(&job).await?;
		info!("requeued failed job {} ({})", job.id, job.name);
		Ok(())
	}

	/// Begin consuming jobs. Idempotent against repeated start calls.
	pub fn start_process(
		self: Arc<Self>,
		processor: Arc<dyn JobProcessor<P>>,
		callbacks: WorkerCallbacks<P>,
	) {
		if self.started.swap(true, Ordering::SeqCst) {
			warn!("queue {} worker already started", self.name);
			return;
		}
		info!("starting worker for queue {}", self.name);
		let worker = self.clone();
		let callbacks = Arc::new(callbacks);
		let handle = tokio::spawn(async move {
			worker.run_loop(processor, callbacks).await;
		});
		*self.handle.lock().unwrap() = Some(handle);
	}

	/// Stop picking up new jobs. In-flight executions keep running.
	pub fn pause_process(&self) {
		self.paused.store(true, Ordering::SeqCst);
		info!("paused worker for queue {}", self.name);
	}

	/// Shut the worker loop down after in-flight work settles.
	pub async fn close_process(&self) {
		let _ = self.shutdown_tx.send(true);
		let handle = self.handle.lock().unwrap().take();
		if let Some(handle) = handle {
			if let Err(e) = handle.await {
				error!("queue {} worker task failed: {}", self.name, e);
			}
		}
		info!("closed worker for queue {}", self.name);
	}

	async fn run_loop(
		self: Arc<Self>,
		processor: Arc<dyn JobProcessor<P>>,
		callbacks: Arc<WorkerCallbacks<P>>,
	) {
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		let mut active: JoinSet<()> = JoinSet::new();

		loop {
			if *shutdown_rx.borrow() {
				break;
			}

			if !self.paused.load(Ordering::SeqCst) && active.len() < self.opts.concurrency {
				match self.take_due_job().await {
					Ok(Some(job)) => {
						let worker = self.clone();
						let processor = processor.clone();
						let callbacks = callbacks.clone();
						active.spawn(async move {
							worker.execute(processor, callbacks, job).await;
						});
						// Try to fill the remaining slots before sleeping.
						continue;
					}
					Ok(None) => {}
					Err(e) => error!("queue {} failed to poll for jobs: {}", self.name, e),
				}
			}

			tokio::select! {
				_ = shutdown_rx.changed() => break,
				_ = tokio::time::sleep(self.opts.poll_interval) => {}
				Some(result) = active.join_next(), if !active.is_empty() => {
					if let Err(e) = result {
						error!("queue {} job task failed: {}", self.name, e);
					}
				}
			}
		}

		// Let in-flight executions settle before releasing resources.
		while let Some(result) = active.join_next().await {
			if let Err(e) = result {
				error!("queue {} job task failed: {}", self.name, e);
			}
		}
	}

	/// Pick the next due job and take its execution lock. An active job
	/// whose lock has expired is treated as stalled and reclaimed.
	async fn take_due_job(&self) -> Result<Option<Job<P>>, QueueError> {
		let now = now_ms();
		let mut jobs = self.jobs().await?;
		jobs.sort_by_key(|job| job.next_run_at);

		for job in jobs {
			let due = matches!(job.state, JobState::Waiting | JobState::Delayed)
				&& job.next_run_at <= now;
			let stalled = job.state == JobState::Active;
			if !due && !stalled {
				continue;
			}

			let lock_key = self.lock_key(&job.id);
			if !self.store.try_lock(&lock_key, self.opts.lock_duration).await? {
				continue;
			}

			// Re-read under the lock: the record may have been removed or
			// rescheduled between the scan and the lock acquisition.
			let Some(mut current) = self.load_job(&job.id).await? else {
				self.store.unlock(&lock_key).await?;
				continue;
			};
			let still_pickable = current.state == JobState::Active
				|| (matches!(current.state, JobState::Waiting | JobState::Delayed)
					&& current.next_run_at <= now);
			if !still_pickable {
				self.store.unlock(&lock_key).await?;
				continue;
			}

			if current.state == JobState::Active {
				warn!("reclaiming stalled job {} ({})", current.id, current.name);
			}
			current.state = JobState::Active;
			self.save_job(&current).await?;
			return Ok(Some(current));
		}
		Ok(None)
	}

	async fn execute(
		&self,
		processor: Arc<dyn JobProcessor<P>>,
		callbacks: Arc<WorkerCallbacks<P>>,
		job: Job<P>,
	) {
		debug!("job {} ({}) active on queue {}", job.id, job.name, self.name);
		if let Some(on_active) = &callbacks.on_active {
			on_active(&job);
		}

		let result = processor.process(&job).await;
		if let Err(e) = self.finalize(job, result, &callbacks).await {
			error!("queue {} failed to finalize job: {}", self.name, e);
		}
	}

	async fn finalize(
		&self,
		mut job: Job<P>,
		result: Result<(), ProcessFailure>,
		callbacks: &WorkerCallbacks<P>,
	) -> Result<(), QueueError> {
		let lock_key = self.lock_key(&job.id);

		// The record may have been replaced while this execution ran (a
		// resync request removed it); the replacement owns the schedule, so
		// only release the lock.
		if self.load_job(&job.id).await?.is_none() {
			debug!("job {} removed while active, dropping result", job.id);
			self.store.unlock(&lock_key).await?;
			return Ok(());
		}

		match result {
			Ok(()) => {
				job.state = JobState::Completed;
				if let Some(on_completed) = &callbacks.on_completed {
					on_completed(&job);
				}
				match job.repeat.clone() {
					Some(repeat) => {
						let next_count = job.repeat_count + 1;
						let delay = backoff::next_delay(
							next_count,
							self.opts.backoff_base,
							self.opts.backoff_max,
						);
						let next_run_at = now_ms() + delay.as_millis() as i64;
						if next_run_at > repeat.end_at {
							info!(
								"repeat horizon reached for job {} ({}), removing",
								job.id, job.name
							);
							self.remove_job(&job.id).await?;
						} else {
							info!("repeat job {} in {}ms", job.id, delay.as_millis());
							job.state = JobState::Delayed;
							job.repeat_count = next_count;
							job.attempts_made = 0;
							job.next_run_at = next_run_at;
							self.save_job(&job).await?;
						}
					}
					None => {
						// One-shot jobs are removed on completion.
						self.remove_job(&job.id).await?;
					}
				}
			}
			Err(failure) => {
				job.attempts_made += 1;
				if failure.retryable && job.attempts_made < self.opts.max_attempts {
					let delay = backoff::next_delay(
						job.attempts_made,
						self.opts.backoff_base,
						self.opts.backoff_max,
					);
					warn!(
						"job {} ({}) failed on attempt {}, retrying in {}ms: {}",
						job.id,
						job.name,
						job.attempts_made,
						delay.as_millis(),
						failure.error
					);
					job.state = JobState::Delayed;
					job.next_run_at = now_ms() + delay.as_millis() as i64;
					self.save_job(&job).await?;
				} else {
					error!(
						"job {} ({}) failed permanently after {} attempt(s): {}",
						job.id, job.name, job.attempts_made, failure.error
					);
					job.state = JobState::Failed;
					self.save_job(&job).await?;
				}
			}
		}

		self.store.unlock(&lock_key).await?;
		Ok(())
	}
}
