//! Per-key dedup throttle gate.
//!
//! Collapses bursts of identical sync requests into at most one effective
//! enqueue per key per window, with leading-edge semantics: the first call
//! in a window fires immediately and later calls inside the window are
//! dropped outright. Dropped calls are not queued or delayed; an existing
//! schedule for the key keeps running, so losing them is harmless.
//!
//! State is process-local by design. In a multi-process deployment each
//! process enforces its own window; the scheduler's replace semantics are
//! the real correctness guarantee.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fixed throttle window for sync enqueue requests.
pub const THROTTLE_WINDOW: Duration = Duration::from_millis(1000);

/// Pure leading-edge decision: fire when the key has never fired, or when a
/// full window has elapsed since its last fire.
pub fn should_fire_at(last_fired: Option<Instant>, now: Instant, window: Duration) -> bool {
	match last_fired {
		None => true,
		Some(last) => now.duration_since(last) >= window,
	}
}

/// Rate limiter holding last-fire instants per key.
pub struct EnqueueThrottle {
	window: Duration,
	last_fired: Mutex<HashMap<String, Instant>>,
}

impl EnqueueThrottle {
	pub fn new() -> Self {
		Self::with_window(THROTTLE_WINDOW)
	}

	pub fn with_window(window: Duration) -> Self {
		Self {
			window,
			last_fired: Mutex::new(HashMap::new()),
		}
	}

	/// Decide whether a request for `key` may pass the gate now, recording
	/// the fire time when it does.
	pub fn should_fire(&self, key: &str) -> bool {
		let now = Instant::now();
		let mut last_fired = self.last_fired.lock().unwrap();
		if !should_fire_at(last_fired.get(key).copied(), now, self.window) {
			return false;
		}
		// Entries past the window would fire again anyway; drop them here
		// so the map does not keep one entry per address ever seen.
		last_fired.retain(|_, last| now.duration_since(*last) < self.window);
		last_fired.insert(key.to_string(), now);
		true
	}

	#[cfg(test)]
	fn tracked_keys(&self) -> usize {
		self.last_fired.lock().unwrap().len()
	}
}

impl Default for EnqueueThrottle {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn burst_collapses_to_one_fire_per_window() {
		let throttle = EnqueueThrottle::new();
		let fired = (0..10).filter(|_| throttle.should_fire("addr-1")).count();
		assert_eq!(fired, 1);
	}

	#[test]
	fn keys_are_throttled_independently() {
		let throttle = EnqueueThrottle::new();
		assert!(throttle.should_fire("addr-1"));
		assert!(throttle.should_fire("addr-2"));
		assert!(!throttle.should_fire("addr-1"));
	}

	#[test]
	fn fires_again_after_the_window_elapses() {
		let throttle = EnqueueThrottle::with_window(Duration::from_millis(20));
		assert!(throttle.should_fire("addr-1"));
		assert!(!throttle.should_fire("addr-1"));
		std::thread::sleep(Duration::from_millis(25));
		assert!(throttle.should_fire("addr-1"));
	}

	#[test]
	fn stale_entries_are_pruned_on_fire() {
		let throttle = EnqueueThrottle::with_window(Duration::from_millis(20));
		assert!(throttle.should_fire("addr-1"));
		assert!(throttle.should_fire("addr-2"));
		assert_eq!(throttle.tracked_keys(), 2);

		std::thread::sleep(Duration::from_millis(25));
		assert!(throttle.should_fire("addr-3"));
		assert_eq!(throttle.tracked_keys(), 1, "expired entries dropped");

		// Pruned keys behave like never-seen keys.
		assert!(throttle.should_fire("addr-1"));
	}

	#[test]
	fn pure_decision_function() {
		let window = Duration::from_millis(1000);
		let start = Instant::now();
		assert!(should_fire_at(None, start, window));
		assert!(!should_fire_at(Some(start), start + Duration::from_millis(999), window));
		assert!(should_fire_at(Some(start), start + Duration::from_millis(1000), window));
	}
}
