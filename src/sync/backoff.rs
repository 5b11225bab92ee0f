//! Repeat/retry delay policy.
//!
//! Maps an attempt count to the delay before the next run: zero on the first
//! attempt so a freshly added job runs immediately, then an exponential
//! curve capped at a maximum, plus up to one second of uniform jitter so a
//! burst of keys enqueued together does not re-poll in lockstep.
//!
//! For the default settings (base=10s, max=3600s) the intervals are
//! 20s, 40s, 80s, 160s, ..., 3600s, 3600s, ...

use std::time::Duration;

use rand::Rng;

/// Upper bound (exclusive) of the uniform jitter term.
pub const JITTER_MAX: Duration = Duration::from_millis(1000);

/// Delay before run `attempt` with fresh random jitter.
pub fn next_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
	let jitter = Duration::from_millis(rand::rng().random_range(0..JITTER_MAX.as_millis() as u64));
	next_delay_with_jitter(attempt, base, max, jitter)
}

/// Pure form of [`next_delay`] with the jitter supplied by the caller.
///
/// Attempt 0 always returns zero, jitter included: the first occurrence of a
/// job must execute immediately on enqueue.
pub fn next_delay_with_jitter(
	attempt: u32,
	base: Duration,
	max: Duration,
	jitter: Duration,
) -> Duration {
	if attempt == 0 {
		return Duration::ZERO;
	}
	let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
	exponential.min(max).saturating_add(jitter)
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE: Duration = Duration::from_secs(10);
	const MAX: Duration = Duration::from_secs(3600);

	#[test]
	fn first_attempt_runs_immediately() {
		assert_eq!(next_delay(0, BASE, MAX), Duration::ZERO);
		assert_eq!(
			next_delay_with_jitter(0, BASE, MAX, Duration::from_millis(999)),
			Duration::ZERO
		);
	}

	#[test]
	fn delay_stays_within_jitter_bounds() {
		for attempt in 1..=20 {
			let floor = BASE.saturating_mul(2u32.saturating_pow(attempt)).min(MAX);
			let delay = next_delay(attempt, BASE, MAX);
			assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
			assert!(
				delay < floor + JITTER_MAX,
				"attempt {attempt}: {delay:?} >= {:?}",
				floor + JITTER_MAX
			);
		}
	}

	#[test]
	fn delay_is_non_decreasing_up_to_the_cap() {
		let mut previous = Duration::ZERO;
		for attempt in 1..=20 {
			let delay = next_delay_with_jitter(attempt, BASE, MAX, Duration::ZERO);
			assert!(delay >= previous, "attempt {attempt} decreased");
			previous = delay;
		}
		assert_eq!(previous, MAX);
	}

	#[test]
	fn large_attempt_counts_do_not_overflow() {
		let delay = next_delay_with_jitter(u32::MAX, BASE, MAX, Duration::ZERO);
		assert_eq!(delay, MAX);
	}
}
