//! Retry budget and error-budget safety margins applied by the executor.

// std
use std::time::Duration as StdDuration;
// crates.io
use rand::Rng;
// self
use crate::_prelude::*;

/// Attempt budget and backoff schedule for transient failures.
///
/// Attempt `n` (zero-based) that fails transiently sleeps `n * step + jitter` before the next
/// attempt, where `jitter` is drawn uniformly from `[jitter_min, jitter_max]`. The last
/// attempt's error propagates unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	/// Linear backoff added per attempt already made.
	pub step: StdDuration,
	/// Lower jitter bound.
	pub jitter_min: StdDuration,
	/// Upper jitter bound.
	pub jitter_max: StdDuration,
}
impl RetryPolicy {
	/// Policy that never retries.
	pub const fn single_attempt() -> Self {
		Self {
			max_attempts: 1,
			step: StdDuration::ZERO,
			jitter_min: StdDuration::ZERO,
			jitter_max: StdDuration::ZERO,
		}
	}

	/// Computes the sleep that follows the zero-based `attempt` when it failed transiently.
	pub fn delay_for(&self, attempt: u32) -> StdDuration {
		let (low, high) = if self.jitter_min <= self.jitter_max {
			(self.jitter_min, self.jitter_max)
		} else {
			(self.jitter_max, self.jitter_min)
		};
		let jitter = if low == high {
			low
		} else {
			StdDuration::from_secs_f64(
				rand::rng().random_range(low.as_secs_f64()..=high.as_secs_f64()),
			)
		};

		self.step.saturating_mul(attempt).saturating_add(jitter)
	}

	/// Drives `op` until it succeeds, fails permanently, or exhausts the attempt budget.
	///
	/// `op` receives the zero-based attempt index. Sleeps happen between invocations, so any
	/// resource `op` scopes to a single attempt is not held while backing off.
	pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let max_attempts = self.max_attempts.max(1);
		let mut attempt = 0;

		loop {
			match op(attempt).await {
				Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
					let delay = self.delay_for(attempt);

					tracing::warn!(
						operation = label,
						attempt = attempt + 1,
						max_attempts,
						delay_ms = delay.as_millis() as u64,
						status = e.status(),
						error = %e,
						"transient failure; retrying"
					);

					tokio::time::sleep(delay).await;

					attempt += 1;
				},
				result => return result,
			}
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			step: StdDuration::from_secs(1),
			jitter_min: StdDuration::from_millis(500),
			jitter_max: StdDuration::from_millis(1_500),
		}
	}
}

/// Safety margins applied to budget announcements before they reach the admission controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetFeedback {
	/// Requests held back from the announced budget.
	pub reserve: i64,
	/// Extra time added to the announced reset window.
	pub grace: StdDuration,
}
impl BudgetFeedback {
	/// Applies the margins to an announced budget.
	pub fn adjust(&self, remaining: i64, reset_after: StdDuration) -> (i64, StdDuration) {
		(remaining.saturating_sub(self.reserve), reset_after.saturating_add(self.grace))
	}
}
impl Default for BudgetFeedback {
	fn default() -> Self {
		Self { reserve: 1, grace: StdDuration::from_millis(500) }
	}
}
