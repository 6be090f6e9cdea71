//! Admission control driven by the provider's announced error budget.
//!
//! [`AdmissionController`] bounds the number of in-flight requests against a capacity the
//! provider dictates through response headers. Callers obtain an [`AdmissionPermit`] from
//! [`AdmissionController::acquire`]; the permit releases its slot when dropped, so every
//! exit path (success, error, cancellation) gives the slot back. Waiters are resumed in
//! strict FIFO order, and only by a release or a capacity update, never by themselves.
//!
//! Capacity updates arrive through [`AdmissionController::set_remaining`] and are applied in
//! strictly increasing response-timestamp order; a response that completes late over the
//! network cannot roll the budget back. When the provider announces a reset window, a timer
//! reopens a fully closed budget to one slot once the window passes.

mod permit;

pub use permit::AdmissionPermit;

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};
// self
use crate::{_prelude::*, admission::permit::PendingGrant};

/// Capacity used until the first real budget announcement is observed.
pub const INITIAL_CAPACITY: u64 = 1;

/// Point-in-time view of the limiter state, mainly for diagnostics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionSnapshot {
	/// Current capacity `L`.
	pub capacity: u64,
	/// Outstanding permits `O`.
	pub occupancy: u64,
	/// Live callers suspended in the FIFO queue.
	pub waiting: usize,
	/// Response timestamp of the last applied budget update.
	pub last_applied: Option<OffsetDateTime>,
	/// Whether a reset timer is armed.
	pub reset_pending: bool,
}

/// Process-local concurrency limiter whose capacity follows the provider's error budget.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct AdmissionController(Arc<AdmissionInner>);
impl AdmissionController {
	/// Creates a controller with the conservative [`INITIAL_CAPACITY`].
	pub fn new() -> Self {
		Self::with_capacity(INITIAL_CAPACITY)
	}

	/// Creates a controller with an explicit starting capacity.
	pub fn with_capacity(capacity: u64) -> Self {
		Self(Arc::new(AdmissionInner {
			state: Mutex::new(RateLimitState {
				capacity,
				occupancy: 0,
				waiters: VecDeque::new(),
				last_applied: None,
				reset_timer: None,
				timer_generation: 0,
			}),
		}))
	}

	/// Suspends until a slot is available and returns a scoped permit for it.
	///
	/// The fast path never suspends. Otherwise the caller joins the tail of the FIFO queue and
	/// is resumed by a later [`release`](AdmissionPermit::release) or capacity update. Dropping
	/// the returned future while queued forfeits the place in line without leaking a slot.
	pub async fn acquire(&self) -> AdmissionPermit {
		loop {
			let receiver = {
				let mut state = self.0.state.lock();

				if state.occupancy < state.capacity {
					state.occupancy += 1;

					return AdmissionPermit::new(self.clone());
				}

				let (sender, receiver) = oneshot::channel();

				state.waiters.push_back(sender);

				receiver
			};
			let mut pending = PendingGrant::new(self.clone(), receiver);

			if pending.granted().await {
				return AdmissionPermit::new(self.clone());
			}
		}
	}

	/// Applies a budget announcement taken from a response.
	///
	/// `response_at` must be the provider's own response timestamp. Announcements whose
	/// timestamp is not strictly newer than the last applied one are ignored and leave both
	/// the capacity and the reset timer untouched; the return value reports whether the
	/// update was applied. Negative budgets clamp to a fully closed limiter.
	pub fn set_remaining(
		&self,
		response_at: OffsetDateTime,
		remaining: i64,
		reset_after: Option<StdDuration>,
	) -> bool {
		let mut state = self.0.state.lock();

		if state.last_applied.is_some_and(|last| response_at <= last) {
			tracing::trace!(%response_at, remaining, "ignoring out-of-order error budget update");

			return false;
		}

		let previous = state.capacity;

		state.last_applied = Some(response_at);
		state.capacity = u64::try_from(remaining).unwrap_or(0);

		if state.capacity > previous {
			state.drain();
		}
		if let Some(reset_after) = reset_after {
			self.schedule_reset(&mut state, reset_after);
		}

		tracing::debug!(
			capacity = state.capacity,
			occupancy = state.occupancy,
			waiting = state.waiters.len(),
			"applied error budget update"
		);

		true
	}

	/// Returns a point-in-time view of the limiter.
	pub fn snapshot(&self) -> AdmissionSnapshot {
		let state = self.0.state.lock();

		AdmissionSnapshot {
			capacity: state.capacity,
			occupancy: state.occupancy,
			waiting: state.waiters.iter().filter(|waiter| !waiter.is_closed()).count(),
			last_applied: state.last_applied,
			reset_pending: state.reset_timer.is_some(),
		}
	}

	pub(crate) fn release_slot(&self) {
		let mut state = self.0.state.lock();

		state.occupancy = state.occupancy.saturating_sub(1);
		state.drain();
	}

	fn schedule_reset(&self, state: &mut RateLimitState, reset_after: StdDuration) {
		if let Some(previous) = state.reset_timer.take() {
			previous.abort();
		}

		state.timer_generation = state.timer_generation.wrapping_add(1);

		let Ok(runtime) = Handle::try_current() else {
			tracing::warn!("no async runtime is available; budget reset timer was not armed");

			return;
		};
		let generation = state.timer_generation;
		let inner = Arc::downgrade(&self.0);

		state.reset_timer = Some(runtime.spawn(async move {
			tokio::time::sleep(reset_after).await;

			if let Some(inner) = inner.upgrade() {
				inner.reopen(generation);
			}
		}));
	}
}
impl Default for AdmissionController {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for AdmissionController {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("AdmissionController").field(&self.snapshot()).finish()
	}
}

struct AdmissionInner {
	state: Mutex<RateLimitState>,
}
impl AdmissionInner {
	fn reopen(&self, generation: u64) {
		let mut state = self.state.lock();

		if state.timer_generation != generation {
			return;
		}

		state.reset_timer = None;

		if state.capacity < 1 {
			tracing::info!("error budget window elapsed; reopening admission with one slot");

			state.capacity = 1;
			state.drain();
		}
	}
}
impl Drop for AdmissionInner {
	fn drop(&mut self) {
		if let Some(timer) = self.state.get_mut().reset_timer.take() {
			timer.abort();
		}
	}
}

struct RateLimitState {
	capacity: u64,
	occupancy: u64,
	waiters: VecDeque<oneshot::Sender<()>>,
	last_applied: Option<OffsetDateTime>,
	reset_timer: Option<JoinHandle<()>>,
	timer_generation: u64,
}
impl RateLimitState {
	/// Hands free slots to queued waiters in FIFO order; abandoned waiters are skipped.
	fn drain(&mut self) {
		while self.occupancy < self.capacity {
			let Some(waiter) = self.waiters.pop_front() else {
				break;
			};

			if waiter.send(()).is_ok() {
				self.occupancy += 1;
			}
		}
	}
}
