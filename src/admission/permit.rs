// crates.io
use tokio::sync::oneshot;
// self
use crate::{_prelude::*, admission::AdmissionController};

/// Scoped admission slot; the slot is returned exactly once, when the permit is dropped.
#[must_use = "dropping the permit immediately releases the admission slot"]
pub struct AdmissionPermit {
	controller: AdmissionController,
}
impl AdmissionPermit {
	pub(super) fn new(controller: AdmissionController) -> Self {
		Self { controller }
	}

	/// Releases the slot now instead of at the end of the enclosing scope.
	pub fn release(self) {
		drop(self);
	}
}
impl Drop for AdmissionPermit {
	fn drop(&mut self) {
		self.controller.release_slot();
	}
}
impl Debug for AdmissionPermit {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("AdmissionPermit(..)")
	}
}

/// Queue ticket held while a caller is suspended in [`AdmissionController::acquire`].
///
/// A grant may land after the caller stopped waiting (the future was dropped between the
/// release and the next poll). Dropping the ticket closes the channel and hands any such
/// grant straight back to the controller.
pub(super) struct PendingGrant {
	controller: AdmissionController,
	receiver: Option<oneshot::Receiver<()>>,
}
impl PendingGrant {
	pub(super) fn new(controller: AdmissionController, receiver: oneshot::Receiver<()>) -> Self {
		Self { controller, receiver: Some(receiver) }
	}

	/// Waits for the grant; `false` means the ticket was discarded and the caller must requeue.
	pub(super) async fn granted(&mut self) -> bool {
		let Some(receiver) = self.receiver.as_mut() else {
			return false;
		};
		let granted = receiver.await.is_ok();

		self.receiver = None;

		granted
	}
}
impl Drop for PendingGrant {
	fn drop(&mut self) {
		if let Some(mut receiver) = self.receiver.take() {
			receiver.close();

			if receiver.try_recv().is_ok() {
				self.controller.release_slot();
			}
		}
	}
}
