//! Access-token lifecycle: validity checks and single-flight refresh per principal.
//!
//! [`TokenLifecycleManager::verify`] makes sure a session holds a usable token before a
//! resource call. Expired tokens are refreshed by a background task; every concurrent caller
//! for the same principal attaches to the same [`RefreshHandle`] and observes the same
//! outcome. The task is detached from its callers, so a caller that stops waiting never
//! cancels a refresh other callers depend on. A provider rejection clears the session's
//! token and surfaces as [`Error::NeedsReauthorization`].

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Principal},
	oauth::TokenEndpoint,
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	session::Session,
};

type SharedOutcome = Option<Result<(), Arc<Error>>>;

/// Attachment to an in-flight refresh; cloning attaches another waiter.
#[derive(Clone)]
pub struct RefreshHandle {
	principal: Principal,
	outcome: watch::Receiver<SharedOutcome>,
}
impl RefreshHandle {
	/// Principal being refreshed.
	pub fn principal(&self) -> &Principal {
		&self.principal
	}

	/// Returns `true` once the refresh has published its outcome.
	pub fn is_finished(&self) -> bool {
		self.outcome.borrow().is_some()
	}

	/// Waits for the shared outcome. Dropping this future detaches only this waiter.
	pub async fn wait(mut self) -> Result<()> {
		let outcome = match self.outcome.wait_for(Option::is_some).await {
			Ok(outcome) => outcome.clone(),
			Err(_) => None,
		};

		match outcome {
			Some(Ok(())) => Ok(()),
			Some(Err(e)) => Err(Error::from_shared(e)),
			None => Err(Error::RefreshAbandoned { principal: self.principal }),
		}
	}
}
impl Debug for RefreshHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshHandle")
			.field("principal", &self.principal)
			.field("finished", &self.is_finished())
			.finish()
	}
}

/// Ensures sessions hold valid tokens, refreshing at most once per principal at a time.
#[derive(Clone)]
pub struct TokenLifecycleManager {
	endpoint: Arc<dyn TokenEndpoint>,
	in_flight: Arc<Mutex<HashMap<Principal, RefreshHandle>>>,
	metrics: Arc<RefreshMetrics>,
}
impl TokenLifecycleManager {
	/// Creates a manager that refreshes through `endpoint`.
	pub fn new(endpoint: Arc<dyn TokenEndpoint>) -> Self {
		Self {
			endpoint,
			in_flight: Default::default(),
			metrics: Default::default(),
		}
	}

	/// Refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Returns the refresh currently in flight for `principal`, if any.
	pub fn in_flight(&self, principal: &Principal) -> Option<RefreshHandle> {
		self.in_flight.lock().get(principal).cloned()
	}

	/// Makes sure `session` holds a token that has not expired.
	///
	/// Joins a refresh already in flight for the principal; otherwise fails with
	/// [`Error::NeedsReauthorization`] when no token is present, returns immediately when the
	/// token is still valid, and starts a shared refresh when it has expired.
	pub async fn verify(&self, session: Arc<dyn Session>) -> Result<()> {
		let handle = {
			let mut in_flight = self.in_flight.lock();

			if let Some(handle) = in_flight.get(session.principal()) {
				self.metrics.record_join();

				tracing::debug!(principal = %session.principal(), "joining in-flight token refresh");

				handle.clone()
			} else {
				let Some(token) = session.access_token() else {
					return Err(Error::NeedsReauthorization {
						principal: session.principal().clone(),
					});
				};

				if !token.is_expired() {
					return Ok(());
				}

				let handle = self.spawn_refresh(session.clone(), token);

				in_flight.insert(session.principal().clone(), handle.clone());

				handle
			}
		};

		handle.wait().await
	}

	// Called with the in-flight map locked; the publisher removes the entry after the lock is
	// released, so the entry it removes is always the one inserted for this refresh.
	fn spawn_refresh(&self, session: Arc<dyn Session>, token: AccessToken) -> RefreshHandle {
		let (sender, receiver) = watch::channel(None);
		let principal = session.principal().clone();
		let work = tokio::spawn(refresh_session(
			self.endpoint.clone(),
			session,
			token,
			self.metrics.clone(),
		));
		let in_flight = self.in_flight.clone();
		let publisher_principal = principal.clone();

		tokio::spawn(async move {
			let outcome = match work.await {
				Ok(outcome) => outcome,
				Err(e) => Err(Error::Background(e)),
			};

			in_flight.lock().remove(&publisher_principal);
			sender.send_replace(Some(outcome.map_err(Arc::new)));
		});

		RefreshHandle { principal, outcome: receiver }
	}
}
impl Debug for TokenLifecycleManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenLifecycleManager")
			.field("in_flight", &self.in_flight.lock().len())
			.field("metrics", &self.metrics)
			.finish()
	}
}

async fn refresh_session(
	endpoint: Arc<dyn TokenEndpoint>,
	session: Arc<dyn Session>,
	token: AccessToken,
	metrics: Arc<RefreshMetrics>,
) -> Result<()> {
	const KIND: OperationKind = OperationKind::Refresh;

	let principal = session.principal().clone();
	let span = OperationSpan::new(KIND, "verify");

	obs::record_outcome(KIND, OperationOutcome::Attempt);
	metrics.record_attempt();

	let result: Result<()> = span
		.instrument(async {
			match endpoint.refresh(&token.refresh_token).await {
				Ok(grant) => {
					let renewed =
						grant.into_access_token(OffsetDateTime::now_utc(), Some(&token.refresh_token))?;

					session.replace_access_token(Some(renewed)).await?;

					tracing::debug!(%principal, "access token refreshed");

					Ok(())
				},
				Err(Error::ProviderRejected { code, description }) => {
					tracing::warn!(
						%principal,
						code = %code,
						description = description.as_deref().unwrap_or_default(),
						"token refresh rejected; clearing stored token"
					);

					session.replace_access_token(None).await?;

					Err(Error::NeedsReauthorization { principal: principal.clone() })
				},
				Err(e) => {
					tracing::warn!(%principal, error = %e, "token refresh failed");

					Err(e)
				},
			}
		})
		.await;

	if result.is_ok() {
		metrics.record_success();
	} else {
		metrics.record_failure();
	}

	obs::record_outcome(KIND, OperationOutcome::of(&result));

	result
}
