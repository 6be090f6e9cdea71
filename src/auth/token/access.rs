//! Immutable access-token values; a refresh replaces the whole value.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Lifecycle status of an [`AccessToken`] at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// The expiry instant lies in the future.
	Valid,
	/// The expiry instant has passed; a refresh is required.
	Expired,
}

/// OAuth access token plus the refresh token that renews it.
///
/// Values are never mutated in place. A successful refresh installs a brand-new value and a
/// rejected refresh clears the session's token to absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
	/// Bearer token presented to resource endpoints.
	pub access_token: TokenSecret,
	/// Instant after which the bearer token is no longer accepted.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Refresh token used to mint the next access token.
	pub refresh_token: TokenSecret,
}
impl AccessToken {
	/// Creates a token with an absolute expiry.
	pub fn new(
		access_token: impl Into<String>,
		expires_at: OffsetDateTime,
		refresh_token: impl Into<String>,
	) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			expires_at,
			refresh_token: TokenSecret::new(refresh_token),
		}
	}

	/// Creates a token that expires `lifetime` after `issued_at`.
	pub fn issued_at(
		access_token: impl Into<String>,
		issued_at: OffsetDateTime,
		lifetime: Duration,
		refresh_token: impl Into<String>,
	) -> Self {
		Self::new(access_token, issued_at + lifetime, refresh_token)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if self.expires_at > instant { TokenStatus::Valid } else { TokenStatus::Expired }
	}

	/// Returns `true` if the token is expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Expired)
	}

	/// Returns `true` if the token is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("access_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.field("refresh_token", &"<redacted>")
			.finish()
	}
}
