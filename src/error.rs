//! Client-level error types shared across admission, execution, token, and session layers.

// crates.io
use tokio::task::JoinError;
// self
use crate::{_prelude::*, auth::Principal};

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical client error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration or call-site misuse.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retried internally before it surfaces.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Upstream failure that must not be retried.
	#[error(transparent)]
	Permanent(#[from] PermanentError),
	/// Transport failure that is not a disconnect (TLS, redirect policy, and similar).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// The principal has no usable token and must log in again.
	#[error("Principal {principal} must re-authorize.")]
	NeedsReauthorization {
		/// Principal whose credentials are absent or were rejected.
		principal: Principal,
	},
	/// The credential store has no record for the principal.
	#[error("No stored credentials exist for principal {principal}.")]
	NoSuchPrincipal {
		/// Principal that was looked up.
		principal: Principal,
	},
	/// Token endpoint rejected the grant with an OAuth error.
	#[error("Token endpoint rejected the grant: {code}.")]
	ProviderRejected {
		/// OAuth `error` code.
		code: String,
		/// OAuth `error_description`, when supplied.
		description: Option<String>,
	},
	/// A shared refresh failed for a reason other than a provider rejection.
	#[error("Shared token refresh failed.")]
	Refresh {
		/// Failure observed by every joiner of the refresh.
		#[source]
		source: Arc<Error>,
	},
	/// A shielded background task panicked or was aborted.
	#[error("Background task did not complete.")]
	Background(#[from] JoinError),
	/// A shared refresh stopped without publishing an outcome (runtime shutdown).
	#[error("Token refresh for principal {principal} was abandoned.")]
	RefreshAbandoned {
		/// Principal whose refresh was in flight.
		principal: Principal,
	},
}
impl Error {
	/// Returns `true` when the failure is safe to retry.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_))
	}

	/// Returns `true` when the caller should prompt the principal to log in again.
	pub fn needs_reauthorization(&self) -> bool {
		matches!(self, Self::NeedsReauthorization { .. })
	}

	/// Returns the upstream HTTP status attached to the failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Transient(TransientError::Status { status, .. })
			| Self::Permanent(PermanentError::Status { status, .. }) => Some(*status),
			Self::Permanent(PermanentError::Decode { status, .. }) => Some(*status),
			Self::Refresh { source } => source.status(),
			_ => None,
		}
	}

	/// Converts the outcome of a shared operation into an owned error.
	///
	/// Re-authorization failures keep their dedicated variant so every joiner can match on
	/// it; everything else is wrapped in [`Error::Refresh`].
	pub fn from_shared(shared: Arc<Error>) -> Self {
		match shared.as_ref() {
			Self::NeedsReauthorization { principal } =>
				Self::NeedsReauthorization { principal: principal.clone() },
			_ => Self::Refresh { source: shared },
		}
	}
}

/// Configuration and call-site validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Configuration values failed validation.
	#[error(transparent)]
	Invalid(#[from] crate::config::ConfigBuildError),
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A configured URL cannot be used.
	#[error("Configured URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Authorization URL was requested without a configured redirect URI.
	#[error("A redirect URI is required to build the authorization URL.")]
	MissingRedirectUri,
	/// Endpoint path received the wrong number of arguments.
	#[error("Endpoint `{endpoint}` takes {expected} path arguments but {given} were given.")]
	EndpointArity {
		/// Endpoint name.
		endpoint: &'static str,
		/// Expected argument count.
		expected: usize,
		/// Supplied argument count.
		given: usize,
	},
	/// Endpoint does not accept query parameters.
	#[error("Endpoint `{endpoint}` does not accept parameters.")]
	ParamsNotAccepted {
		/// Endpoint name.
		endpoint: &'static str,
	},
	/// Authenticated endpoint was called without a principal.
	#[error("Endpoint `{endpoint}` requires an authenticated principal.")]
	PrincipalRequired {
		/// Endpoint name.
		endpoint: &'static str,
	},
	/// Credential header value contains characters HTTP does not allow.
	#[error("Header `{name}` has an invalid value.")]
	InvalidHeader {
		/// Header name.
		name: &'static str,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Authorization-code exchange returned no refresh token.
	#[error("Token endpoint response is missing a refresh token.")]
	MissingRefreshToken,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Upstream answered with a gateway-class status (502, 503, 504).
	#[error("{url} returned transient status {status}.")]
	Status {
		/// Requested URL.
		url: String,
		/// HTTP status code.
		status: u16,
	},
	/// Connection dropped or timed out before a response was read.
	#[error("Connection to {url} was lost.")]
	Disconnected {
		/// Requested URL.
		url: String,
		/// Transport-specific failure.
		#[source]
		source: BoxError,
	},
	/// Token endpoint reported a temporary OAuth error.
	#[error("Token endpoint is temporarily unavailable: {code}.")]
	TokenEndpoint {
		/// OAuth `error` code.
		code: String,
	},
}
impl TransientError {
	/// Wraps a transport-specific disconnect.
	pub fn disconnected(
		url: impl Into<String>,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Disconnected { url: url.into(), source: Box::new(src) }
	}
}

/// Upstream failures that are surfaced immediately.
#[derive(Debug, ThisError)]
pub enum PermanentError {
	/// Upstream answered with a non-2xx status outside the transient set.
	#[error("{url} returned status {status}.")]
	Status {
		/// Requested URL.
		url: String,
		/// HTTP status code.
		status: u16,
		/// Parsed error body, when the upstream sent JSON.
		body: Option<serde_json::Value>,
	},
	/// Response body could not be decoded.
	#[error("{url} returned a body that could not be decoded.")]
	Decode {
		/// Requested URL.
		url: String,
		/// HTTP status code.
		status: u16,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}

/// Transport-level failures (network, IO) that are not retried.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a failure.
	#[error("Network error occurred while calling {url}.")]
	Network {
		/// Requested URL.
		url: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(
		url: impl Into<String>,
		src: impl 'static + Send + Sync + std::error::Error,
	) -> Self {
		Self::Network { url: url.into(), source: Box::new(src) }
	}
}
