//! Transport primitives shared by resource calls and token exchanges.
//!
//! The module exposes [`ApiHttpClient`], the crate's only dependency on an HTTP stack, plus
//! [`ResponseMetadata`], which captures the provider's response timestamp and error-budget
//! headers eagerly when a response is received. Transport failures are classified by a
//! [`TransportErrorMapper`] so disconnects can be retried while misconfiguration surfaces
//! immediately.

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::http::{HeaderMap, header::DATE};
pub use oauth2::{HttpRequest, HttpResponse};
use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")]
use crate::error::{ConfigError, TransientError, TransportError};

/// Header announcing how many errors the provider still tolerates in the current window.
pub const ERROR_LIMIT_REMAIN: &str = "x-esi-error-limit-remain";
/// Header announcing the seconds left until the error window resets.
pub const ERROR_LIMIT_RESET: &str = "x-esi-error-limit-reset";

/// Boxed future returned by [`ApiHttpClient::send`].
pub type HttpFuture<'a, E> = Pin<Box<dyn Future<Output = Result<HttpResponse, E>> + 'a + Send>>;

/// Abstraction over HTTP transports used for resource calls and token exchanges.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by the
/// executor, the token endpoint, and background refresh tasks. The returned future must own
/// whatever it needs so shielded background tasks can drive it to completion.
pub trait ApiHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Sends a fully built request and returns the raw response, whatever its status.
	fn send(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError>;
}

/// Maps transport failures into client [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts a transport error raised while calling `url`.
	///
	/// Disconnects must become [`Error::Transient`] so the executor retries them.
	fn map_transport_error(&self, url: &str, error: E) -> Error;
}

/// Error-budget announcement carried by a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorBudget {
	/// Errors the provider still tolerates in the current window.
	pub remaining: i64,
	/// Time until the provider resets the window.
	pub reset_after: StdDuration,
}

/// Reasons the budget headers could not be interpreted.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum HeaderError {
	/// Only one of the paired budget headers was present.
	#[error("Header `{name}` is missing.")]
	Missing {
		/// Missing header name.
		name: &'static str,
	},
	/// Header value is not valid for its type.
	#[error("Header `{name}` has an unparsable value `{value}`.")]
	Unparsable {
		/// Header name.
		name: &'static str,
		/// Raw value as received.
		value: String,
	},
}

/// Response facts parsed once, when the response is received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code.
	pub status: u16,
	/// Provider-side response timestamp (`Date` header).
	pub date: Option<OffsetDateTime>,
	/// Error-budget announcement, when both headers were present and valid.
	pub budget: Option<ErrorBudget>,
	/// Why the budget (or its timestamp) could not be used, if it could not.
	pub budget_error: Option<HeaderError>,
}
impl ResponseMetadata {
	/// Parses status, date, and budget headers from a raw response.
	pub fn from_response(response: &HttpResponse) -> Self {
		Self::from_parts(response.status().as_u16(), response.headers())
	}

	/// Parses metadata from a status code and header map.
	pub fn from_parts(status: u16, headers: &HeaderMap) -> Self {
		let date = parse_date(headers);
		let budget = parse_budget(headers);
		let (date, budget, budget_error) = match (date, budget) {
			(Ok(date), Ok(budget)) => (date, budget, None),
			// A bad date only matters when there is a budget to timestamp.
			(Err(_), Ok(None)) => (None, None, None),
			(Err(e), Ok(budget)) => (None, budget, Some(e)),
			(Ok(date), Err(e)) => (date, None, Some(e)),
			(Err(e), Err(_)) => (None, None, Some(e)),
		};

		Self { status, date, budget, budget_error }
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns the timestamped budget update this response announces, if it is usable.
	pub fn budget_update(&self) -> Result<Option<(OffsetDateTime, ErrorBudget)>, HeaderError> {
		if let Some(err) = &self.budget_error {
			return Err(err.clone());
		}

		match (self.date, self.budget) {
			(Some(date), Some(budget)) => Ok(Some((date, budget))),
			(None, Some(_)) => Err(HeaderError::Missing { name: "date" }),
			_ => Ok(None),
		}
	}
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, HeaderError> {
	let Some(value) = headers.get(name) else {
		return Ok(None);
	};

	value.to_str().map(|raw| Some(raw.trim())).map_err(|_| HeaderError::Unparsable {
		name,
		value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
	})
}

fn parse_date(headers: &HeaderMap) -> Result<Option<OffsetDateTime>, HeaderError> {
	let Some(raw) = header_str(headers, DATE.as_str())? else {
		return Ok(None);
	};

	OffsetDateTime::parse(raw, &Rfc2822)
		.map(Some)
		.map_err(|_| HeaderError::Unparsable { name: "date", value: raw.to_owned() })
}

fn parse_budget(headers: &HeaderMap) -> Result<Option<ErrorBudget>, HeaderError> {
	let remaining = header_str(headers, ERROR_LIMIT_REMAIN)?;
	let reset = header_str(headers, ERROR_LIMIT_RESET)?;
	let (remaining, reset) = match (remaining, reset) {
		(None, None) => return Ok(None),
		(Some(_), None) => return Err(HeaderError::Missing { name: ERROR_LIMIT_RESET }),
		(None, Some(_)) => return Err(HeaderError::Missing { name: ERROR_LIMIT_REMAIN }),
		(Some(remaining), Some(reset)) => (remaining, reset),
	};
	let remaining = remaining.parse::<i64>().map_err(|_| HeaderError::Unparsable {
		name: ERROR_LIMIT_REMAIN,
		value: remaining.to_owned(),
	})?;
	let reset_secs = reset.parse::<u64>().map_err(|_| HeaderError::Unparsable {
		name: ERROR_LIMIT_RESET,
		value: reset.to_owned(),
	})?;

	Ok(Some(ErrorBudget { remaining, reset_after: StdDuration::from_secs(reset_secs) }))
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Redirects are followed according to the wrapped client's policy; the token endpoint and
/// the resource API both answer directly, so the default client is sufficient.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl ApiHttpClient for ReqwestHttpClient {
	type TransportError = ReqwestError;

	fn send(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError> {
		let client = self.0.clone();

		Box::pin(async move {
			let response = client.execute(request.try_into()?).await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new = HttpResponse::new(response.bytes().await?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

/// Default mapper for reqwest-backed transports.
///
/// Connect failures, including TLS handshakes, timeouts, and interrupted bodies count as
/// disconnects and are retried; anything else reqwest reports is a permanent transport error.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(&self, url: &str, err: ReqwestError) -> Error {
		if err.is_builder() {
			return ConfigError::from(err).into();
		}
		if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
			return TransientError::disconnected(url, err).into();
		}

		TransportError::network(url, err).into()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::http::HeaderValue;
	use time::macros;
	// self
	use super::*;

	fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
		let mut map = HeaderMap::new();

		for (name, value) in pairs {
			map.insert(*name, HeaderValue::from_static(value));
		}

		map
	}

	#[test]
	fn budget_headers_are_parsed_eagerly() {
		let meta = ResponseMetadata::from_parts(
			200,
			&headers(&[
				("date", "Wed, 01 Jan 2025 00:00:05 GMT"),
				(ERROR_LIMIT_REMAIN, "87"),
				(ERROR_LIMIT_RESET, "42"),
			]),
		);

		assert!(meta.is_success());
		assert_eq!(meta.date, Some(macros::datetime!(2025-01-01 00:00:05 UTC)));
		assert_eq!(
			meta.budget_update(),
			Ok(Some((
				macros::datetime!(2025-01-01 00:00:05 UTC),
				ErrorBudget { remaining: 87, reset_after: StdDuration::from_secs(42) },
			)))
		);
	}

	#[test]
	fn absent_budget_headers_are_not_an_error() {
		let meta = ResponseMetadata::from_parts(
			200,
			&headers(&[("date", "Wed, 01 Jan 2025 00:00:05 GMT")]),
		);

		assert_eq!(meta.budget_update(), Ok(None));
	}

	#[test]
	fn unparsable_or_partial_budget_headers_are_reported() {
		let garbled = ResponseMetadata::from_parts(
			200,
			&headers(&[
				("date", "Wed, 01 Jan 2025 00:00:05 GMT"),
				(ERROR_LIMIT_REMAIN, "lots"),
				(ERROR_LIMIT_RESET, "42"),
			]),
		);

		assert!(matches!(
			garbled.budget_update(),
			Err(HeaderError::Unparsable { name: ERROR_LIMIT_REMAIN, .. })
		));

		let partial = ResponseMetadata::from_parts(200, &headers(&[(ERROR_LIMIT_REMAIN, "10")]));

		assert_eq!(
			partial.budget_update(),
			Err(HeaderError::Missing { name: ERROR_LIMIT_RESET })
		);
	}

	#[test]
	fn garbled_date_without_budget_headers_is_ignored() {
		let meta = ResponseMetadata::from_parts(200, &headers(&[("date", "yesterday-ish")]));

		assert_eq!(meta.date, None);
		assert_eq!(meta.budget_error, None);
		assert_eq!(meta.budget_update(), Ok(None));

		let budgeted = ResponseMetadata::from_parts(
			200,
			&headers(&[
				("date", "yesterday-ish"),
				(ERROR_LIMIT_REMAIN, "10"),
				(ERROR_LIMIT_RESET, "5"),
			]),
		);

		assert!(matches!(
			budgeted.budget_update(),
			Err(HeaderError::Unparsable { name: "date", .. })
		));
	}

	#[test]
	fn budget_without_a_timestamp_cannot_be_applied() {
		let meta = ResponseMetadata::from_parts(
			200,
			&headers(&[(ERROR_LIMIT_REMAIN, "10"), (ERROR_LIMIT_RESET, "5")]),
		);

		assert_eq!(meta.budget_update(), Err(HeaderError::Missing { name: "date" }));
	}
}
