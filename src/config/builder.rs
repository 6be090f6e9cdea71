//! Builder and validation for [`ClientConfig`](crate::config::ClientConfig).

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::http::HeaderValue;
use url::Host;
// self
use crate::{
	_prelude::*,
	config::{
		ClientConfig, DEFAULT_API_BASE, DEFAULT_AUTHORIZATION_URL, DEFAULT_TOKEN_URL,
		DEFAULT_USER_AGENT,
	},
	executor::{BudgetFeedback, RetryPolicy},
	session::cache::DEFAULT_SESSION_TTL,
};

/// Errors raised while constructing or validating a [`ClientConfig`].
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ConfigBuildError {
	/// Client identifier is empty.
	#[error("Client identifier must not be empty.")]
	MissingClientId,
	/// A URL could not be parsed.
	#[error("The {field} URL is invalid: {value}.")]
	InvalidUrl {
		/// Which URL failed validation.
		field: &'static str,
		/// Raw value that failed to parse.
		value: String,
	},
	/// Endpoints must use HTTPS unless they target a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// API base must be a hierarchical URL ending in `/`.
	#[error("The API base must be a directory-style URL: {url}.")]
	InvalidApiBase {
		/// Offending URL.
		url: String,
	},
	/// `User-Agent` contains characters HTTP headers cannot carry.
	#[error("The user agent is not a valid header value.")]
	InvalidUserAgent,
	/// Sessions must stay cached for a non-zero window.
	#[error("Session TTL must be greater than zero.")]
	ZeroSessionTtl,
	/// Retry policy must allow at least one attempt.
	#[error("Retry policy must allow at least one attempt.")]
	NoAttempts,
	/// Jitter bounds are inverted.
	#[error("Retry jitter lower bound exceeds its upper bound.")]
	InvertedJitter,
}

/// Builder for [`ClientConfig`] values.
#[derive(Debug)]
pub struct ClientConfigBuilder {
	/// OAuth client identifier.
	pub client_id: String,
	/// Optional client secret.
	pub client_secret: Option<String>,
	/// API base override.
	pub api_base: Option<Url>,
	/// Token endpoint override.
	pub token_url: Option<Url>,
	/// Authorization endpoint override.
	pub authorization_url: Option<Url>,
	/// Registered redirect URI.
	pub redirect_uri: Option<Url>,
	/// `User-Agent` override.
	pub user_agent: Option<String>,
	/// Sliding cache window.
	pub session_ttl: StdDuration,
	/// Retry policy.
	pub retry: RetryPolicy,
	/// Error-budget margins.
	pub budget_feedback: BudgetFeedback,
}
impl ClientConfigBuilder {
	/// Creates a new builder for the provided client identifier.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			api_base: None,
			token_url: None,
			authorization_url: None,
			redirect_uri: None,
			user_agent: None,
			session_ttl: DEFAULT_SESSION_TTL,
			retry: RetryPolicy::default(),
			budget_feedback: BudgetFeedback::default(),
		}
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Overrides the API base URL.
	pub fn api_base(mut self, url: Url) -> Self {
		self.api_base = Some(url);

		self
	}

	/// Overrides the token endpoint.
	pub fn token_url(mut self, url: Url) -> Self {
		self.token_url = Some(url);

		self
	}

	/// Overrides the authorization endpoint.
	pub fn authorization_url(mut self, url: Url) -> Self {
		self.authorization_url = Some(url);

		self
	}

	/// Sets the registered redirect URI.
	pub fn redirect_uri(mut self, url: Url) -> Self {
		self.redirect_uri = Some(url);

		self
	}

	/// Overrides the `User-Agent` header.
	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = Some(user_agent.into());

		self
	}

	/// Overrides the sliding session window.
	pub fn session_ttl(mut self, ttl: StdDuration) -> Self {
		self.session_ttl = ttl;

		self
	}

	/// Overrides the retry policy.
	pub fn retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the error-budget margins.
	pub fn budget_feedback(mut self, feedback: BudgetFeedback) -> Self {
		self.budget_feedback = feedback;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigBuildError> {
		let mut api_base = or_default(self.api_base, "api_base", DEFAULT_API_BASE)?;

		if !api_base.path().ends_with('/') {
			let path = format!("{}/", api_base.path());

			api_base.set_path(&path);
		}

		let config = ClientConfig {
			client_id: self.client_id,
			client_secret: self.client_secret,
			api_base,
			token_url: or_default(self.token_url, "token", DEFAULT_TOKEN_URL)?,
			authorization_url: or_default(
				self.authorization_url,
				"authorization",
				DEFAULT_AUTHORIZATION_URL,
			)?,
			redirect_uri: self.redirect_uri,
			user_agent: self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
			session_ttl: self.session_ttl,
			retry: self.retry,
			budget_feedback: self.budget_feedback,
		};

		validate(&config)?;

		Ok(config)
	}
}

pub(super) fn validate(config: &ClientConfig) -> Result<(), ConfigBuildError> {
	if config.client_id.trim().is_empty() {
		return Err(ConfigBuildError::MissingClientId);
	}
	if config.api_base.cannot_be_a_base() || !config.api_base.path().ends_with('/') {
		return Err(ConfigBuildError::InvalidApiBase { url: config.api_base.to_string() });
	}

	validate_endpoint("api_base", &config.api_base)?;
	validate_endpoint("token", &config.token_url)?;
	validate_endpoint("authorization", &config.authorization_url)?;

	if HeaderValue::from_str(&config.user_agent).is_err() {
		return Err(ConfigBuildError::InvalidUserAgent);
	}
	if config.session_ttl.is_zero() {
		return Err(ConfigBuildError::ZeroSessionTtl);
	}
	if config.retry.max_attempts == 0 {
		return Err(ConfigBuildError::NoAttempts);
	}
	if config.retry.jitter_min > config.retry.jitter_max {
		return Err(ConfigBuildError::InvertedJitter);
	}

	Ok(())
}

fn or_default(
	value: Option<Url>,
	field: &'static str,
	default: &'static str,
) -> Result<Url, ConfigBuildError> {
	match value {
		Some(url) => Ok(url),
		None => Url::parse(default)
			.map_err(|_| ConfigBuildError::InvalidUrl { field, value: default.to_owned() }),
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ConfigBuildError> {
	if url.scheme() == "https" || (url.scheme() == "http" && is_loopback(url)) {
		Ok(())
	} else {
		Err(ConfigBuildError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(Host::Ipv4(ip)) => ip.is_loopback(),
		Some(Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	}
}
