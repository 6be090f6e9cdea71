//! Client configuration: endpoints, credentials, and the tuning knobs of each layer.

pub mod builder;

pub use builder::{ClientConfigBuilder, ConfigBuildError};

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	executor::{BudgetFeedback, RetryPolicy},
};

/// Default resource API base URL.
pub const DEFAULT_API_BASE: &str = "https://esi.evetech.net/latest/";
/// Default token endpoint (single sign-on v2).
pub const DEFAULT_TOKEN_URL: &str = "https://login.eveonline.com/v2/oauth/token";
/// Default authorization endpoint (single sign-on v2).
pub const DEFAULT_AUTHORIZATION_URL: &str = "https://login.eveonline.com/v2/oauth/authorize";
/// Default `User-Agent` sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("esi-broker/", env!("CARGO_PKG_VERSION"));

/// Validated configuration shared by every layer of the client.
///
/// Build values through [`ClientConfig::builder`]; deserialized values should be checked
/// with [`ClientConfig::validate`] before use.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret, sent with HTTP basic authentication.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret: Option<String>,
	/// Base URL every endpoint path is resolved against; always ends with `/`.
	pub api_base: Url,
	/// Token endpoint used for code exchanges and refreshes.
	pub token_url: Url,
	/// Authorization endpoint used to build login URLs.
	pub authorization_url: Url,
	/// Redirect URI registered for the application, if login URLs are built here.
	#[serde(default)]
	pub redirect_uri: Option<Url>,
	/// `User-Agent` header value.
	pub user_agent: String,
	/// Sliding expiry window of cached sessions.
	pub session_ttl: StdDuration,
	/// Retry budget for resource calls and token exchanges.
	pub retry: RetryPolicy,
	/// Margins applied to the provider's error-budget announcements.
	pub budget_feedback: BudgetFeedback,
}
impl ClientConfig {
	/// Starts a builder seeded with the provider defaults.
	pub fn builder(client_id: impl Into<String>) -> ClientConfigBuilder {
		ClientConfigBuilder::new(client_id)
	}

	/// Checks the invariants the builder enforces.
	pub fn validate(&self) -> Result<(), ConfigBuildError> {
		builder::validate(self)
	}
}
impl Debug for ClientConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("api_base", &self.api_base.as_str())
			.field("token_url", &self.token_url.as_str())
			.field("authorization_url", &self.authorization_url.as_str())
			.field("redirect_uri", &self.redirect_uri.as_ref().map(Url::as_str))
			.field("user_agent", &self.user_agent)
			.field("session_ttl", &self.session_ttl)
			.field("retry", &self.retry)
			.field("budget_feedback", &self.budget_feedback)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn defaults_target_the_public_provider() {
		let config = ClientConfig::builder("client-id")
			.client_secret("secret")
			.build()
			.expect("Default configuration should be valid.");

		assert_eq!(config.api_base.as_str(), DEFAULT_API_BASE);
		assert_eq!(config.token_url.as_str(), DEFAULT_TOKEN_URL);
		assert_eq!(config.session_ttl, StdDuration::from_secs(300));
		assert_eq!(config.retry.max_attempts, 3);
		assert_eq!(config.budget_feedback.reserve, 1);
	}

	#[test]
	fn debug_output_redacts_the_secret() {
		let config = ClientConfig::builder("client-id")
			.client_secret("super-secret")
			.build()
			.expect("Configuration should be valid.");

		assert!(!format!("{config:?}").contains("super-secret"));
	}

	#[test]
	fn serde_round_trip_keeps_validity() {
		let config = ClientConfig::builder("client-id")
			.build()
			.expect("Configuration should be valid.");
		let payload = serde_json::to_string(&config).expect("Configuration should serialize.");
		let parsed: ClientConfig =
			serde_json::from_str(&payload).expect("Configuration should deserialize.");

		assert!(parsed.validate().is_ok());
		assert_eq!(parsed.api_base, config.api_base);
	}
}
