//! Token endpoint contract and its `oauth2`-backed implementation.
//!
//! [`TokenEndpoint`] is what the token lifecycle manager talks to. [`OAuthTokenEndpoint`]
//! implements it with the `oauth2` crate's basic client, routed through the crate's own
//! [`ApiHttpClient`] transport so resource calls and token exchanges share one HTTP stack.
//! OAuth error responses become [`Error::ProviderRejected`] unless their code is one of
//! [`TRANSIENT_OAUTH_ERRORS`], in which case the exchange is retried.

pub use oauth2;

// crates.io
use oauth2::{
	AsyncHttpClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
	EndpointNotSet, EndpointSet, HttpClientError, RedirectUrl, RefreshToken, RequestTokenError,
	Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
	http::{HeaderValue, header::USER_AGENT},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenSecret},
	config::ClientConfig,
	error::{ConfigError, PermanentError, TransientError, TransportError},
	executor::{RETRYABLE_STATUSES, RetryPolicy},
	http::{ApiHttpClient, HttpRequest, HttpResponse, TransportErrorMapper},
	obs::{OperationKind, OperationSpan},
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Boxed future returned by [`TokenEndpoint`] operations.
pub type TokenFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// OAuth error codes that signal a temporary provider condition rather than a rejection.
pub const TRANSIENT_OAUTH_ERRORS: [&str; 2] = ["temporarily_unavailable", "server_error"];

/// Tokens minted by a successful exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
	/// New bearer token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime reported by the provider.
	pub lifetime: Duration,
}
impl TokenGrant {
	/// Builds the access token installed into a session.
	///
	/// The expiry is `issued_at + lifetime`. When the provider did not rotate the refresh
	/// token, `previous_refresh` is carried forward.
	pub fn into_access_token(
		self,
		issued_at: OffsetDateTime,
		previous_refresh: Option<&TokenSecret>,
	) -> Result<AccessToken> {
		let refresh_token = self
			.refresh_token
			.or_else(|| previous_refresh.cloned())
			.ok_or(ConfigError::MissingRefreshToken)?;

		Ok(AccessToken {
			access_token: self.access_token,
			expires_at: issued_at + self.lifetime,
			refresh_token,
		})
	}
}
impl Debug for TokenGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenGrant")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("lifetime", &self.lifetime)
			.finish()
	}
}

/// Remote token endpoint contract.
pub trait TokenEndpoint
where
	Self: 'static + Send + Sync,
{
	/// Exchanges a refresh token for a new grant.
	///
	/// Provider rejections surface as [`Error::ProviderRejected`].
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> TokenFuture<'a, TokenGrant>;

	/// Exchanges an authorization code obtained from a login redirect.
	fn exchange_code<'a>(&'a self, code: &'a str) -> TokenFuture<'a, TokenGrant>;
}

/// [`TokenEndpoint`] backed by the `oauth2` basic client.
///
/// Client credentials are sent with HTTP basic authentication. Transient failures are
/// retried with the configured [`RetryPolicy`]; the token host does not announce an error
/// budget, so exchanges bypass admission control.
pub struct OAuthTokenEndpoint<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	token_url: String,
	has_redirect: bool,
	user_agent: Option<HeaderValue>,
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	retry: RetryPolicy,
}
impl<C, M> OAuthTokenEndpoint<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Builds the endpoint from a validated configuration.
	pub fn from_config(
		config: &ClientConfig,
		http_client: impl Into<Arc<C>>,
		transport_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let auth_url = AuthUrl::new(config.authorization_url.to_string())
			.map_err(|source| ConfigError::InvalidUrl { source })?;
		let token_url = TokenUrl::new(config.token_url.to_string())
			.map_err(|source| ConfigError::InvalidUrl { source })?;
		let mut oauth_client = BasicClient::new(ClientId::new(config.client_id.clone()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url);

		if let Some(secret) = &config.client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.clone()));
		}
		if let Some(redirect) = &config.redirect_uri {
			let redirect_url = RedirectUrl::new(redirect.to_string())
				.map_err(|source| ConfigError::InvalidUrl { source })?;

			oauth_client = oauth_client.set_redirect_uri(redirect_url);
		}

		let user_agent = HeaderValue::from_str(&config.user_agent)
			.map_err(|_| ConfigError::InvalidHeader { name: "user-agent" })?;

		Ok(Self {
			oauth_client,
			token_url: config.token_url.to_string(),
			has_redirect: config.redirect_uri.is_some(),
			user_agent: Some(user_agent),
			http_client: http_client.into(),
			transport_mapper: transport_mapper.into(),
			retry: config.retry,
		})
	}

	/// Builds the login URL a user agent should be redirected to.
	pub fn authorization_url(&self, state: &str, scopes: &[&str]) -> Result<Url> {
		if !self.has_redirect {
			return Err(ConfigError::MissingRedirectUri.into());
		}

		let (url, _) = self
			.oauth_client
			.authorize_url(|| CsrfToken::new(state.to_owned()))
			.add_scopes(scopes.iter().map(|scope| Scope::new((*scope).to_owned())))
			.url();

		Ok(url)
	}

	fn adapter(&self) -> OAuthHttpAdapter<'_, C> {
		OAuthHttpAdapter {
			http_client: self.http_client.as_ref(),
			user_agent: self.user_agent.as_ref(),
			last_status: Mutex::new(None),
		}
	}

	async fn refresh_once(&self, refresh_token: &TokenSecret) -> Result<TokenGrant> {
		let adapter = self.adapter();
		let secret = RefreshToken::new(refresh_token.expose().to_owned());
		let response = self
			.oauth_client
			.exchange_refresh_token(&secret)
			.request_async(&adapter)
			.await
			.map_err(|e| self.map_request_error(*adapter.last_status.lock(), e))?;

		grant_from_response(&response)
	}

	async fn exchange_code_once(&self, code: &str) -> Result<TokenGrant> {
		let adapter = self.adapter();
		let response = self
			.oauth_client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.request_async(&adapter)
			.await
			.map_err(|e| self.map_request_error(*adapter.last_status.lock(), e))?;

		grant_from_response(&response)
	}

	fn map_request_error(
		&self,
		status: Option<u16>,
		err: BasicRequestTokenError<HttpClientError<C::TransportError>>,
	) -> Error {
		let url = self.token_url.as_str();

		match err {
			RequestTokenError::ServerResponse(response) => map_server_response(response),
			RequestTokenError::Request(HttpClientError::Reqwest(inner)) =>
				self.transport_mapper.map_transport_error(url, *inner),
			RequestTokenError::Request(HttpClientError::Http(inner)) =>
				ConfigError::from(inner).into(),
			RequestTokenError::Request(HttpClientError::Io(inner)) => TransportError::Io(inner).into(),
			RequestTokenError::Request(other) => TransportError::network(url, other).into(),
			RequestTokenError::Parse(source, _) => match status {
				Some(status) if RETRYABLE_STATUSES.contains(&status) =>
					TransientError::Status { url: url.to_owned(), status }.into(),
				status => PermanentError::Decode {
					url: url.to_owned(),
					status: status.unwrap_or_default(),
					source,
				}
				.into(),
			},
			RequestTokenError::Other(message) => match status {
				Some(status) if RETRYABLE_STATUSES.contains(&status) =>
					TransientError::Status { url: url.to_owned(), status }.into(),
				Some(status) =>
					PermanentError::Status { url: url.to_owned(), status, body: None }.into(),
				None => TransportError::network(url, std::io::Error::other(message)).into(),
			},
		}
	}
}
impl<C, M> TokenEndpoint for OAuthTokenEndpoint<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> TokenFuture<'a, TokenGrant> {
		let span = OperationSpan::new(OperationKind::Refresh, "token_endpoint");

		Box::pin(span.instrument(
			self.retry.run("token_endpoint", move |_| self.refresh_once(refresh_token)),
		))
	}

	fn exchange_code<'a>(&'a self, code: &'a str) -> TokenFuture<'a, TokenGrant> {
		let span = OperationSpan::new(OperationKind::AuthorizationCode, "token_endpoint");

		Box::pin(
			span.instrument(self.retry.run("token_endpoint", move |_| self.exchange_code_once(code))),
		)
	}
}
impl<C, M> Debug for OAuthTokenEndpoint<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthTokenEndpoint")
			.field("token_url", &self.token_url)
			.field("retry", &self.retry)
			.finish()
	}
}

/// Bridges [`ApiHttpClient`] into `oauth2`'s transport trait and remembers the last status.
struct OAuthHttpAdapter<'h, C>
where
	C: ApiHttpClient,
{
	http_client: &'h C,
	user_agent: Option<&'h HeaderValue>,
	last_status: Mutex<Option<u16>>,
}
impl<'c, 'h, C> AsyncHttpClient<'c> for OAuthHttpAdapter<'h, C>
where
	C: ApiHttpClient,
{
	type Error = HttpClientError<C::TransportError>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, mut request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			if let Some(user_agent) =
				self.user_agent.filter(|_| !request.headers().contains_key(USER_AGENT))
			{
				request.headers_mut().insert(USER_AGENT, user_agent.clone());
			}

			*self.last_status.lock() = None;

			let response = self.http_client.send(request).await.map_err(Box::new)?;

			*self.last_status.lock() = Some(response.status().as_u16());

			Ok(response)
		})
	}
}

fn map_server_response(response: BasicErrorResponse) -> Error {
	let code = response.error().as_ref().to_owned();

	if TRANSIENT_OAUTH_ERRORS.contains(&code.as_str()) {
		TransientError::TokenEndpoint { code }.into()
	} else {
		Error::ProviderRejected { code, description: response.error_description().cloned() }
	}
}

fn grant_from_response(response: &BasicTokenResponse) -> Result<TokenGrant> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	Ok(TokenGrant {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		refresh_token: response.refresh_token().map(|token| TokenSecret::new(token.secret().to_owned())),
		lifetime: Duration::seconds(expires_in),
	})
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	use time::macros;
	// self
	use super::*;

	fn token_response(value: serde_json::Value) -> BasicTokenResponse {
		serde_json::from_value(value).expect("Token response fixture should deserialize.")
	}

	fn error_response(value: serde_json::Value) -> BasicErrorResponse {
		serde_json::from_value(value).expect("Error response fixture should deserialize.")
	}

	#[test]
	fn grant_carries_lifetime_and_rotated_refresh_token() {
		let grant = grant_from_response(&token_response(json!({
			"access_token": "access-2",
			"token_type": "Bearer",
			"expires_in": 1199,
			"refresh_token": "refresh-2"
		})))
		.expect("Complete response should convert.");

		assert_eq!(grant.lifetime, Duration::seconds(1199));

		let token = grant
			.into_access_token(macros::datetime!(2025-01-01 00:00 UTC), None)
			.expect("Rotated refresh token should be used.");

		assert_eq!(token.expires_at, macros::datetime!(2025-01-01 00:19:59 UTC));
		assert_eq!(token.refresh_token.expose(), "refresh-2");
	}

	#[test]
	fn missing_refresh_token_falls_back_to_the_previous_one() {
		let grant = grant_from_response(&token_response(json!({
			"access_token": "access-2",
			"token_type": "Bearer",
			"expires_in": 60
		})))
		.expect("Response without refresh token should convert.");
		let previous = TokenSecret::new("refresh-1");
		let token = grant
			.clone()
			.into_access_token(OffsetDateTime::now_utc(), Some(&previous))
			.expect("Previous refresh token should carry forward.");

		assert_eq!(token.refresh_token, previous);
		assert!(matches!(
			grant.into_access_token(OffsetDateTime::now_utc(), None),
			Err(Error::Config(ConfigError::MissingRefreshToken))
		));
	}

	#[test]
	fn missing_or_zero_lifetime_is_rejected() {
		let missing = grant_from_response(&token_response(json!({
			"access_token": "a",
			"token_type": "Bearer"
		})));

		assert!(matches!(missing, Err(Error::Config(ConfigError::MissingExpiresIn))));

		let zero = grant_from_response(&token_response(json!({
			"access_token": "a",
			"token_type": "Bearer",
			"expires_in": 0
		})));

		assert!(matches!(zero, Err(Error::Config(ConfigError::NonPositiveExpiresIn))));
	}

	#[test]
	fn oauth_errors_split_into_rejections_and_transient_failures() {
		let rejected = map_server_response(error_response(json!({
			"error": "invalid_grant",
			"error_description": "Invalid refresh token. Token missing/expired."
		})));

		assert!(matches!(
			rejected,
			Error::ProviderRejected { ref code, description: Some(_) } if code == "invalid_grant"
		));

		let transient =
			map_server_response(error_response(json!({ "error": "temporarily_unavailable" })));

		assert!(transient.is_transient());
	}
}
