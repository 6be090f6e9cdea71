//! Client facade composing sessions, token verification, and request execution.
//!
//! An authenticated [`Client::call`] resolves the endpoint URL, loads the principal's
//! session through the [`SessionCache`], makes sure its token is usable through the
//! [`TokenLifecycleManager`], and hands the request to the [`RequestExecutor`]. Public
//! endpoints skip the first two steps.

pub mod market;

pub use market::{MARKET_PAGE_SIZE, MarketOrder, OrderType};

// std
use std::{collections::HashSet, time::Instant};
// crates.io
use oauth2::http::{
	HeaderName, HeaderValue,
	header::{ACCEPT, AUTHORIZATION, USER_AGENT},
};
// self
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};
use crate::{
	_prelude::*,
	admission::AdmissionController,
	auth::{AccessToken, Character, Principal},
	config::ClientConfig,
	error::ConfigError,
	executor::{
		ApiRequest, ApiResponse, Endpoint, RequestExecutor,
		endpoint::{REGION_ORDERS, STRUCTURE_MARKET},
	},
	http::{ApiHttpClient, TransportErrorMapper},
	oauth::{OAuthTokenEndpoint, TokenEndpoint},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	session::{Session, SessionCache},
	store::{CredentialStore, StoredCredentials},
	tokens::TokenLifecycleManager,
};

/// Header naming the character a request is made for.
pub const X_CHARACTER: HeaderName = HeaderName::from_static("x-character");

/// Budget-aware API client shared by every request handler of a process.
pub struct Client<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	config: ClientConfig,
	user_agent: HeaderValue,
	executor: RequestExecutor<C, M>,
	token_endpoint: Arc<OAuthTokenEndpoint<C, M>>,
	tokens: TokenLifecycleManager,
	sessions: SessionCache,
	// Structures whose market answered 403; never asked again by this process.
	forbidden_structures: Mutex<HashSet<u64>>,
}
impl<C, M> Client<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	/// Creates a client over a caller-provided transport and mapper pair.
	///
	/// Must be called inside a Tokio runtime; the admission controller and session cache
	/// schedule their timers on it.
	pub fn with_http_client(
		config: ClientConfig,
		store: Arc<dyn CredentialStore>,
		http_client: impl Into<Arc<C>>,
		transport_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		config.validate().map_err(ConfigError::from)?;

		let http_client = http_client.into();
		let transport_mapper = transport_mapper.into();
		let user_agent = HeaderValue::from_str(&config.user_agent)
			.map_err(|_| ConfigError::InvalidHeader { name: "user-agent" })?;
		let token_endpoint = Arc::new(OAuthTokenEndpoint::from_config(
			&config,
			http_client.clone(),
			transport_mapper.clone(),
		)?);
		let executor = RequestExecutor::new(
			http_client,
			transport_mapper,
			AdmissionController::new(),
			config.retry,
			config.budget_feedback,
		);
		let tokens = TokenLifecycleManager::new(token_endpoint.clone());
		let sessions = SessionCache::new(store, config.session_ttl);

		Ok(Self {
			config,
			user_agent,
			executor,
			token_endpoint,
			tokens,
			sessions,
			forbidden_structures: Mutex::new(HashSet::new()),
		})
	}

	/// Configuration the client was built from.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Request executor shared by every call.
	pub fn executor(&self) -> &RequestExecutor<C, M> {
		&self.executor
	}

	/// Admission controller gating every resource request.
	pub fn admission(&self) -> &AdmissionController {
		self.executor.admission()
	}

	/// Token lifecycle manager.
	pub fn tokens(&self) -> &TokenLifecycleManager {
		&self.tokens
	}

	/// Session cache.
	pub fn sessions(&self) -> &SessionCache {
		&self.sessions
	}

	/// Token endpoint used for refreshes and logins.
	pub fn token_endpoint(&self) -> &Arc<OAuthTokenEndpoint<C, M>> {
		&self.token_endpoint
	}

	/// Calls `endpoint` on behalf of `principal` and returns the parsed body.
	///
	/// Public endpoints are sent without credentials and ignore `principal`.
	pub async fn call(
		&self,
		endpoint: &Endpoint,
		principal: &Principal,
		args: &[u64],
		params: Option<&[(&str, &str)]>,
	) -> Result<ApiResponse> {
		let started = Instant::now();
		let result = if endpoint.requires_principal() {
			self.call_authenticated(endpoint, principal, args, params).await
		} else {
			self.send_public(endpoint, args, params).await
		};

		tracing::info!(
			endpoint = endpoint.name,
			%principal,
			elapsed_ms = started.elapsed().as_millis() as u64,
			success = result.is_ok(),
			"api call finished"
		);

		result
	}

	/// Calls an unauthenticated endpoint.
	pub async fn call_public(
		&self,
		endpoint: &Endpoint,
		args: &[u64],
		params: Option<&[(&str, &str)]>,
	) -> Result<ApiResponse> {
		if endpoint.requires_principal() {
			return Err(ConfigError::PrincipalRequired { endpoint: endpoint.name }.into());
		}

		let started = Instant::now();
		let result = self.send_public(endpoint, args, params).await;

		tracing::info!(
			endpoint = endpoint.name,
			elapsed_ms = started.elapsed().as_millis() as u64,
			success = result.is_ok(),
			"api call finished"
		);

		result
	}

	/// Lists a region's market orders, walking pages until a short page is returned.
	///
	/// Reading past the last page answers 404, which is treated as an empty page unless it
	/// happens on the first one.
	pub async fn market_orders(
		&self,
		region_id: u64,
		order_type: OrderType,
		type_id: Option<u64>,
	) -> Result<Vec<MarketOrder>> {
		let type_filter = type_id.map(|id| id.to_string());
		let mut orders = Vec::new();
		let mut page = 0_u32;

		loop {
			page += 1;

			let page_value = page.to_string();
			let mut params =
				vec![("order_type", order_type.as_str()), ("page", page_value.as_str())];

			if let Some(type_filter) = &type_filter {
				params.push(("type_id", type_filter.as_str()));
			}

			let batch = match self
				.call_public(&REGION_ORDERS, &[region_id], Some(params.as_slice()))
				.await
			{
				Ok(response) => response.decode::<Vec<MarketOrder>>()?,
				Err(e) if page > 1 && e.status() == Some(404) => Vec::new(),
				Err(e) => return Err(e),
			};
			let last = batch.len() < MARKET_PAGE_SIZE;

			orders.extend(batch);

			if last {
				tracing::info!(
					region_id,
					%order_type,
					type_id,
					pages = page,
					orders = orders.len(),
					"market orders fetched"
				);

				return Ok(orders);
			}
		}
	}

	/// Lists the orders of a player structure market visible to `principal`.
	///
	/// Structures that refuse access (403) yield no orders. The refusal is remembered for the
	/// lifetime of the client, so later calls for that structure return immediately without
	/// spending error budget.
	pub async fn structure_market_orders(
		&self,
		principal: &Principal,
		structure_id: u64,
	) -> Result<Vec<MarketOrder>> {
		if self.forbidden_structures.lock().contains(&structure_id) {
			tracing::debug!(structure_id, "structure market is known to be forbidden");

			return Ok(Vec::new());
		}

		let mut orders = Vec::new();
		let mut page = 0_u32;

		loop {
			page += 1;

			let page_value = page.to_string();
			let params = [("page", page_value.as_str())];
			let batch = match self
				.call(&STRUCTURE_MARKET, principal, &[structure_id], Some(params.as_slice()))
				.await
			{
				Ok(response) => response.decode::<Vec<MarketOrder>>()?,
				Err(e) if e.status() == Some(403) => {
					self.forbidden_structures.lock().insert(structure_id);

					tracing::info!(structure_id, "structure market is forbidden");

					return Ok(Vec::new());
				},
				Err(e) => return Err(e),
			};
			let last = batch.len() < MARKET_PAGE_SIZE;

			orders.extend(batch);

			if last {
				tracing::info!(
					structure_id,
					pages = page,
					orders = orders.len(),
					"structure orders fetched"
				);

				return Ok(orders);
			}
		}
	}

	/// Builds the login URL for the configured redirect URI.
	pub fn authorization_url(&self, state: &str, scopes: &[&str]) -> Result<Url> {
		self.token_endpoint.authorization_url(state, scopes)
	}

	/// Exchanges a login code and records the resulting credentials for `principal`.
	///
	/// The record is written to the store and, when the principal is cached, the cached
	/// session is updated in place so subsequent calls use the new token immediately.
	pub async fn complete_authorization(
		&self,
		principal: &Principal,
		character: Character,
		code: &str,
	) -> Result<AccessToken> {
		const KIND: OperationKind = OperationKind::AuthorizationCode;

		let span = OperationSpan::new(KIND, "complete_authorization");

		obs::record_outcome(KIND, OperationOutcome::Attempt);

		let result: Result<AccessToken> = span
			.instrument(async {
				let grant = self.token_endpoint.exchange_code(code).await?;
				let token = grant.into_access_token(OffsetDateTime::now_utc(), None)?;
				let credentials = StoredCredentials::new(character, Some(token.clone()));

				self.sessions.store().save(principal, credentials.clone()).await?;

				if self.sessions.credentials_updated(principal, credentials) {
					tracing::debug!(%principal, "cached session updated after login");
				}

				Ok(token)
			})
			.await;

		obs::record_outcome(KIND, OperationOutcome::of(&result));

		result
	}

	/// Deletes the principal's stored credentials and drops its cached session.
	///
	/// Returns whether the store held a record.
	pub async fn forget(&self, principal: &Principal) -> Result<bool> {
		let existed = self.sessions.store().delete(principal).await?;

		self.sessions.evict(principal);

		tracing::debug!(%principal, existed, "principal forgotten");

		Ok(existed)
	}

	async fn call_authenticated(
		&self,
		endpoint: &Endpoint,
		principal: &Principal,
		args: &[u64],
		params: Option<&[(&str, &str)]>,
	) -> Result<ApiResponse> {
		let url = endpoint.resolve(&self.config.api_base, Some(principal.character), args, params)?;
		let session = self.sessions.get(principal).await?;

		self.tokens.verify(session.clone()).await?;

		// A concurrent rejection may have cleared the token after verification.
		let token = session
			.access_token()
			.ok_or_else(|| Error::NeedsReauthorization { principal: principal.clone() })?;
		let character = session.character();
		let mut authorization = HeaderValue::from_str(&token.access_token.bearer())
			.map_err(|_| ConfigError::InvalidHeader { name: "authorization" })?;

		authorization.set_sensitive(true);

		let character_name = HeaderValue::from_bytes(character.name.as_bytes())
			.map_err(|_| ConfigError::InvalidHeader { name: "x-character" })?;
		let request = self
			.base_request(url)
			.with_header(AUTHORIZATION, authorization)
			.with_header(X_CHARACTER, character_name);

		self.executor.execute(&request).await
	}

	async fn send_public(
		&self,
		endpoint: &Endpoint,
		args: &[u64],
		params: Option<&[(&str, &str)]>,
	) -> Result<ApiResponse> {
		let url = endpoint.resolve(&self.config.api_base, None, args, params)?;

		self.executor.execute(&self.base_request(url)).await
	}

	fn base_request(&self, url: Url) -> ApiRequest {
		ApiRequest::get(url)
			.with_header(USER_AGENT, self.user_agent.clone())
			.with_header(ACCEPT, HeaderValue::from_static("application/json"))
	}
}
#[cfg(feature = "reqwest")]
impl Client<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a client with its own reqwest-backed transport.
	pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
		Self::with_http_client(
			config,
			store,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for Client<C, M>
where
	C: ApiHttpClient,
	M: TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("config", &self.config)
			.field("admission", &self.executor.admission().snapshot())
			.field("sessions", &self.sessions.len())
			.field("tokens", &self.tokens)
			.finish()
	}
}
