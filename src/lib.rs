//! Budget-aware ESI client layer: admission control driven by the provider's shared error
//! budget, retrying request execution, single-flight OAuth refresh, and sliding-TTL session
//! caching in one crate built for concurrent web backends.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod admission;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod session;
pub mod store;
pub mod tokens;
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers shared by unit and integration tests.

	pub use crate::_prelude::*;

	// std
	use std::time::Duration as StdDuration;
	// self
	use crate::{config::ClientConfig, executor::RetryPolicy};

	/// Retry policy with short, deterministic backoff for tests that talk to real sockets.
	pub const FAST_RETRY: RetryPolicy = RetryPolicy {
		max_attempts: 3,
		step: StdDuration::from_millis(10),
		jitter_min: StdDuration::ZERO,
		jitter_max: StdDuration::ZERO,
	};

	/// Builds a configuration pointing every endpoint at a local mock server.
	pub fn test_config(base_url: &str) -> ClientConfig {
		let url = |path: &str| {
			Url::parse(&format!("{base_url}{path}")).expect("Mock server URL should parse.")
		};

		ClientConfig::builder("test-client")
			.client_secret("test-secret")
			.api_base(url("/latest/"))
			.token_url(url("/v2/oauth/token"))
			.authorization_url(url("/v2/oauth/authorize"))
			.redirect_uri(url("/callback"))
			.user_agent("esi-broker-tests")
			.retry(FAST_RETRY)
			.build()
			.expect("Test configuration should be valid.")
	}

	#[cfg(feature = "reqwest")]
	pub use reqwest_helpers::*;

	#[cfg(feature = "reqwest")]
	mod reqwest_helpers {
		// self
		use crate::{
			_prelude::*,
			client::Client,
			config::ClientConfig,
			http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
			store::{CredentialStore, MemoryStore},
		};

		/// Client type alias used by reqwest-backed integration tests.
		pub type ReqwestTestClient = Client<ReqwestHttpClient, ReqwestTransportErrorMapper>;

		/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
		/// `httpmock` during tests.
		pub fn test_reqwest_http_client() -> ReqwestHttpClient {
			let client = ReqwestClient::builder()
				.danger_accept_invalid_certs(true)
				.danger_accept_invalid_hostnames(true)
				.build()
				.expect("Failed to build insecure Reqwest client for tests.");

			ReqwestHttpClient::with_client(client)
		}

		/// Constructs a [`Client`] backed by an in-memory credential store and the reqwest
		/// transport used across integration tests.
		pub fn build_reqwest_test_client(config: ClientConfig) -> (ReqwestTestClient, MemoryStore) {
			let store = MemoryStore::default();
			let shared: Arc<dyn CredentialStore> = Arc::new(store.clone());
			let client = Client::with_http_client(
				config,
				shared,
				test_reqwest_http_client(),
				ReqwestTransportErrorMapper,
			)
			.expect("Failed to build the reqwest-backed test client.");

			(client, store)
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::{Arc, Weak},
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
