//! Backing credential store contract and the in-memory implementation.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Character, Principal},
};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Stored state for one principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
	/// Character the principal acts as.
	pub character: Character,
	/// Current token; absent when the principal never authenticated or was de-authorized.
	pub token: Option<AccessToken>,
}
impl StoredCredentials {
	/// Bundles a character with its token.
	pub fn new(character: Character, token: Option<AccessToken>) -> Self {
		Self { character, token }
	}
}

/// Persistence contract for per-principal credentials.
///
/// Implementations own the schema and transport; the client only relies on these four
/// operations.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Loads the credentials recorded for `principal`, if any.
	fn load<'a>(&'a self, principal: &'a Principal) -> StoreFuture<'a, Option<StoredCredentials>>;

	/// Replaces the token recorded for an existing principal; `None` clears it.
	fn persist<'a>(
		&'a self,
		principal: &'a Principal,
		token: Option<AccessToken>,
	) -> StoreFuture<'a, ()>;

	/// Creates or overwrites the full record for `principal`.
	fn save<'a>(
		&'a self,
		principal: &'a Principal,
		credentials: StoredCredentials,
	) -> StoreFuture<'a, ()>;

	/// Deletes the record for `principal`, returning whether one existed.
	fn delete<'a>(&'a self, principal: &'a Principal) -> StoreFuture<'a, bool>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A token update targeted a principal the store has no record for.
	#[error("No record exists for {principal}.")]
	Missing {
		/// Principal that was targeted.
		principal: Principal,
	},
}
