//! Store-backed session variant.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Character, Principal},
	session::Session,
	store::{CredentialStore, StoreFuture, StoredCredentials},
};

/// Session whose credentials live in a [`CredentialStore`].
pub struct StoreSession {
	principal: Principal,
	credentials: RwLock<StoredCredentials>,
	store: Arc<dyn CredentialStore>,
}
impl StoreSession {
	/// Wraps credentials already loaded from `store`.
	pub fn new(
		principal: Principal,
		credentials: StoredCredentials,
		store: Arc<dyn CredentialStore>,
	) -> Self {
		Self { principal, credentials: RwLock::new(credentials), store }
	}

	/// Returns a copy of the full in-memory record.
	pub fn credentials(&self) -> StoredCredentials {
		self.credentials.read().clone()
	}

	/// Replaces the in-memory record without writing to the store.
	///
	/// Used when the store was already updated by someone else.
	pub(crate) fn install(&self, credentials: StoredCredentials) {
		*self.credentials.write() = credentials;
	}
}
impl Session for StoreSession {
	fn principal(&self) -> &Principal {
		&self.principal
	}

	fn character(&self) -> Character {
		self.credentials.read().character.clone()
	}

	fn access_token(&self) -> Option<AccessToken> {
		self.credentials.read().token.clone()
	}

	fn replace_access_token(&self, token: Option<AccessToken>) -> StoreFuture<'_, ()> {
		self.credentials.write().token = token.clone();

		self.store.persist(&self.principal, token)
	}
}
impl Debug for StoreSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StoreSession")
			.field("principal", &self.principal)
			.field("credentials", &*self.credentials.read())
			.finish()
	}
}
