//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Principal},
	store::{CredentialStore, StoreError, StoreFuture, StoredCredentials},
};

type StoreMap = Arc<RwLock<HashMap<Principal, StoredCredentials>>>;

/// Storage backend that keeps records in-process; clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Inserts a record synchronously, replacing any previous one.
	pub fn insert(&self, principal: Principal, credentials: StoredCredentials) {
		self.0.write().insert(principal, credentials);
	}

	/// Returns a copy of the record for `principal`.
	pub fn get(&self, principal: &Principal) -> Option<StoredCredentials> {
		self.0.read().get(principal).cloned()
	}

	/// Number of stored principals.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no principal is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn persist_now(
		map: StoreMap,
		principal: &Principal,
		token: Option<AccessToken>,
	) -> Result<(), StoreError> {
		let mut guard = map.write();
		let record = guard
			.get_mut(principal)
			.ok_or_else(|| StoreError::Missing { principal: principal.clone() })?;

		record.token = token;

		Ok(())
	}
}
impl CredentialStore for MemoryStore {
	fn load<'a>(&'a self, principal: &'a Principal) -> StoreFuture<'a, Option<StoredCredentials>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(principal).cloned()) })
	}

	fn persist<'a>(
		&'a self,
		principal: &'a Principal,
		token: Option<AccessToken>,
	) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::persist_now(map, principal, token) })
	}

	fn save<'a>(
		&'a self,
		principal: &'a Principal,
		credentials: StoredCredentials,
	) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().insert(principal.clone(), credentials);

			Ok(())
		})
	}

	fn delete<'a>(&'a self, principal: &'a Principal) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().remove(principal).is_some()) })
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::auth::{AccountId, Character, CharacterId};

	fn principal() -> Principal {
		Principal::new(AccountId::new(1), CharacterId::new(90_000_001))
	}

	fn credentials() -> StoredCredentials {
		StoredCredentials::new(
			Character::new(CharacterId::new(90_000_001), "Ayla Kador"),
			Some(AccessToken::new("access", macros::datetime!(2025-01-01 00:20 UTC), "refresh")),
		)
	}

	#[tokio::test]
	async fn save_load_and_delete_round_trip() {
		let store = MemoryStore::default();

		store.save(&principal(), credentials()).await.expect("Save should succeed.");

		let loaded = store.load(&principal()).await.expect("Load should succeed.");

		assert_eq!(loaded, Some(credentials()));
		assert!(store.delete(&principal()).await.expect("Delete should succeed."));
		assert!(!store.delete(&principal()).await.expect("Second delete should succeed."));
		assert!(store.is_empty());
	}

	#[tokio::test]
	async fn persist_replaces_only_the_token() {
		let store = MemoryStore::default();

		store.insert(principal(), credentials());
		store.persist(&principal(), None).await.expect("Clearing the token should succeed.");

		let record = store.get(&principal()).expect("Record should still exist.");

		assert_eq!(record.token, None);
		assert_eq!(record.character.name, "Ayla Kador");
	}

	#[tokio::test]
	async fn persist_for_unknown_principal_is_reported() {
		let err = MemoryStore::default()
			.persist(&principal(), None)
			.await
			.expect_err("Persisting without a record should fail.");

		assert!(matches!(err, StoreError::Missing { .. }));
	}

	#[tokio::test]
	async fn clones_share_state() {
		let store = MemoryStore::default();
		let clone = store.clone();

		clone.insert(principal(), credentials());

		assert_eq!(store.len(), 1);
	}
}
