//! Sliding-TTL cache of store-backed sessions with single-flight loads.

// std
use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Duration as StdDuration,
};
// crates.io
use tokio::{runtime::Handle, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	auth::Principal,
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	session::StoreSession,
	store::{CredentialStore, StoredCredentials},
};

/// Default sliding window for cached sessions.
pub const DEFAULT_SESSION_TTL: StdDuration = StdDuration::from_secs(300);

/// Process-local cache of [`StoreSession`]s keyed by [`Principal`].
///
/// Concurrent misses for the same key perform exactly one backing-store load. Each access
/// pushes the key's expiry out by the configured TTL; when the window passes without an
/// access, the entry and its timer are removed together. Updates and evictions that land
/// while a load is running make that load re-read the store instead of caching what it read
/// before the change. Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct SessionCache(Arc<CacheInner>);
impl SessionCache {
	/// Creates an empty cache over `store` with the given sliding TTL.
	pub fn new(store: Arc<dyn CredentialStore>, ttl: StdDuration) -> Self {
		Self(Arc::new(CacheInner {
			store,
			ttl,
			entries: Mutex::new(HashMap::new()),
			load_slots: Mutex::new(HashMap::new()),
		}))
	}

	/// Backing store the cache loads from.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.0.store
	}

	/// Sliding expiry window.
	pub fn ttl(&self) -> StdDuration {
		self.0.ttl
	}

	/// Returns the session for `principal`, loading it on a miss.
	///
	/// The load runs in a background task holding the key's lock, so a caller that stops
	/// waiting does not abort a load other callers are queued behind.
	pub async fn get(&self, principal: &Principal) -> Result<Arc<StoreSession>> {
		if let Some(session) = self.touch(principal) {
			return Ok(session);
		}

		let cache = self.clone();
		let principal = principal.clone();
		let slot = self.load_slot(&principal);

		tokio::spawn(async move {
			let guard = slot.lock.lock().await;
			let result = cache.load_locked(&principal, &slot).await;

			drop(guard);
			drop(slot);
			cache.prune_load_slot(&principal);

			result
		})
		.await?
	}

	/// Applies credentials written to the store by someone else.
	///
	/// A cached session is updated in place and its expiry pushed out. For keys that are not
	/// cached only a running load is told to re-read the store. Returns whether an entry was
	/// updated.
	pub fn credentials_updated(&self, principal: &Principal, credentials: StoredCredentials) -> bool {
		let mut entries = self.0.entries.lock();
		let Some(entry) = entries.get_mut(principal) else {
			self.invalidate_load(principal);

			return false;
		};

		entry.session.install(credentials);
		self.arm_timer(principal, entry);

		tracing::debug!(%principal, "cached session updated in place");

		true
	}

	/// Removes `principal` from the cache and cancels its timer.
	///
	/// A load running for the same key re-reads the store before caching anything.
	pub fn evict(&self, principal: &Principal) -> Option<Arc<StoreSession>> {
		let entry = {
			let mut entries = self.0.entries.lock();

			self.invalidate_load(principal);

			entries.remove(principal)?
		};

		entry.cancel_timer();

		tracing::debug!(%principal, "cached session evicted");

		Some(entry.session)
	}

	/// Drops every entry and cancels every expiry timer.
	pub fn clear(&self) {
		let drained = {
			let mut entries = self.0.entries.lock();

			for slot in self.0.load_slots.lock().values() {
				slot.revision.fetch_add(1, Ordering::SeqCst);
			}

			std::mem::take(&mut *entries)
		};

		for entry in drained.into_values() {
			entry.cancel_timer();
		}
	}

	/// Returns `true` when `principal` is cached; does not extend its expiry.
	pub fn contains(&self, principal: &Principal) -> bool {
		self.0.entries.lock().contains_key(principal)
	}

	/// Number of cached sessions.
	pub fn len(&self) -> usize {
		self.0.entries.lock().len()
	}

	/// Returns `true` when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.0.entries.lock().is_empty()
	}

	async fn load_locked(
		&self,
		principal: &Principal,
		slot: &LoadSlot,
	) -> Result<Arc<StoreSession>> {
		// Whoever held the lock before us may have populated the entry.
		if let Some(session) = self.touch(principal) {
			return Ok(session);
		}

		let span = OperationSpan::new(OperationKind::SessionLoad, "load");

		obs::record_outcome(OperationKind::SessionLoad, OperationOutcome::Attempt);

		let result: Result<Arc<StoreSession>> = loop {
			let revision = slot.revision.load(Ordering::SeqCst);

			match span.instrument(self.0.store.load(principal)).await {
				Ok(Some(credentials)) => {
					if let Some(session) = self.insert(principal, credentials, slot, revision) {
						break Ok(session);
					}

					tracing::debug!(%principal, "credentials changed during load; reloading");
				},
				Ok(None) => break Err(Error::NoSuchPrincipal { principal: principal.clone() }),
				Err(e) => break Err(e.into()),
			}
		};

		obs::record_outcome(OperationKind::SessionLoad, OperationOutcome::of(&result));

		match &result {
			Ok(_) => tracing::debug!(%principal, "session loaded from store"),
			Err(e) => tracing::debug!(%principal, error = %e, "session load failed"),
		}

		result
	}

	/// Caches freshly loaded credentials unless `slot` moved past `revision` since the read.
	fn insert(
		&self,
		principal: &Principal,
		credentials: StoredCredentials,
		slot: &LoadSlot,
		revision: u64,
	) -> Option<Arc<StoreSession>> {
		let mut entries = self.0.entries.lock();

		// Revisions only move under the entries lock.
		if slot.revision.load(Ordering::SeqCst) != revision {
			return None;
		}

		let session = Arc::new(StoreSession::new(
			principal.clone(),
			credentials,
			self.0.store.clone(),
		));
		let entry = entries.entry(principal.clone()).or_insert_with(|| CacheEntry {
			session: session.clone(),
			timer: None,
			generation: 0,
		});

		self.arm_timer(principal, entry);

		Some(entry.session.clone())
	}

	/// Bumps the revision of a running load; callers hold the entries lock.
	fn invalidate_load(&self, principal: &Principal) {
		if let Some(slot) = self.0.load_slots.lock().get(principal) {
			slot.revision.fetch_add(1, Ordering::SeqCst);
		}
	}

	fn touch(&self, principal: &Principal) -> Option<Arc<StoreSession>> {
		let mut entries = self.0.entries.lock();
		let entry = entries.get_mut(principal)?;

		self.arm_timer(principal, entry);

		Some(entry.session.clone())
	}

	fn arm_timer(&self, principal: &Principal, entry: &mut CacheEntry) {
		entry.cancel_timer();
		entry.generation = entry.generation.wrapping_add(1);

		let Ok(runtime) = Handle::try_current() else {
			tracing::warn!(%principal, "no async runtime is available; session expiry was not armed");

			return;
		};
		let generation = entry.generation;
		let ttl = self.0.ttl;
		let inner = Arc::downgrade(&self.0);
		let principal = principal.clone();

		entry.timer = Some(runtime.spawn(async move {
			tokio::time::sleep(ttl).await;

			if let Some(inner) = inner.upgrade() {
				inner.expire(&principal, generation);
			}
		}));
	}

	fn load_slot(&self, principal: &Principal) -> Arc<LoadSlot> {
		self.0.load_slots.lock().entry(principal.clone()).or_default().clone()
	}

	fn prune_load_slot(&self, principal: &Principal) {
		let mut slots = self.0.load_slots.lock();

		if slots.get(principal).is_some_and(|slot| Arc::strong_count(slot) == 1) {
			slots.remove(principal);
		}
	}
}
impl Debug for SessionCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionCache")
			.field("ttl", &self.0.ttl)
			.field("entries", &self.len())
			.finish()
	}
}

struct CacheInner {
	store: Arc<dyn CredentialStore>,
	ttl: StdDuration,
	entries: Mutex<HashMap<Principal, CacheEntry>>,
	load_slots: Mutex<HashMap<Principal, Arc<LoadSlot>>>,
}
impl CacheInner {
	fn expire(&self, principal: &Principal, generation: u64) {
		let mut entries = self.entries.lock();

		if entries.get(principal).is_some_and(|entry| entry.generation == generation) {
			entries.remove(principal);

			tracing::debug!(%principal, "cached session expired");
		}
	}
}
impl Drop for CacheInner {
	fn drop(&mut self) {
		for entry in self.entries.get_mut().values_mut() {
			entry.cancel_timer();
		}
	}
}

/// Per-key load lock plus a revision bumped by updates and evictions.
#[derive(Default)]
struct LoadSlot {
	lock: AsyncMutex<()>,
	revision: AtomicU64,
}

struct CacheEntry {
	session: Arc<StoreSession>,
	timer: Option<JoinHandle<()>>,
	generation: u64,
}
impl CacheEntry {
	fn cancel_timer(&self) {
		if let Some(timer) = &self.timer {
			timer.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::{AccessToken, AccountId, Character, CharacterId},
		session::Session,
		store::{MemoryStore, StoreError, StoreFuture},
	};

	struct CountingStore {
		inner: MemoryStore,
		loads: AtomicUsize,
		latency: StdDuration,
	}
	impl CountingStore {
		fn new(inner: MemoryStore, latency: StdDuration) -> Arc<Self> {
			Arc::new(Self { inner, loads: AtomicUsize::new(0), latency })
		}

		fn loads(&self) -> usize {
			self.loads.load(Ordering::SeqCst)
		}
	}
	impl CredentialStore for CountingStore {
		fn load<'a>(
			&'a self,
			principal: &'a Principal,
		) -> StoreFuture<'a, Option<StoredCredentials>> {
			self.loads.fetch_add(1, Ordering::SeqCst);

			Box::pin(async move {
				tokio::time::sleep(self.latency).await;

				self.inner.load(principal).await
			})
		}

		fn persist<'a>(
			&'a self,
			principal: &'a Principal,
			token: Option<AccessToken>,
		) -> StoreFuture<'a, ()> {
			self.inner.persist(principal, token)
		}

		fn save<'a>(
			&'a self,
			principal: &'a Principal,
			credentials: StoredCredentials,
		) -> StoreFuture<'a, ()> {
			self.inner.save(principal, credentials)
		}

		fn delete<'a>(&'a self, principal: &'a Principal) -> StoreFuture<'a, bool> {
			self.inner.delete(principal)
		}
	}

	/// Reads the record up front, then stalls before handing it back.
	struct StaleReadStore {
		inner: MemoryStore,
		stall: StdDuration,
	}
	impl CredentialStore for StaleReadStore {
		fn load<'a>(
			&'a self,
			principal: &'a Principal,
		) -> StoreFuture<'a, Option<StoredCredentials>> {
			let snapshot = self.inner.get(principal);

			Box::pin(async move {
				tokio::time::sleep(self.stall).await;

				Ok(snapshot)
			})
		}

		fn persist<'a>(
			&'a self,
			principal: &'a Principal,
			token: Option<AccessToken>,
		) -> StoreFuture<'a, ()> {
			self.inner.persist(principal, token)
		}

		fn save<'a>(
			&'a self,
			principal: &'a Principal,
			credentials: StoredCredentials,
		) -> StoreFuture<'a, ()> {
			self.inner.save(principal, credentials)
		}

		fn delete<'a>(&'a self, principal: &'a Principal) -> StoreFuture<'a, bool> {
			self.inner.delete(principal)
		}
	}

	fn principal() -> Principal {
		Principal::new(AccountId::new(11), CharacterId::new(90_000_011))
	}

	fn spawn_get(cache: &SessionCache) -> JoinHandle<Result<Arc<StoreSession>>> {
		let cache = cache.clone();

		tokio::spawn(async move { cache.get(&principal()).await })
	}

	fn seeded_store() -> MemoryStore {
		let store = MemoryStore::default();

		store.insert(
			principal(),
			StoredCredentials::new(Character::new(CharacterId::new(90_000_011), "Cached"), None),
		);

		store
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_misses_load_once_and_share_the_session() {
		let store = CountingStore::new(seeded_store(), StdDuration::from_millis(50));
		let cache = SessionCache::new(store.clone(), DEFAULT_SESSION_TTL);
		let key = principal();
		let (a, b, c, d) =
			tokio::join!(cache.get(&key), cache.get(&key), cache.get(&key), cache.get(&key));
		let sessions = [a, b, c, d].map(|result| result.expect("Cached load should succeed."));

		assert_eq!(store.loads(), 1);
		assert!(sessions.iter().all(|session| Arc::ptr_eq(session, &sessions[0])));
		assert!(cache.0.load_slots.lock().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn hits_slide_the_expiry_window() {
		let store = CountingStore::new(seeded_store(), StdDuration::ZERO);
		let cache = SessionCache::new(store.clone(), DEFAULT_SESSION_TTL);
		let key = principal();
		let first = cache.get(&key).await.expect("First load should succeed.");

		tokio::time::sleep(StdDuration::from_secs(200)).await;

		let second = cache.get(&key).await.expect("Second access should hit.");

		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(store.loads(), 1);

		tokio::time::sleep(StdDuration::from_secs(250)).await;

		assert!(cache.contains(&key), "Second access should have reset the expiry.");

		tokio::time::sleep(StdDuration::from_secs(60)).await;

		assert!(!cache.contains(&key), "Entry should expire 300s after the last access.");

		cache.get(&key).await.expect("Expired entry should reload.");

		assert_eq!(store.loads(), 2);
	}

	#[tokio::test]
	async fn unknown_principal_is_reported_and_not_cached() {
		let cache = SessionCache::new(Arc::new(MemoryStore::default()), DEFAULT_SESSION_TTL);
		let err = cache.get(&principal()).await.expect_err("Unknown principal should fail.");

		assert!(matches!(err, Error::NoSuchPrincipal { .. }));
		assert!(cache.is_empty());
		assert!(cache.0.load_slots.lock().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn abandoned_waiter_does_not_cancel_the_load() {
		let store = CountingStore::new(seeded_store(), StdDuration::from_secs(1));
		let cache = SessionCache::new(store.clone(), DEFAULT_SESSION_TTL);
		let key = principal();
		let abandoned = {
			let cache = cache.clone();
			let key = key.clone();

			tokio::spawn(async move { cache.get(&key).await })
		};

		tokio::time::sleep(StdDuration::from_millis(10)).await;
		abandoned.abort();

		cache.get(&key).await.expect("Shielded load should complete for the next caller.");

		assert_eq!(store.loads(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn eviction_during_a_load_is_not_undone() {
		let store =
			Arc::new(StaleReadStore { inner: seeded_store(), stall: StdDuration::from_secs(1) });
		let cache = SessionCache::new(store.clone(), DEFAULT_SESSION_TTL);
		let key = principal();
		let loading = spawn_get(&cache);

		tokio::time::sleep(StdDuration::from_millis(10)).await;

		assert!(store.delete(&key).await.expect("Delete should succeed."));
		assert!(cache.evict(&key).is_none());

		let err = loading
			.await
			.expect("Load task should not panic.")
			.expect_err("A principal deleted mid-load should be unknown.");

		assert!(matches!(err, Error::NoSuchPrincipal { .. }));
		assert!(!cache.contains(&key));
		assert!(cache.0.load_slots.lock().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn credentials_saved_during_a_load_reach_the_cache() {
		let store =
			Arc::new(StaleReadStore { inner: seeded_store(), stall: StdDuration::from_secs(1) });
		let cache = SessionCache::new(store.clone(), DEFAULT_SESSION_TTL);
		let key = principal();
		let loading = spawn_get(&cache);

		tokio::time::sleep(StdDuration::from_millis(10)).await;

		let token = AccessToken::new("login", macros::datetime!(2030-01-01 00:00 UTC), "refresh");
		let credentials = StoredCredentials::new(
			Character::new(CharacterId::new(90_000_011), "Cached"),
			Some(token.clone()),
		);

		store.save(&key, credentials.clone()).await.expect("Save should succeed.");

		assert!(!cache.credentials_updated(&key, credentials));

		let session = loading
			.await
			.expect("Load task should not panic.")
			.expect("Reload should pick up the saved credentials.");

		assert_eq!(session.access_token(), Some(token.clone()));

		let cached = cache.get(&key).await.expect("Cached session should be served.");

		assert!(Arc::ptr_eq(&session, &cached));
		assert_eq!(cached.access_token(), Some(token));
	}

	#[tokio::test]
	async fn external_updates_mutate_the_cached_session_in_place() {
		let cache = SessionCache::new(Arc::new(seeded_store()), DEFAULT_SESSION_TTL);
		let key = principal();
		let session = cache.get(&key).await.expect("Load should succeed.");
		let token = AccessToken::new("new", macros::datetime!(2030-01-01 00:00 UTC), "refresh");
		let updated = cache.credentials_updated(
			&key,
			StoredCredentials::new(
				Character::new(CharacterId::new(90_000_011), "Renamed"),
				Some(token.clone()),
			),
		);

		assert!(updated);
		assert_eq!(session.access_token(), Some(token));
		assert_eq!(session.character().name, "Renamed");
		assert!(!cache.credentials_updated(
			&Principal::new(AccountId::new(99), CharacterId::new(99)),
			StoredCredentials::new(Character::new(CharacterId::new(99), "Nobody"), None),
		));
	}

	#[tokio::test]
	async fn evict_and_clear_drop_entries() {
		let cache = SessionCache::new(Arc::new(seeded_store()), DEFAULT_SESSION_TTL);
		let key = principal();

		cache.get(&key).await.expect("Load should succeed.");

		assert!(cache.evict(&key).is_some());
		assert!(cache.evict(&key).is_none());

		cache.get(&key).await.expect("Reload should succeed.");
		cache.clear();

		assert!(cache.is_empty());
	}

	#[tokio::test]
	async fn store_failures_propagate_unchanged() {
		struct BrokenStore;
		impl CredentialStore for BrokenStore {
			fn load<'a>(&'a self, _: &'a Principal) -> StoreFuture<'a, Option<StoredCredentials>> {
				Box::pin(async { Err(StoreError::Backend { message: "offline".into() }) })
			}

			fn persist<'a>(&'a self, _: &'a Principal, _: Option<AccessToken>) -> StoreFuture<'a, ()> {
				Box::pin(async { Ok(()) })
			}

			fn save<'a>(&'a self, _: &'a Principal, _: StoredCredentials) -> StoreFuture<'a, ()> {
				Box::pin(async { Ok(()) })
			}

			fn delete<'a>(&'a self, _: &'a Principal) -> StoreFuture<'a, bool> {
				Box::pin(async { Ok(false) })
			}
		}

		let cache = SessionCache::new(Arc::new(BrokenStore), DEFAULT_SESSION_TTL);
		let err = cache.get(&principal()).await.expect_err("Store failure should surface.");

		assert!(matches!(err, Error::Storage(StoreError::Backend { .. })));
	}
}
