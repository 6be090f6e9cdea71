//! Per-principal sessions and their sliding-TTL cache.
//!
//! A [`Session`] binds a [`Principal`] to its current [`AccessToken`]. Two variants exist:
//! [`StoreSession`], backed by a [`CredentialStore`](crate::store::CredentialStore) and
//! handed out by [`SessionCache`], and [`FileSession`], a single-principal JSON file used by
//! scripts and tools. Both are selected at construction; callers only see the trait.

pub mod cache;
pub mod file;
pub mod stored;

pub use cache::SessionCache;
pub use file::FileSession;
pub use stored::StoreSession;

// self
use crate::{
	auth::{AccessToken, Character, Principal},
	store::StoreFuture,
};

/// Capability interface over a principal's current credentials.
///
/// Tokens are immutable values: [`replace_access_token`](Self::replace_access_token)
/// installs a whole new value (or clears it) and persists the change.
pub trait Session
where
	Self: Send + Sync,
{
	/// Principal this session belongs to.
	fn principal(&self) -> &Principal;

	/// Character the principal acts as.
	fn character(&self) -> Character;

	/// Current token; `None` means the principal must log in.
	fn access_token(&self) -> Option<AccessToken>;

	/// Installs `token` and persists it; `None` de-authorizes the principal.
	///
	/// The in-memory value changes before the write is attempted, so a freshly rotated token
	/// stays usable even if persisting it fails.
	fn replace_access_token(&self, token: Option<AccessToken>) -> StoreFuture<'_, ()>;
}
