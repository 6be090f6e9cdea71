//! Strongly typed identifiers for accounts, characters, and the principals built from them.

// std
use std::ops::Deref;
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(u64);
		impl $name {
			/// Wraps a raw numeric identifier.
			pub const fn new(value: u64) -> Self {
				Self(value)
			}

			/// Returns the raw numeric identifier.
			pub const fn get(self) -> u64 {
				self.0
			}
		}
		impl Deref for $name {
			type Target = u64;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl From<u64> for $name {
			fn from(value: u64) -> Self {
				Self(value)
			}
		}
		impl From<$name> for u64 {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				Display::fmt(&self.0, f)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				if s.is_empty() {
					return Err(IdentifierError::Empty { kind: $kind });
				}

				s.parse::<u64>()
					.map(Self)
					.map_err(|_| IdentifierError::NotNumeric { kind: $kind, value: s.to_owned() })
			}
		}
	};
}

/// Error returned when identifier parsing fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (account, character).
		kind: &'static str,
	},
	/// The identifier is not an unsigned integer.
	#[error("{kind} identifier `{value}` is not numeric.")]
	NotNumeric {
		/// Kind of identifier (account, character).
		kind: &'static str,
		/// Rejected input.
		value: String,
	},
}

def_id! { AccountId, "Identifier of a local account that owns one or more characters.", "Account" }
def_id! { CharacterId, "Identifier of a character as issued by the provider.", "Character" }

/// Opaque identity used as the cache and refresh key.
///
/// Two principals that share an account are still distinct when their characters differ.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Principal {
	/// Owning account.
	pub account: AccountId,
	/// Character within the account.
	pub character: CharacterId,
}
impl Principal {
	/// Builds a principal from its account and character components.
	pub const fn new(account: AccountId, character: CharacterId) -> Self {
		Self { account, character }
	}
}
impl Debug for Principal {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Principal({}/{})", self.account, self.character)
	}
}
impl Display for Principal {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "account={} character={}", self.account, self.character)
	}
}

/// Character identity as announced by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Character {
	/// Provider-issued character identifier.
	pub id: CharacterId,
	/// Display name, forwarded in the `X-Character` header.
	pub name: String,
}
impl Character {
	/// Creates a character descriptor.
	pub fn new(id: CharacterId, name: impl Into<String>) -> Self {
		Self { id, name: name.into() }
	}
}
