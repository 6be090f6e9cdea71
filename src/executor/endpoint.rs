//! Endpoint catalog and URL resolution.

// self
use crate::{_prelude::*, auth::CharacterId, error::ConfigError};

/// How an endpoint authenticates and fills its path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointAuth {
	/// No credentials are sent.
	Public,
	/// Credential headers are sent; the path does not name the character.
	Authenticated,
	/// Credential headers are sent and the first path segment is the character id.
	Character,
}

/// Path template describing a single resource endpoint.
///
/// Each `{}` in [`path`](Self::path) is one positional argument. For
/// [`EndpointAuth::Character`] endpoints the first argument is filled with the principal's
/// character id and callers supply the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
	/// Stable name used in errors and logs.
	pub name: &'static str,
	/// Path template relative to the API base URL.
	pub path: &'static str,
	/// Authentication mode.
	pub auth: EndpointAuth,
	/// Whether query parameters may be supplied.
	pub accepts_params: bool,
}
impl Endpoint {
	/// Declares an unauthenticated endpoint.
	pub const fn public(name: &'static str, path: &'static str) -> Self {
		Self { name, path, auth: EndpointAuth::Public, accepts_params: false }
	}

	/// Declares an endpoint that sends credentials without naming the character in its path.
	pub const fn authenticated(name: &'static str, path: &'static str) -> Self {
		Self { name, path, auth: EndpointAuth::Authenticated, accepts_params: false }
	}

	/// Declares a character-scoped endpoint.
	pub const fn character(name: &'static str, path: &'static str) -> Self {
		Self { name, path, auth: EndpointAuth::Character, accepts_params: false }
	}

	/// Allows query parameters.
	pub const fn with_params(mut self) -> Self {
		self.accepts_params = true;

		self
	}

	/// Returns `true` when the endpoint sends credentials.
	pub fn requires_principal(&self) -> bool {
		!matches!(self.auth, EndpointAuth::Public)
	}

	/// Number of positional arguments the caller must supply.
	pub fn arity(&self) -> usize {
		let slots = self.path.matches("{}").count();

		match self.auth {
			EndpointAuth::Character => slots.saturating_sub(1),
			_ => slots,
		}
	}

	/// Builds the request URL for this endpoint.
	///
	/// Arity and parameter misuse is rejected before any request is made. `params` of
	/// `Some(&[])` still counts as supplying parameters.
	pub fn resolve(
		&self,
		base: &Url,
		character: Option<CharacterId>,
		args: &[u64],
		params: Option<&[(&str, &str)]>,
	) -> Result<Url> {
		if params.is_some() && !self.accepts_params {
			return Err(ConfigError::ParamsNotAccepted { endpoint: self.name }.into());
		}
		if args.len() != self.arity() {
			return Err(ConfigError::EndpointArity {
				endpoint: self.name,
				expected: self.arity(),
				given: args.len(),
			}
			.into());
		}

		let mut values = Vec::with_capacity(args.len() + 1);

		if matches!(self.auth, EndpointAuth::Character) {
			let character =
				character.ok_or(ConfigError::PrincipalRequired { endpoint: self.name })?;

			values.push(character.get());
		}

		values.extend_from_slice(args);

		let mut segments = self.path.split("{}");
		let mut path = String::with_capacity(self.path.len() + 16);

		path.push_str(segments.next().unwrap_or_default());

		for (segment, value) in segments.zip(values) {
			path.push_str(&value.to_string());
			path.push_str(segment);
		}

		let mut url = base
			.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidUrl { source })?;

		if let Some(params) = params.filter(|params| !params.is_empty()) {
			url.query_pairs_mut().extend_pairs(params.iter().copied());
		}

		Ok(url)
	}
}
impl Display for Endpoint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.name)
	}
}

/// Character skills.
pub const SKILLS: Endpoint = Endpoint::character("get_skills", "characters/{}/skills");
/// Character skill queue.
pub const SKILL_QUEUE: Endpoint = Endpoint::character("get_skill_queue", "characters/{}/skillqueue/");
/// Character wallet balance.
pub const WALLET_BALANCE: Endpoint =
	Endpoint::character("get_wallet_balance", "characters/{}/wallet");
/// Character wallet journal.
pub const WALLET_JOURNAL: Endpoint =
	Endpoint::character("get_wallet_journal", "characters/{}/wallet/journal/");
/// Character attributes.
pub const ATTRIBUTES: Endpoint = Endpoint::character("get_attributes", "characters/{}/attributes/");
/// Character implants.
pub const IMPLANTS: Endpoint = Endpoint::character("get_implants", "characters/{}/implants/");
/// Orders listed in a player structure; paged.
pub const STRUCTURE_MARKET: Endpoint =
	Endpoint::authenticated("get_structure_market", "markets/structures/{}").with_params();
/// Type information.
pub const TYPE_INFORMATION: Endpoint =
	Endpoint::public("get_type_information", "universe/types/{}");
/// Region information.
pub const REGION_INFORMATION: Endpoint =
	Endpoint::public("get_region_information", "universe/regions/{}");
/// Constellation information.
pub const CONSTELLATION_INFORMATION: Endpoint =
	Endpoint::public("get_constellation_information", "universe/constellations/{}");
/// Solar system information.
pub const SYSTEM_INFORMATION: Endpoint =
	Endpoint::public("get_system_information", "universe/systems/{}");
/// Item group information.
pub const ITEM_GROUP_INFORMATION: Endpoint =
	Endpoint::public("get_item_group_information", "universe/groups/{}");
/// Item category information.
pub const ITEM_CATEGORY_INFORMATION: Endpoint =
	Endpoint::public("get_item_category_information", "universe/categories/{}");
/// Orders in a region; paged and filtered by query parameters.
pub const REGION_ORDERS: Endpoint =
	Endpoint::public("get_region_orders", "markets/{}/orders/").with_params();
/// Market group information.
pub const MARKET_GROUP: Endpoint = Endpoint::public("get_market_group", "markets/groups/{}");
