//! Market order models returned by the paged market helpers.

// self
use crate::_prelude::*;

/// Largest page the market endpoints return; a shorter page is the last one.
pub const MARKET_PAGE_SIZE: usize = 1000;

/// Side of the order book to list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
	/// Buy orders only.
	Buy,
	/// Sell orders only.
	Sell,
	/// Both sides.
	All,
}
impl OrderType {
	/// Query-string value understood by the API.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Buy => "buy",
			Self::Sell => "sell",
			Self::All => "all",
		}
	}
}
impl Display for OrderType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One order from a region or structure order book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
	/// Order identifier.
	pub order_id: u64,
	/// Item type traded.
	pub type_id: u64,
	/// Station or structure the order is listed in.
	pub location_id: u64,
	/// Solar system of the listing; absent for structure order books.
	#[serde(default)]
	pub system_id: Option<u64>,
	/// `true` for buy orders.
	pub is_buy_order: bool,
	/// Unit price in ISK.
	pub price: f64,
	/// Units still open.
	pub volume_remain: u64,
	/// Units at creation.
	pub volume_total: u64,
	/// Smallest fill accepted.
	#[serde(default = "default_min_volume")]
	pub min_volume: u64,
	/// Order duration in days.
	pub duration: u32,
	/// Creation instant.
	#[serde(with = "time::serde::rfc3339")]
	pub issued: OffsetDateTime,
	/// Trade range (`station`, `region`, `solarsystem`, or a jump count).
	pub range: String,
}

fn default_min_volume() -> u64 {
	1
}
