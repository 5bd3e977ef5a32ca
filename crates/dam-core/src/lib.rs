//! Core of the digital asset market.
//!
//! Sellers list named, fixed-price assets; any buyer may purchase a listed
//! asset once by paying exactly its price; the market owner alone may read
//! asset details and withdraw the accumulated balance. The pieces:
//!
//! * [`logic`]: the purchase/withdrawal state machine, one type per logic
//!   version ([`MarketV1`], [`MarketV2`]).
//! * [`proxy`]: [`MarketProxy`], the stable-address front that owns storage,
//!   serializes calls and swaps logic versions in place.
//! * [`storage`]: persisted market fields and the append-only layout rules
//!   every logic version must respect.
//! * [`access`]: the single role check used by privileged operations.
//! * [`events`]: fire-and-forget lifecycle notifications.
//! * [`ledger`]: external account balances that payments move through.

pub mod access;
pub mod events;
pub mod ledger;
pub mod logic;
pub mod proxy;
pub mod storage;
pub mod types;

mod error;

pub use error::{MarketError, UnitsError};
pub use events::{EventBus, MarketEvent};
pub use ledger::{AccountLedger, LedgerError, Treasury};
pub use logic::{logic_for_version, MarketLogic, MarketV1, MarketV2};
pub use proxy::{MarketProxy, ProxyBuilder, ProxySnapshot};
pub use storage::MarketStorage;
pub use types::{
    format_units, parse_units, AccountId, Amount, Asset, AssetData, AssetStatus, UNIT_SCALE,
};
