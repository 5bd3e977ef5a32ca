use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::UnitsError;

pub type AccountId = String;
pub type Amount = u128;

pub const UNIT_SCALE: Amount = 1_000_000_000_000_000_000; // 1 unit = 1e18 minimal units
const UNIT_DECIMALS: usize = 18;

/// Lifecycle of a listed asset.
///
/// Discriminants are persisted; new states are only ever appended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AssetStatus {
    ForSale = 0,
    Sold = 1,
    /// Reclaimed by its seller (logic version 2 and later).
    Withdrawn = 2,
}

impl AssetStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub seller: AccountId,
    pub name: String,
    pub price: Amount,
    pub status: AssetStatus,
    pub buyer: Option<AccountId>,
}

impl Asset {
    pub fn listed(seller: AccountId, name: String, price: Amount) -> Self {
        Self {
            seller,
            name,
            price,
            status: AssetStatus::ForSale,
            buyer: None,
        }
    }
}

/// Read-only view returned by `asset_data`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetData {
    pub name: String,
    pub price: Amount,
    pub status: AssetStatus,
    pub buyer: Option<AccountId>,
}

impl From<&Asset> for AssetData {
    fn from(asset: &Asset) -> Self {
        Self {
            name: asset.name.clone(),
            price: asset.price,
            status: asset.status,
            buyer: asset.buyer.clone(),
        }
    }
}

/// Derive the stable identity of a market deployed by `admin`.
pub fn derive_market_address(admin: &AccountId, salt: u64) -> AccountId {
    let mut hasher = Sha256::new();
    hasher.update(b"dam-market");
    hasher.update((admin.len() as u64).to_le_bytes());
    hasher.update(admin.as_bytes());
    hasher.update(salt.to_le_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    format!("market-{}", hex::encode(&digest[..20]))
}

/// Parse a decimal amount such as `0.2` into minimal units.
pub fn parse_units(input: &str) -> Result<Amount, UnitsError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Empty);
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(UnitsError::InvalidDigit(input.to_string()));
    }
    if frac.len() > UNIT_DECIMALS {
        return Err(UnitsError::TooPrecise(input.to_string()));
    }
    let overflow = || UnitsError::Overflow(input.to_string());
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut frac_units: Amount = 0;
    if !frac.is_empty() {
        let padded = format!("{frac:0<width$}", width = UNIT_DECIMALS);
        frac_units = padded.parse().map_err(|_| overflow())?;
    }
    whole
        .checked_mul(UNIT_SCALE)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Render minimal units as a decimal string, trimming trailing zeros.
pub fn format_units(amount: Amount) -> String {
    let whole = amount / UNIT_SCALE;
    let frac = amount % UNIT_SCALE;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = UNIT_DECIMALS);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_units() {
        assert_eq!(parse_units("0.2").unwrap(), 200_000_000_000_000_000);
        assert_eq!(parse_units("1").unwrap(), UNIT_SCALE);
        assert_eq!(parse_units(".5").unwrap(), UNIT_SCALE / 2);
        assert_eq!(parse_units("0.000000000000000001").unwrap(), 1);
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(parse_units(""), Err(UnitsError::Empty));
        assert!(matches!(parse_units("1.2.3"), Err(UnitsError::InvalidDigit(_))));
        assert!(matches!(parse_units("-1"), Err(UnitsError::InvalidDigit(_))));
        assert!(matches!(
            parse_units("0.0000000000000000001"),
            Err(UnitsError::TooPrecise(_))
        ));
    }

    #[test]
    fn formats_units() {
        assert_eq!(format_units(200_000_000_000_000_000), "0.2");
        assert_eq!(format_units(3 * UNIT_SCALE), "3");
        assert_eq!(format_units(0), "0");
    }

    #[test]
    fn market_address_depends_on_admin_and_salt() {
        let admin = "owner".to_string();
        let a = derive_market_address(&admin, 0);
        assert_eq!(a, derive_market_address(&admin, 0));
        assert_ne!(a, derive_market_address(&admin, 1));
        assert_ne!(a, derive_market_address(&"other".to_string(), 0));
        assert!(a.starts_with("market-"));
    }
}
