//! Persistent market state and its field layout.
//!
//! The proxy owns one [`MarketStorage`] for its whole lifetime; logic
//! versions only borrow it. Each version declares the [`StorageLayout`] it
//! reads and writes, and a newer version may only append fields to the end
//! of the layout it replaces. Reordering, removing or retyping a slot would
//! reinterpret data written by an older version.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{AccountId, Amount, Asset};

/// Shape of a storage slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Account,
    Percent,
    AssetList,
    Amount,
    Counter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageField {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> StorageField {
    StorageField { name, kind }
}

pub const LAYOUT_V1: &[StorageField] = &[
    field("initialized", FieldKind::Bool),
    field("owner", FieldKind::Account),
    field("share_percent", FieldKind::Percent),
    field("assets", FieldKind::AssetList),
    field("balance", FieldKind::Amount),
];

pub const LAYOUT_V2: &[StorageField] = &[
    field("initialized", FieldKind::Bool),
    field("owner", FieldKind::Account),
    field("share_percent", FieldKind::Percent),
    field("assets", FieldKind::AssetList),
    field("balance", FieldKind::Amount),
    field("withdrawn_count", FieldKind::Counter),
];

/// Why a layout cannot replace another one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutConflict {
    Truncated { expected: usize, actual: usize },
    SlotChanged {
        slot: usize,
        expected: StorageField,
        actual: StorageField,
    },
}

impl fmt::Display for LayoutConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutConflict::Truncated { expected, actual } => write!(
                f,
                "layout declares {actual} slots, active layout has {expected}"
            ),
            LayoutConflict::SlotChanged {
                slot,
                expected,
                actual,
            } => write!(
                f,
                "slot {slot} is `{}: {:?}`, expected `{}: {:?}`",
                actual.name, actual.kind, expected.name, expected.kind
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageLayout(pub &'static [StorageField]);

impl StorageLayout {
    /// Check that `self` keeps every slot of `previous` in place and only
    /// appends new ones.
    pub fn check_extends(&self, previous: &StorageLayout) -> Result<(), LayoutConflict> {
        if self.0.len() < previous.0.len() {
            return Err(LayoutConflict::Truncated {
                expected: previous.0.len(),
                actual: self.0.len(),
            });
        }
        for (slot, (expected, actual)) in previous.0.iter().zip(self.0.iter()).enumerate() {
            if expected != actual {
                return Err(LayoutConflict::SlotChanged {
                    slot,
                    expected: *expected,
                    actual: *actual,
                });
            }
        }
        Ok(())
    }
}

/// State shared by every logic version. Field order mirrors [`LAYOUT_V2`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketStorage {
    pub initialized: bool,
    pub owner: Option<AccountId>,
    pub share_percent: u32,
    pub assets: Vec<Asset>,
    pub balance: Amount,
    #[serde(default)]
    pub withdrawn_count: u64,
}

impl MarketStorage {
    pub fn asset(&self, index: u64) -> Option<&Asset> {
        let i = usize::try_from(index).ok()?;
        self.assets.get(i)
    }

    pub fn asset_mut(&mut self, index: u64) -> Option<&mut Asset> {
        let i = usize::try_from(index).ok()?;
        self.assets.get_mut(i)
    }

    pub fn assets_count(&self) -> u64 {
        self.assets.len() as u64
    }

    /// Digest over every slot, in layout order.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"dam-storage");
        hasher.update([self.initialized as u8]);
        hash_opt_str(&mut hasher, self.owner.as_deref());
        hasher.update(self.share_percent.to_le_bytes());
        hasher.update((self.assets.len() as u64).to_le_bytes());
        for asset in &self.assets {
            hash_str(&mut hasher, &asset.seller);
            hash_str(&mut hasher, &asset.name);
            hasher.update(asset.price.to_le_bytes());
            hasher.update([asset.status.code()]);
            hash_opt_str(&mut hasher, asset.buyer.as_deref());
        }
        hasher.update(self.balance.to_le_bytes());
        hasher.update(self.withdrawn_count.to_le_bytes());
        hasher.finalize().into()
    }
}

fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn hash_opt_str(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            hash_str(hasher, v);
        }
        None => hasher.update([0u8]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetStatus;

    #[test]
    fn v2_layout_appends_to_v1() {
        StorageLayout(LAYOUT_V2)
            .check_extends(&StorageLayout(LAYOUT_V1))
            .unwrap();
        StorageLayout(LAYOUT_V1)
            .check_extends(&StorageLayout(LAYOUT_V1))
            .unwrap();
    }

    #[test]
    fn truncated_layout_is_rejected() {
        let err = StorageLayout(LAYOUT_V1)
            .check_extends(&StorageLayout(LAYOUT_V2))
            .unwrap_err();
        assert_eq!(
            err,
            LayoutConflict::Truncated {
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn reordered_or_retyped_slot_is_rejected() {
        const SWAPPED: &[StorageField] = &[
            field("initialized", FieldKind::Bool),
            field("share_percent", FieldKind::Percent),
            field("owner", FieldKind::Account),
            field("assets", FieldKind::AssetList),
            field("balance", FieldKind::Amount),
        ];
        const RETYPED: &[StorageField] = &[
            field("initialized", FieldKind::Bool),
            field("owner", FieldKind::Account),
            field("share_percent", FieldKind::Percent),
            field("assets", FieldKind::AssetList),
            field("balance", FieldKind::Counter),
        ];
        let err = StorageLayout(SWAPPED)
            .check_extends(&StorageLayout(LAYOUT_V1))
            .unwrap_err();
        assert!(matches!(err, LayoutConflict::SlotChanged { slot: 1, .. }));
        let err = StorageLayout(RETYPED)
            .check_extends(&StorageLayout(LAYOUT_V1))
            .unwrap_err();
        assert!(matches!(err, LayoutConflict::SlotChanged { slot: 4, .. }));
        assert!(err.to_string().contains("balance"));
    }

    #[test]
    fn storage_struct_follows_latest_layout() {
        let storage = MarketStorage {
            owner: Some("owner".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&storage).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        let mut expected: Vec<&str> = LAYOUT_V2.iter().map(|f| f.name).collect();
        expected.sort_unstable();
        let mut keys = keys;
        keys.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[test]
    fn storage_written_before_v2_still_loads() {
        let legacy = r#"{
            "initialized": true,
            "owner": "owner",
            "share_percent": 50,
            "assets": [
                {"seller": "s", "name": "Asset 1", "price": 5, "status": "sold", "buyer": "b"}
            ],
            "balance": 5
        }"#;
        let storage: MarketStorage = serde_json::from_str(legacy).unwrap();
        assert_eq!(storage.withdrawn_count, 0);
        assert_eq!(storage.assets[0].status, AssetStatus::Sold);
        assert_eq!(storage.asset(0).unwrap().buyer.as_deref(), Some("b"));
        assert!(storage.asset(1).is_none());
    }

    #[test]
    fn digest_tracks_every_field() {
        let mut storage = MarketStorage::default();
        let empty = storage.digest();
        storage.assets.push(Asset::listed("s".into(), "n".into(), 1));
        let listed = storage.digest();
        assert_ne!(empty, listed);
        storage.balance = 1;
        assert_ne!(listed, storage.digest());
    }
}
