//! Market logic versions.
//!
//! A logic version is stateless: every call receives the proxy's storage and
//! a [`CallContext`] describing who is calling and with what attached value.
//! Callers must serialize access to the storage (the proxy holds its lock
//! for the whole call), and each operation validates everything before
//! writing anything.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::access::{AccessControl, Action, Role};
use crate::error::MarketError;
use crate::events::{EventBus, MarketEvent};
use crate::ledger::Treasury;
use crate::storage::{MarketStorage, StorageLayout, LAYOUT_V1, LAYOUT_V2};
use crate::types::{AccountId, Amount, Asset, AssetData, AssetStatus};

pub struct CallContext<'a> {
    pub caller: &'a AccountId,
    /// Value attached to the call.
    pub value: Amount,
    /// Escrow account of the market receiving payments.
    pub market: &'a AccountId,
    pub treasury: &'a dyn Treasury,
    pub events: &'a EventBus,
}

pub trait MarketLogic: Send + Sync + fmt::Debug {
    fn version(&self) -> u32;

    fn layout(&self) -> StorageLayout;

    /// Names of the operations this version dispatches.
    fn operations(&self) -> &'static [&'static str];

    fn initialize(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        share_percent: u32,
    ) -> Result<(), MarketError>;

    fn add_asset(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        name: String,
        price: Amount,
    ) -> Result<u64, MarketError>;

    fn asset_data(
        &self,
        caller: &AccountId,
        storage: &MarketStorage,
        index: u64,
    ) -> Result<AssetData, MarketError>;

    fn buy(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        index: u64,
    ) -> Result<(), MarketError>;

    fn withdraw(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        amount: Amount,
    ) -> Result<(), MarketError>;

    fn withdraw_asset(
        &self,
        _ctx: &CallContext<'_>,
        _storage: &mut MarketStorage,
        _index: u64,
    ) -> Result<(), MarketError> {
        Err(MarketError::UnsupportedOperation("withdraw_asset"))
    }

    fn supports(&self, operation: &str) -> bool {
        self.operations().contains(&operation)
    }
}

const V1_OPERATIONS: &[&str] = &[
    "initialize",
    "add_asset",
    "asset_data",
    "buy",
    "withdraw",
    "assets_count",
    "share_percent",
];

const V2_OPERATIONS: &[&str] = &[
    "initialize",
    "add_asset",
    "asset_data",
    "buy",
    "withdraw",
    "withdraw_asset",
    "assets_count",
    "share_percent",
];

/// Resolve a persisted logic version number.
pub fn logic_for_version(
    version: u32,
    strict_share_percent: bool,
) -> Option<Arc<dyn MarketLogic>> {
    let base = MarketV1 {
        strict_share_percent,
    };
    match version {
        1 => Some(Arc::new(base)),
        2 => Some(Arc::new(MarketV2 { base })),
        _ => None,
    }
}

/// First market logic: listing, purchase, owner withdrawal.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarketV1 {
    /// Reject share percents above 100 instead of storing them verbatim.
    pub strict_share_percent: bool,
}

impl MarketV1 {
    pub fn strict() -> Self {
        Self {
            strict_share_percent: true,
        }
    }
}

impl MarketLogic for MarketV1 {
    fn version(&self) -> u32 {
        1
    }

    fn layout(&self) -> StorageLayout {
        StorageLayout(LAYOUT_V1)
    }

    fn operations(&self) -> &'static [&'static str] {
        V1_OPERATIONS
    }

    fn initialize(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        share_percent: u32,
    ) -> Result<(), MarketError> {
        if storage.initialized {
            warn!(caller = %ctx.caller, "re-initialization rejected");
            return Err(MarketError::AlreadyInitialized);
        }
        if self.strict_share_percent && share_percent > 100 {
            return Err(MarketError::InvalidSharePercent(share_percent));
        }
        *storage = MarketStorage {
            initialized: true,
            owner: Some(ctx.caller.clone()),
            share_percent,
            ..MarketStorage::default()
        };
        info!(owner = %ctx.caller, share_percent, "market initialized");
        Ok(())
    }

    fn add_asset(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        name: String,
        price: Amount,
    ) -> Result<u64, MarketError> {
        if !storage.initialized {
            return Err(MarketError::NotInitialized);
        }
        let index = storage.assets_count();
        storage
            .assets
            .push(Asset::listed(ctx.caller.clone(), name.clone(), price));
        info!(seller = %ctx.caller, index, price, "asset listed");
        ctx.events.publish(MarketEvent::NewAsset {
            seller: ctx.caller.clone(),
            name,
            index,
        });
        Ok(index)
    }

    fn asset_data(
        &self,
        caller: &AccountId,
        storage: &MarketStorage,
        index: u64,
    ) -> Result<AssetData, MarketError> {
        AccessControl::new(storage).require_role(
            caller,
            Role::MarketOwner,
            Action::ReadAssetData,
        )?;
        let asset = storage
            .asset(index)
            .ok_or(MarketError::InvalidReference { index })?;
        debug!(index, "asset data read");
        Ok(AssetData::from(asset))
    }

    fn buy(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        index: u64,
    ) -> Result<(), MarketError> {
        if !storage.initialized {
            return Err(MarketError::NotInitialized);
        }
        let asset = storage
            .asset(index)
            .ok_or(MarketError::InvalidReference { index })?;
        if ctx.value != asset.price {
            return Err(MarketError::ValueMismatch {
                expected: asset.price,
                actual: ctx.value,
            });
        }
        if asset.status != AssetStatus::ForSale {
            return Err(MarketError::NotForSale { index });
        }
        // Self-purchase is only reported; the sale goes through.
        if *ctx.caller == asset.seller {
            warn!(index, seller = %asset.seller, "seller is buying own asset");
        }
        if ctx.caller == ctx.market {
            return Err(MarketError::EscrowBuyer);
        }
        // The whole payment accrues to the operator balance.
        let balance = storage
            .balance
            .checked_add(ctx.value)
            .ok_or(MarketError::BalanceOverflow)?;

        ctx.treasury
            .transfer(ctx.caller, ctx.market, ctx.value)
            .map_err(MarketError::PaymentFailed)?;

        storage.balance = balance;
        if let Some(asset) = storage.asset_mut(index) {
            asset.status = AssetStatus::Sold;
            asset.buyer = Some(ctx.caller.clone());
        }
        info!(index, buyer = %ctx.caller, price = ctx.value, "asset sold");
        Ok(())
    }

    fn withdraw(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        amount: Amount,
    ) -> Result<(), MarketError> {
        AccessControl::new(storage).require_role(
            ctx.caller,
            Role::MarketOwner,
            Action::WithdrawFunds,
        )?;
        if amount > storage.balance {
            return Err(MarketError::InsufficientFunds {
                requested: amount,
                available: storage.balance,
            });
        }
        // Debit before paying out; the balance is restored if the transfer fails.
        storage.balance -= amount;
        if let Err(err) = ctx.treasury.transfer(ctx.market, ctx.caller, amount) {
            storage.balance += amount;
            warn!(owner = %ctx.caller, amount, error = %err, "withdrawal transfer failed");
            return Err(MarketError::TransferFailed(err));
        }
        info!(owner = %ctx.caller, amount, remaining = storage.balance, "funds withdrawn");
        Ok(())
    }
}

/// Second market logic: adds seller reclaim of unsold assets.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarketV2 {
    pub base: MarketV1,
}

impl MarketLogic for MarketV2 {
    fn version(&self) -> u32 {
        2
    }

    fn layout(&self) -> StorageLayout {
        StorageLayout(LAYOUT_V2)
    }

    fn operations(&self) -> &'static [&'static str] {
        V2_OPERATIONS
    }

    fn initialize(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        share_percent: u32,
    ) -> Result<(), MarketError> {
        self.base.initialize(ctx, storage, share_percent)
    }

    fn add_asset(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        name: String,
        price: Amount,
    ) -> Result<u64, MarketError> {
        self.base.add_asset(ctx, storage, name, price)
    }

    fn asset_data(
        &self,
        caller: &AccountId,
        storage: &MarketStorage,
        index: u64,
    ) -> Result<AssetData, MarketError> {
        self.base.asset_data(caller, storage, index)
    }

    fn buy(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        index: u64,
    ) -> Result<(), MarketError> {
        self.base.buy(ctx, storage, index)
    }

    fn withdraw(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        amount: Amount,
    ) -> Result<(), MarketError> {
        self.base.withdraw(ctx, storage, amount)
    }

    fn withdraw_asset(
        &self,
        ctx: &CallContext<'_>,
        storage: &mut MarketStorage,
        index: u64,
    ) -> Result<(), MarketError> {
        AccessControl::new(storage).require_role(
            ctx.caller,
            Role::AssetSeller { index },
            Action::ReclaimAsset,
        )?;
        let withdrawn_count = storage.withdrawn_count.saturating_add(1);
        let asset = storage
            .asset_mut(index)
            .ok_or(MarketError::InvalidReference { index })?;
        if asset.status != AssetStatus::ForSale {
            return Err(MarketError::NotForSale { index });
        }
        asset.status = AssetStatus::Withdrawn;
        storage.withdrawn_count = withdrawn_count;
        info!(index, seller = %ctx.caller, "asset withdrawn by seller");
        ctx.events.publish(MarketEvent::AssetWithdrawn {
            seller: ctx.caller.clone(),
            index,
        });
        Ok(())
    }
}
