//! Stable-address front for the market.
//!
//! A [`MarketProxy`] owns the storage and the escrow address and forwards
//! every call to the active [`MarketLogic`]. Upgrading swaps the logic and
//! nothing else. All state sits behind one lock: mutating calls hold the
//! write side for their full duration, including the treasury transfer, and
//! reads share the read side so they never observe a half-applied call.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::{AccessControl, Action, Role};
use crate::error::MarketError;
use crate::events::{EventBus, MarketEvent, DEFAULT_EVENT_CAPACITY};
use crate::ledger::Treasury;
use crate::logic::{CallContext, MarketLogic};
use crate::storage::MarketStorage;
use crate::types::{derive_market_address, AccountId, Amount, AssetData};

struct ProxyState {
    logic: Arc<dyn MarketLogic>,
    storage: MarketStorage,
}

pub struct MarketProxy {
    address: AccountId,
    admin: AccountId,
    state: RwLock<ProxyState>,
    treasury: Arc<dyn Treasury>,
    events: EventBus,
}

/// Everything needed to bring a proxy back after a restart.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxySnapshot {
    pub address: AccountId,
    pub admin: AccountId,
    pub logic_version: u32,
    pub storage: MarketStorage,
}

pub struct ProxyBuilder {
    admin: AccountId,
    salt: u64,
    event_capacity: usize,
    treasury: Arc<dyn Treasury>,
}

impl ProxyBuilder {
    pub fn new(admin: impl Into<AccountId>, treasury: Arc<dyn Treasury>) -> Self {
        Self {
            admin: admin.into(),
            salt: 0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            treasury,
        }
    }

    pub fn salt(mut self, salt: u64) -> Self {
        self.salt = salt;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Deploy a fresh market and run `initialize` as the admin.
    pub fn deploy(
        self,
        logic: Arc<dyn MarketLogic>,
        share_percent: u32,
    ) -> Result<MarketProxy, MarketError> {
        let address = derive_market_address(&self.admin, self.salt);
        let proxy = self.assemble(address, logic, MarketStorage::default());
        proxy.initialize(&proxy.admin.clone(), share_percent)?;
        info!(address = %proxy.address, admin = %proxy.admin, "market deployed");
        Ok(proxy)
    }

    /// Reattach persisted storage at its original address.
    pub fn restore(
        self,
        address: AccountId,
        logic: Arc<dyn MarketLogic>,
        storage: MarketStorage,
    ) -> MarketProxy {
        self.assemble(address, logic, storage)
    }

    fn assemble(
        self,
        address: AccountId,
        logic: Arc<dyn MarketLogic>,
        storage: MarketStorage,
    ) -> MarketProxy {
        MarketProxy {
            address,
            admin: self.admin,
            state: RwLock::new(ProxyState { logic, storage }),
            treasury: self.treasury,
            events: EventBus::new(self.event_capacity),
        }
    }
}

impl MarketProxy {
    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn admin(&self) -> &AccountId {
        &self.admin
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn version(&self) -> u32 {
        self.state.read().logic.version()
    }

    pub fn supports(&self, operation: &str) -> bool {
        self.state.read().logic.supports(operation)
    }

    pub fn share_percent(&self) -> u32 {
        self.state.read().storage.share_percent
    }

    pub fn assets_count(&self) -> u64 {
        self.state.read().storage.assets_count()
    }

    pub fn balance(&self) -> Amount {
        self.state.read().storage.balance
    }

    /// Funds actually held by the escrow account in the treasury.
    pub fn escrow_balance(&self) -> Amount {
        self.treasury.balance_of(&self.address)
    }

    pub fn owner(&self) -> Option<AccountId> {
        self.state.read().storage.owner.clone()
    }

    pub fn storage_digest(&self) -> [u8; 32] {
        self.state.read().storage.digest()
    }

    pub fn snapshot(&self) -> ProxySnapshot {
        let state = self.state.read();
        ProxySnapshot {
            address: self.address.clone(),
            admin: self.admin.clone(),
            logic_version: state.logic.version(),
            storage: state.storage.clone(),
        }
    }

    fn context<'a>(&'a self, caller: &'a AccountId, value: Amount) -> CallContext<'a> {
        CallContext {
            caller,
            value,
            market: &self.address,
            treasury: self.treasury.as_ref(),
            events: &self.events,
        }
    }

    fn dispatch<T>(
        &self,
        caller: &AccountId,
        value: Amount,
        op: impl FnOnce(
            &dyn MarketLogic,
            &CallContext<'_>,
            &mut MarketStorage,
        ) -> Result<T, MarketError>,
    ) -> Result<T, MarketError> {
        let mut state = self.state.write();
        let ProxyState { logic, storage } = &mut *state;
        op(&**logic, &self.context(caller, value), storage)
    }

    pub fn initialize(&self, caller: &AccountId, share_percent: u32) -> Result<(), MarketError> {
        self.dispatch(caller, 0, |logic, ctx, storage| {
            logic.initialize(ctx, storage, share_percent)
        })
    }

    /// List an asset and return its index; the same index is announced as
    /// a `NewAsset` event.
    pub fn add_asset(
        &self,
        caller: &AccountId,
        name: impl Into<String>,
        price: Amount,
    ) -> Result<u64, MarketError> {
        let name = name.into();
        self.dispatch(caller, 0, |logic, ctx, storage| {
            logic.add_asset(ctx, storage, name, price)
        })
    }

    pub fn asset_data(&self, caller: &AccountId, index: u64) -> Result<AssetData, MarketError> {
        let state = self.state.read();
        state.logic.asset_data(caller, &state.storage, index)
    }

    pub fn buy(&self, caller: &AccountId, index: u64, payment: Amount) -> Result<(), MarketError> {
        self.dispatch(caller, payment, |logic, ctx, storage| {
            logic.buy(ctx, storage, index)
        })
    }

    pub fn withdraw(&self, caller: &AccountId, amount: Amount) -> Result<(), MarketError> {
        self.dispatch(caller, 0, |logic, ctx, storage| {
            logic.withdraw(ctx, storage, amount)
        })
    }

    pub fn withdraw_asset(&self, caller: &AccountId, index: u64) -> Result<(), MarketError> {
        self.dispatch(caller, 0, |logic, ctx, storage| {
            logic.withdraw_asset(ctx, storage, index)
        })
    }

    /// Replace the active logic, keeping storage and address.
    ///
    /// When `init_share_percent` is given the new logic's `initialize` runs
    /// as part of the upgrade; if it fails the old logic stays active.
    pub fn upgrade(
        &self,
        caller: &AccountId,
        next: Arc<dyn MarketLogic>,
        init_share_percent: Option<u32>,
    ) -> Result<(), MarketError> {
        let mut state = self.state.write();
        AccessControl::new(&state.storage)
            .with_admin(&self.admin)
            .require_role(caller, Role::ProxyAdmin, Action::Upgrade)?;

        let current = state.logic.version();
        let proposed = next.version();
        if proposed <= current {
            warn!(current, proposed, "upgrade to non-newer logic rejected");
            return Err(MarketError::VersionMismatch { current, proposed });
        }
        next.layout()
            .check_extends(&state.logic.layout())
            .map_err(MarketError::IncompatibleLayout)?;

        if let Some(share_percent) = init_share_percent {
            let mut staged = state.storage.clone();
            next.initialize(&self.context(caller, 0), &mut staged, share_percent)?;
            state.storage = staged;
        }
        state.logic = next;
        info!(address = %self.address, from = current, to = proposed, "market logic upgraded");
        self.events.publish(MarketEvent::Upgraded { version: proposed });
        Ok(())
    }
}
