//! Account balances held outside the market.
//!
//! Buyers pay from, and the owner withdraws into, accounts kept in an
//! [`AccountLedger`]. The market itself only ever talks to the
//! [`Treasury`] trait so a different settlement backend can be plugged in.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{AccountId, Amount};

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}")]
    InsufficientAccountFunds { account: AccountId },
    #[error("unknown account {account}")]
    UnknownAccount { account: AccountId },
    #[error("account {account} rejects incoming transfers")]
    RecipientRejected { account: AccountId },
    #[error("balance of account {account} would overflow")]
    Overflow { account: AccountId },
    #[error("account {account} cannot transfer to itself")]
    SelfTransfer { account: AccountId },
}

/// Moves value between accounts on behalf of the market.
///
/// Implementations must either apply a transfer completely or leave every
/// balance untouched. They run while the market lock is held and must not
/// call back into the market.
pub trait Treasury: Send + Sync {
    fn transfer(&self, from: &AccountId, to: &AccountId, amount: Amount)
        -> Result<(), LedgerError>;

    fn balance_of(&self, account: &AccountId) -> Amount;
}

// Externally tagged: internally tagged enums cannot round-trip u128 fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Deposit {
        to: AccountId,
        amount: Amount,
        memo: Option<String>,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
}

impl LedgerEvent {
    pub fn involves(&self, account: &AccountId) -> bool {
        match self {
            LedgerEvent::Deposit { to, .. } => to == account,
            LedgerEvent::Transfer { from, to, .. } => from == account || to == account,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub accounts: BTreeMap<AccountId, Amount>,
    pub journal_len: usize,
    pub root: [u8; 32],
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountLedger {
    accounts: BTreeMap<AccountId, Amount>,
    #[serde(default)]
    journal: Vec<LedgerEvent>,
    #[serde(default)]
    rejecting: BTreeSet<AccountId>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &AccountId) -> Amount {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    pub fn journal(&self) -> &[LedgerEvent] {
        &self.journal
    }

    /// Mint funds into `account` from outside the system.
    pub fn deposit(
        &mut self,
        account: &AccountId,
        amount: Amount,
        memo: Option<String>,
    ) -> Result<(), LedgerError> {
        self.credit_account(account, amount)?;
        self.journal.push(LedgerEvent::Deposit {
            to: account.clone(),
            amount,
            memo,
        });
        Ok(())
    }

    /// Make `account` refuse every incoming transfer.
    pub fn reject_incoming(&mut self, account: &AccountId) {
        self.rejecting.insert(account.clone());
    }

    pub fn accept_incoming(&mut self, account: &AccountId) {
        self.rejecting.remove(account);
    }

    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if from == to {
            return Err(LedgerError::SelfTransfer {
                account: from.clone(),
            });
        }
        if self.rejecting.contains(to) {
            return Err(LedgerError::RecipientRejected {
                account: to.clone(),
            });
        }
        let available = *self
            .accounts
            .get(from)
            .ok_or_else(|| LedgerError::UnknownAccount {
                account: from.clone(),
            })?;
        if available < amount {
            return Err(LedgerError::InsufficientAccountFunds {
                account: from.clone(),
            });
        }
        if self.balance(to).checked_add(amount).is_none() {
            return Err(LedgerError::Overflow {
                account: to.clone(),
            });
        }
        self.debit_account(from, amount)?;
        self.credit_account(to, amount)?;
        self.journal.push(LedgerEvent::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        });
        Ok(())
    }

    fn credit_account(&mut self, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.accounts.entry(account.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow {
                account: account.clone(),
            })?;
        Ok(())
    }

    fn debit_account(&mut self, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let balance =
            self.accounts
                .get_mut(account)
                .ok_or_else(|| LedgerError::UnknownAccount {
                    account: account.clone(),
                })?;
        if *balance < amount {
            return Err(LedgerError::InsufficientAccountFunds {
                account: account.clone(),
            });
        }
        *balance -= amount;
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            accounts: self.accounts.clone(),
            journal_len: self.journal.len(),
            root: compute_merkle_root(&self.accounts),
        }
    }
}

impl Treasury for Mutex<AccountLedger> {
    fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.lock().transfer(from, to, amount)
    }

    fn balance_of(&self, account: &AccountId) -> Amount {
        self.lock().balance(account)
    }
}

fn compute_merkle_root(accounts: &BTreeMap<AccountId, Amount>) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = accounts
        .iter()
        .map(|(account, balance)| {
            let mut hasher = Sha256::new();
            hasher.update(b"acct");
            hasher.update((account.len() as u64).to_le_bytes());
            hasher.update(account.as_bytes());
            hasher.update(balance.to_le_bytes());
            hasher.finalize().into()
        })
        .collect();
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"dam-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
