//! Account ledger interface for stake and reward movements
//!
//! Accrual and distribution never touch balances directly; they move value
//! through an [`AccountLedger`]. A transfer either moves the full amount or
//! fails without effect.

use quota_types::{AccountId, Amount, QuotaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Interface for balance-transfer operations.
pub trait AccountLedger {
    /// Current balance of `account` (zero for unknown accounts).
    fn balance_of(&self, account: &AccountId) -> Amount;

    /// Move `amount` from `from` to `to`, all or nothing.
    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<()>;

    /// Total units held across all accounts.
    fn total_supply(&self) -> Amount;

    /// Settlement units backing `amount`. Ledgers that store balances in a
    /// different unit than they report (a rebasing token) override the four
    /// unit methods; every other ledger settles in the amounts it reports.
    fn to_units(&self, amount: Amount) -> Result<Amount> {
        Ok(amount)
    }

    /// Reported value of `units` settlement units.
    fn from_units(&self, units: Amount) -> Result<Amount> {
        Ok(units)
    }

    fn unit_balance_of(&self, account: &AccountId) -> Amount {
        self.balance_of(account)
    }

    /// Move `units` settlement units; the recipient gains exactly what the
    /// sender loses.
    fn transfer_units(&mut self, from: &AccountId, to: &AccountId, units: Amount) -> Result<()> {
        self.transfer(from, to, units)
    }
}

// -----------------------------------------------------------------------------
// In-memory implementation (stake token, tooling and tests)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryAccountLedger {
    balances: HashMap<AccountId, Amount>,
    total_supply: Amount,
}

impl InMemoryAccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint `amount` into `account`.
    pub fn credit(&mut self, account: &AccountId, amount: Amount) -> Result<()> {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| QuotaError::invalid_amount("balance overflow"))?;
        self.total_supply = self.total_supply.saturating_add(amount);
        Ok(())
    }

    /// Burn `amount` from `account`.
    pub fn debit(&mut self, account: &AccountId, amount: Amount) -> Result<()> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(QuotaError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        self.balances.insert(*account, available - amount);
        self.total_supply = self.total_supply.saturating_sub(amount);
        Ok(())
    }

    pub fn all_balances(&self) -> &HashMap<AccountId, Amount> {
        &self.balances
    }
}

impl AccountLedger for InMemoryAccountLedger {
    fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(QuotaError::invalid_amount("transfer amount is zero"));
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(QuotaError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        if from == to {
            return Ok(());
        }
        let received = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or_else(|| QuotaError::invalid_amount("balance overflow"))?;
        self.balances.insert(*from, available - amount);
        self.balances.insert(*to, received);
        Ok(())
    }

    fn total_supply(&self) -> Amount {
        self.total_supply
    }
}

// -----------------------------------------------------------------------------
// Mock ledger (call recording and failure injection)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct MockAccountLedger {
    inner: InMemoryAccountLedger,
    transfer_calls: Vec<(AccountId, AccountId, Amount)>,
    failing_recipients: HashSet<AccountId>,
}

impl MockAccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(account: AccountId, amount: Amount) -> Result<Self> {
        let mut mock = Self::new();
        mock.fund(&account, amount)?;
        Ok(mock)
    }

    pub fn fund(&mut self, account: &AccountId, amount: Amount) -> Result<()> {
        self.inner.credit(account, amount)
    }

    /// Make every transfer into `account` fail.
    pub fn fail_transfers_to(&mut self, account: AccountId) {
        self.failing_recipients.insert(account);
    }

    pub fn get_transfer_calls(&self) -> &[(AccountId, AccountId, Amount)] {
        &self.transfer_calls
    }

    pub fn clear_calls(&mut self) {
        self.transfer_calls.clear();
    }
}

impl AccountLedger for MockAccountLedger {
    fn balance_of(&self, account: &AccountId) -> Amount {
        self.inner.balance_of(account)
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<()> {
        self.transfer_calls.push((*from, *to, amount));
        if self.failing_recipients.contains(to) {
            return Err(QuotaError::InvalidAccount(format!(
                "{to} rejects incoming transfers"
            )));
        }
        self.inner.transfer(from, to, amount)
    }

    fn total_supply(&self) -> Amount {
        self.inner.total_supply()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use quota_types::ErrorKind;

    fn test_account_id(s: &str) -> AccountId {
        AccountId::from_label(s)
    }

    #[test]
    fn test_in_memory_ledger_creation() {
        let ledger = InMemoryAccountLedger::new();
        assert_eq!(ledger.total_supply(), 0);
    }

    #[test]
    fn test_in_memory_ledger_operations() {
        let mut ledger = InMemoryAccountLedger::new();
        let alice = test_account_id("alice");
        let bob = test_account_id("bob");

        ledger.credit(&alice, 1000).unwrap();
        ledger.transfer(&alice, &bob, 300).unwrap();
        assert_eq!(ledger.balance_of(&alice), 700);
        assert_eq!(ledger.balance_of(&bob), 300);
        assert_eq!(ledger.total_supply(), 1000);

        ledger.debit(&bob, 100).unwrap();
        assert_eq!(ledger.total_supply(), 900);
    }

    #[test]
    fn test_insufficient_balance() {
        let mut ledger = InMemoryAccountLedger::new();
        let alice = test_account_id("alice");
        ledger.credit(&alice, 1000).unwrap();

        let err = ledger
            .transfer(&alice, &test_account_id("bob"), 1500)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
        assert_eq!(ledger.balance_of(&alice), 1000);
    }

    #[test]
    fn test_zero_transfer_rejected() {
        let mut ledger = InMemoryAccountLedger::new();
        let err = ledger
            .transfer(&test_account_id("a"), &test_account_id("b"), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
    }

    #[test]
    fn test_mock_ledger_calls_and_failures() {
        let alice = test_account_id("alice");
        let bob = test_account_id("bob");
        let mut mock = MockAccountLedger::with_balance(alice, 1000).unwrap();

        mock.transfer(&alice, &bob, 300).unwrap();
        mock.fail_transfers_to(bob);
        assert!(mock.transfer(&alice, &bob, 1).is_err());

        assert_eq!(mock.get_transfer_calls().len(), 2);
        assert_eq!(mock.get_transfer_calls()[0], (alice, bob, 300));
        assert_eq!(mock.balance_of(&alice), 700);
    }
}
