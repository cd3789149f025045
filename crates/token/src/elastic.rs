//! Elastic-supply token ledger.
//!
//! Balances are held in base units and exposed in elastic units,
//! `balance = base * scaling_factor / SCALE`. A rebase only moves the
//! factor, so every holder's share of supply is unchanged by it.
//!
//! Non-whitelisted senders may move at most `limit_bps` of the balance they
//! held when their current 24h window opened. The cap and the amount used
//! are both valued at the current factor.

use crate::rebase::{RebaseController, RebaseDirection, RebaseOutcome, RebaseParams};
use quota_economics::{ReferralGraph, TierEngine, TRANSFER_WINDOW_SECS};
use quota_treasury::AccountLedger;
use quota_types::{
    apply_bps, checked_add, div_scaled, mul_scaled, AccountId, Amount, Bps, Governor, QuotaError,
    Result, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccount {
    pub base_balance: Amount,
    /// Exempt from transfer limits.
    pub whitelisted: bool,
    /// Start of the current transfer window; `None` before the first send.
    pub window_start: Option<Timestamp>,
    pub window_start_base: Amount,
    pub window_transferred_base: Amount,
}

/// Effect of a rebase on the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseReport {
    pub outcome: RebaseOutcome,
    pub supply_before: Amount,
    pub supply_after: Amount,
    /// Elastic amount minted to the expansion pool.
    pub expansion_minted: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticToken {
    governor: Governor,
    accounts: HashMap<AccountId, TokenAccount>,
    total_base: Amount,
    window_secs: u64,
    rebase: RebaseController,
}

impl ElasticToken {
    pub fn new(admin: AccountId, params: RebaseParams) -> Result<Self> {
        Ok(Self {
            governor: Governor::new(admin),
            accounts: HashMap::new(),
            total_base: 0,
            window_secs: TRANSFER_WINDOW_SECS,
            rebase: RebaseController::new(admin, params)?,
        })
    }

    pub fn with_window(mut self, window_secs: u64) -> Result<Self> {
        if window_secs == 0 {
            return Err(QuotaError::config("transfer window must be positive"));
        }
        self.window_secs = window_secs;
        Ok(self)
    }

    fn factor(&self) -> u128 {
        self.rebase.scaling_factor()
    }

    // -------------------------------------------------------------------------
    // Balances
    // -------------------------------------------------------------------------

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        let base = self.base_balance_of(account);
        // Total supply is checked to fit at every mint and rebase.
        mul_scaled(base, self.factor()).unwrap_or(Amount::MAX)
    }

    pub fn base_balance_of(&self, account: &AccountId) -> Amount {
        self.accounts
            .get(account)
            .map(|a| a.base_balance)
            .unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        mul_scaled(self.total_base, self.factor()).unwrap_or(Amount::MAX)
    }

    pub fn total_base(&self) -> Amount {
        self.total_base
    }

    /// Amount `account` may still send in its current window at `now`.
    pub fn remaining_allowance(
        &self,
        account: &AccountId,
        now: Timestamp,
        limit_bps: Bps,
    ) -> Result<Amount> {
        let state = self.accounts.get(account).cloned().unwrap_or_default();
        if state.whitelisted {
            return Ok(self.balance_of(account));
        }
        let state = self.rolled(state, now);
        let factor = self.factor();
        let cap = apply_bps(mul_scaled(state.window_start_base, factor)?, limit_bps)?;
        let used = mul_scaled(state.window_transferred_base, factor)?;
        Ok(cap.saturating_sub(used).min(self.balance_of(account)))
    }

    fn rolled(&self, mut state: TokenAccount, now: Timestamp) -> TokenAccount {
        let expired = match state.window_start {
            Some(start) => now >= start.saturating_add(self.window_secs),
            None => true,
        };
        if expired {
            state.window_start = Some(now);
            state.window_start_base = state.base_balance;
            state.window_transferred_base = 0;
        }
        state
    }

    // -------------------------------------------------------------------------
    // Transfers
    // -------------------------------------------------------------------------

    /// Move `amount` elastic units, enforcing the sender's window limit.
    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
        now: Timestamp,
        limit_bps: Bps,
    ) -> Result<()> {
        if amount == 0 {
            return Err(QuotaError::invalid_amount("transfer amount is zero"));
        }
        let available = self.balance_of(from);
        if amount > available {
            return Err(QuotaError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        let base = self.to_base(amount)?;
        if base == 0 {
            return Err(QuotaError::invalid_amount(format!(
                "{amount} is below one base unit"
            )));
        }
        self.transfer_base(from, to, base, now, limit_bps)
    }

    /// Move `base` base units. The recipient is credited exactly what the
    /// sender is debited; limits are checked in elastic units.
    pub fn transfer_base(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        base: Amount,
        now: Timestamp,
        limit_bps: Bps,
    ) -> Result<()> {
        if base == 0 {
            return Err(QuotaError::invalid_amount("transfer amount is zero"));
        }
        if to.is_root() {
            return Err(QuotaError::InvalidAccount(
                "cannot transfer to the root sentinel".into(),
            ));
        }
        let factor = self.factor();
        let amount = self.from_base(base)?;
        let mut sender = self.accounts.get(from).cloned().unwrap_or_default();
        if sender.base_balance < base {
            return Err(QuotaError::InsufficientBalance {
                requested: amount,
                available: self.balance_of(from),
            });
        }

        if !sender.whitelisted {
            sender = self.rolled(sender, now);
            let cap = apply_bps(mul_scaled(sender.window_start_base, factor)?, limit_bps)?;
            let used = mul_scaled(sender.window_transferred_base, factor)?;
            let transferred = checked_add(sender.window_transferred_base, base)?;
            if mul_scaled(transferred, factor)? > cap {
                return Err(QuotaError::TransferLimitExceeded {
                    requested: amount,
                    remaining: cap.saturating_sub(used),
                });
            }
            sender.window_transferred_base = transferred;
        }

        if from == to {
            self.accounts.insert(*from, sender);
            return Ok(());
        }

        sender.base_balance -= base;
        let receiver_base = checked_add(self.base_balance_of(to), base)?;
        self.accounts.insert(*from, sender);
        self.accounts.entry(*to).or_default().base_balance = receiver_base;

        debug!(target: "token", from = %from, to = %to, amount, base, "transfer");
        Ok(())
    }

    /// Base units backing `amount` elastic units (truncated).
    pub fn to_base(&self, amount: Amount) -> Result<Amount> {
        Ok(div_scaled(amount, self.factor())?)
    }

    /// Elastic value of `base` base units (truncated).
    pub fn from_base(&self, base: Amount) -> Result<Amount> {
        Ok(mul_scaled(base, self.factor())?)
    }

    /// View of the token as an [`AccountLedger`] whose per-sender limit is
    /// the sender's tier limit.
    pub fn session<'a>(
        &'a mut self,
        tiers: &'a TierEngine,
        graph: &'a ReferralGraph,
        now: Timestamp,
    ) -> TokenSession<'a> {
        TokenSession {
            token: self,
            tiers,
            graph,
            now,
        }
    }

    // -------------------------------------------------------------------------
    // Supply
    // -------------------------------------------------------------------------

    fn credit_base(&mut self, to: &AccountId, base: Amount) -> Result<()> {
        let total_base = checked_add(self.total_base, base)?;
        mul_scaled(total_base, self.factor())?;
        let balance = checked_add(self.base_balance_of(to), base)?;
        self.total_base = total_base;
        self.accounts.entry(*to).or_default().base_balance = balance;
        Ok(())
    }

    /// Mint `amount` elastic units to `to`.
    pub fn mint(&mut self, caller: &AccountId, to: &AccountId, amount: Amount) -> Result<()> {
        self.governor.ensure(caller, "mint")?;
        if amount == 0 {
            return Err(QuotaError::invalid_amount("mint amount is zero"));
        }
        if to.is_root() {
            return Err(QuotaError::InvalidAccount(
                "cannot mint to the root sentinel".into(),
            ));
        }
        let base = div_scaled(amount, self.factor())?;
        self.credit_base(to, base)?;
        info!(target: "token", to = %to, amount, "minted");
        Ok(())
    }

    /// Run a rebase epoch at `price`. On expansion, the configured share of
    /// the new supply is minted to `expansion_pool` when one is given.
    pub fn rebase(
        &mut self,
        price: Amount,
        now: Timestamp,
        expansion_pool: Option<AccountId>,
    ) -> Result<RebaseReport> {
        let supply_before = self.total_supply();
        let outcome = self.rebase.preview(price, now)?;
        let supply_after = mul_scaled(self.total_base, outcome.scaling_factor)?;

        let mut minted_base = 0;
        if let (RebaseDirection::Expansion, Some(_)) = (outcome.direction, expansion_pool) {
            let grown = supply_after.saturating_sub(supply_before);
            let share = apply_bps(grown, self.rebase.params().expansion_tax_bps)?;
            minted_base = div_scaled(share, outcome.scaling_factor)?;
            mul_scaled(checked_add(self.total_base, minted_base)?, outcome.scaling_factor)?;
        }

        self.rebase.commit(&outcome);
        let mut expansion_minted = 0;
        if let (Some(pool), true) = (expansion_pool, minted_base > 0) {
            self.credit_base(&pool, minted_base)?;
            expansion_minted = mul_scaled(minted_base, outcome.scaling_factor)?;
            info!(
                target: "token",
                epoch = outcome.epoch,
                pool = %pool,
                minted = expansion_minted,
                "expansion share minted"
            );
        }

        let supply_after = self.total_supply();
        Ok(RebaseReport {
            outcome,
            supply_before,
            supply_after,
            expansion_minted,
        })
    }

    // -------------------------------------------------------------------------
    // Governance
    // -------------------------------------------------------------------------

    pub fn whitelist(&mut self, caller: &AccountId, account: &AccountId, flag: bool) -> Result<()> {
        self.governor.ensure(caller, "change the transfer whitelist")?;
        if account.is_root() {
            return Err(QuotaError::InvalidAccount(
                "the root sentinel holds no balance".into(),
            ));
        }
        self.accounts.entry(*account).or_default().whitelisted = flag;
        info!(target: "token", account = %account, whitelisted = flag, "whitelist updated");
        Ok(())
    }

    pub fn set_rebase_params(&mut self, caller: &AccountId, params: RebaseParams) -> Result<()> {
        self.rebase.set_params(caller, params)
    }

    pub fn transfer_governance(&mut self, caller: &AccountId, new_admin: AccountId) -> Result<()> {
        self.governor.ensure(caller, "transfer governance")?;
        self.rebase.transfer_governance(caller, new_admin)?;
        self.governor.transfer(caller, new_admin)
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn account(&self, account: &AccountId) -> Option<&TokenAccount> {
        self.accounts.get(account)
    }

    pub fn is_whitelisted(&self, account: &AccountId) -> bool {
        self.accounts.get(account).is_some_and(|a| a.whitelisted)
    }

    pub fn holders(&self) -> impl Iterator<Item = (&AccountId, &TokenAccount)> {
        self.accounts.iter().filter(|(_, a)| a.base_balance > 0)
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn rebase_controller(&self) -> &RebaseController {
        &self.rebase
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }
}

// -----------------------------------------------------------------------------
// Ledger session
// -----------------------------------------------------------------------------

/// Token bound to tier limits and a timestamp for the length of one operation.
pub struct TokenSession<'a> {
    token: &'a mut ElasticToken,
    tiers: &'a TierEngine,
    graph: &'a ReferralGraph,
    now: Timestamp,
}

impl AccountLedger for TokenSession<'_> {
    fn balance_of(&self, account: &AccountId) -> Amount {
        self.token.balance_of(account)
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<()> {
        let limit = self.tiers.transfer_limit_of(self.graph, from);
        self.token.transfer(from, to, amount, self.now, limit)
    }

    fn total_supply(&self) -> Amount {
        self.token.total_supply()
    }

    fn to_units(&self, amount: Amount) -> Result<Amount> {
        self.token.to_base(amount)
    }

    fn from_units(&self, units: Amount) -> Result<Amount> {
        self.token.from_base(units)
    }

    fn unit_balance_of(&self, account: &AccountId) -> Amount {
        self.token.base_balance_of(account)
    }

    fn transfer_units(&mut self, from: &AccountId, to: &AccountId, units: Amount) -> Result<()> {
        let limit = self.tiers.transfer_limit_of(self.graph, from);
        self.token.transfer_base(from, to, units, self.now, limit)
    }
}
