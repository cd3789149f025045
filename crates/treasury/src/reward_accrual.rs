//! Time-weighted staking reward accrual.
//!
//! A single global reward-per-token accumulator is advanced lazily on every
//! interaction. Each position remembers the accumulator value it was last
//! settled at, so settling one staker costs O(1) regardless of how many
//! stakers exist:
//!
//! ```text
//! unclaimed += principal * (accumulator - position.reward_per_token_paid)
//! position.reward_per_token_paid = accumulator
//! ```
//!
//! Two accrual modes feed the accumulator:
//! - `Shared`: a fixed reward stream per second split pro rata across the
//!   total stake (`acc += rate * elapsed / total_staked`).
//! - `FixedYield`: every staked unit earns the same scaled rate per second
//!   (`acc += rate_per_token * elapsed`).

use crate::account_ledger::AccountLedger;
use quota_types::{
    bps_to_scaled, checked_add, mul_div, mul_scaled, AccountId, Amount, Bps, Governor,
    MathError, QuotaError, Result, Timestamp, SCALE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Seconds per year used to turn yearly rates into per-second rates.
pub const SECONDS_PER_YEAR: u64 = 31_540_000;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AccrualMode {
    /// `rate_per_second` reward units shared by all stakers.
    Shared { rate_per_second: Amount },
    /// Each staked unit earns `rate_per_token` (scaled) per second.
    FixedYield { rate_per_token: u128 },
}

impl AccrualMode {
    /// Fixed yield from a yearly rate in bps (10_000 = 100% per year).
    pub fn from_yearly_bps(yearly_bps: Bps) -> Self {
        AccrualMode::FixedYield {
            rate_per_token: bps_to_scaled(yearly_bps) / SECONDS_PER_YEAR as u128,
        }
    }
}

impl Default for AccrualMode {
    fn default() -> Self {
        AccrualMode::Shared { rate_per_second: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    pub owner: AccountId,
    pub principal: Amount,
    /// Accumulator value at the last settlement (scaled).
    pub reward_per_token_paid: u128,
    /// Settled but not yet claimed reward.
    pub unclaimed: Amount,
    /// Lifetime gross reward claimed.
    pub claimed_total: Amount,
}

impl StakePosition {
    fn new(owner: AccountId, accumulator: u128) -> Self {
        Self {
            owner,
            principal: 0,
            reward_per_token_paid: accumulator,
            unclaimed: 0,
            claimed_total: 0,
        }
    }

    fn earned_at(&self, accumulator: u128) -> Result<Amount> {
        let delta = accumulator.saturating_sub(self.reward_per_token_paid);
        Ok(checked_add(self.unclaimed, mul_scaled(self.principal, delta)?)?)
    }
}

// =============================================================================
// ACCRUAL LEDGER
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardAccrual {
    governor: Governor,
    mode: AccrualMode,
    /// Account holding staked principal.
    vault: AccountId,
    /// Reward per staked unit since genesis (scaled).
    accumulator: u128,
    last_update: Timestamp,
    /// Shared streams stop accruing here.
    period_finish: Option<Timestamp>,
    total_staked: Amount,
    positions: HashMap<AccountId, StakePosition>,
    /// When set, only whitelisted accounts may stake.
    restricted: bool,
    whitelist: BTreeSet<AccountId>,
}

impl RewardAccrual {
    pub fn new(admin: AccountId, vault: AccountId, mode: AccrualMode, now: Timestamp) -> Self {
        Self {
            governor: Governor::new(admin),
            mode,
            vault,
            accumulator: 0,
            last_update: now,
            period_finish: None,
            total_staked: 0,
            positions: HashMap::new(),
            restricted: false,
            whitelist: BTreeSet::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Accumulator
    // -------------------------------------------------------------------------

    fn applicable_time(&self, now: Timestamp) -> Timestamp {
        match self.period_finish {
            Some(finish) => now.min(finish),
            None => now,
        }
    }

    /// Accumulator value as of `now`, without mutating anything.
    pub fn accumulator_at(&self, now: Timestamp) -> Result<u128> {
        let until = self.applicable_time(now);
        if until <= self.last_update {
            return Ok(self.accumulator);
        }
        let elapsed = (until - self.last_update) as u128;

        let increment = match self.mode {
            AccrualMode::Shared { rate_per_second } => {
                if self.total_staked == 0 {
                    return Ok(self.accumulator);
                }
                mul_div(rate_per_second, elapsed * SCALE, self.total_staked)?
            }
            AccrualMode::FixedYield { rate_per_token } => rate_per_token
                .checked_mul(elapsed)
                .ok_or(MathError::Overflow)?,
        };
        Ok(checked_add(self.accumulator, increment)?)
    }

    fn commit_accumulator(&mut self, accumulator: u128, now: Timestamp) {
        self.accumulator = accumulator;
        self.last_update = self.applicable_time(now).max(self.last_update);
    }

    /// Settle `staker` against `accumulator`, creating the position if needed.
    fn settle_position(&mut self, staker: &AccountId, accumulator: u128) -> Result<&mut StakePosition> {
        let position = self
            .positions
            .entry(*staker)
            .or_insert_with(|| StakePosition::new(*staker, accumulator));
        position.unclaimed = position.earned_at(accumulator)?;
        position.reward_per_token_paid = accumulator;
        Ok(position)
    }

    fn prune(&mut self, staker: &AccountId) {
        if self
            .positions
            .get(staker)
            .is_some_and(|p| p.principal == 0 && p.unclaimed == 0)
        {
            self.positions.remove(staker);
        }
    }

    // -------------------------------------------------------------------------
    // Staker operations
    // -------------------------------------------------------------------------

    /// Lock `amount` of the stake token from `staker` into the vault.
    pub fn stake(
        &mut self,
        staker: &AccountId,
        amount: Amount,
        now: Timestamp,
        ledger: &mut dyn AccountLedger,
    ) -> Result<()> {
        if amount == 0 {
            return Err(QuotaError::invalid_amount("stake amount must be positive"));
        }
        if self.restricted && !self.whitelist.contains(staker) {
            return Err(QuotaError::Unauthorized(
                "staking is currently limited to whitelisted accounts".into(),
            ));
        }
        let total_staked = checked_add(self.total_staked, amount)?;
        let accumulator = self.accumulator_at(now)?;

        ledger.transfer(staker, &self.vault, amount)?;

        self.commit_accumulator(accumulator, now);
        let position = self.settle_position(staker, accumulator)?;
        position.principal += amount;
        let principal = position.principal;
        self.total_staked = total_staked;

        info!(
            target: "accrual",
            staker = %staker,
            amount,
            principal,
            total_staked = self.total_staked,
            "stake recorded"
        );
        Ok(())
    }

    /// Return `amount` of principal from the vault to `staker`.
    pub fn withdraw(
        &mut self,
        staker: &AccountId,
        amount: Amount,
        now: Timestamp,
        ledger: &mut dyn AccountLedger,
    ) -> Result<()> {
        if amount == 0 {
            return Err(QuotaError::invalid_amount("withdraw amount must be positive"));
        }
        let staked = self.positions.get(staker).map(|p| p.principal).unwrap_or(0);
        if amount > staked {
            return Err(QuotaError::InsufficientStake {
                requested: amount,
                staked,
            });
        }
        let accumulator = self.accumulator_at(now)?;

        ledger.transfer(&self.vault, staker, amount)?;

        self.commit_accumulator(accumulator, now);
        let position = self.settle_position(staker, accumulator)?;
        position.principal -= amount;
        self.total_staked -= amount;
        self.prune(staker);

        info!(
            target: "accrual",
            staker = %staker,
            amount,
            total_staked = self.total_staked,
            "stake withdrawn"
        );
        Ok(())
    }

    /// Settle and hand out the staker's unclaimed reward.
    ///
    /// Returns the gross amount to distribute; zero is a valid no-op.
    pub fn claim(&mut self, staker: &AccountId, now: Timestamp) -> Result<Amount> {
        let accumulator = self.accumulator_at(now)?;
        self.commit_accumulator(accumulator, now);

        if !self.positions.contains_key(staker) {
            debug!(target: "accrual", staker = %staker, "claim without position");
            return Ok(0);
        }
        let position = self.settle_position(staker, accumulator)?;
        let gross = position.unclaimed;
        if gross == 0 {
            debug!(target: "accrual", staker = %staker, "nothing to claim");
            return Ok(0);
        }
        position.unclaimed = 0;
        position.claimed_total = position.claimed_total.saturating_add(gross);
        self.prune(staker);

        info!(target: "accrual", staker = %staker, gross, "reward claimed");
        Ok(gross)
    }

    /// Withdraw all principal and claim. Returns the gross reward.
    pub fn exit(
        &mut self,
        staker: &AccountId,
        now: Timestamp,
        ledger: &mut dyn AccountLedger,
    ) -> Result<Amount> {
        let principal = self.positions.get(staker).map(|p| p.principal).unwrap_or(0);
        if principal > 0 {
            self.withdraw(staker, principal, now, ledger)?;
        }
        self.claim(staker, now)
    }

    /// Reward the staker could claim at `now`.
    pub fn earned(&self, staker: &AccountId, now: Timestamp) -> Result<Amount> {
        match self.positions.get(staker) {
            Some(position) => position.earned_at(self.accumulator_at(now)?),
            None => Ok(0),
        }
    }

    // -------------------------------------------------------------------------
    // Governance
    // -------------------------------------------------------------------------

    /// Switch to a shared stream of `rate_per_second` with no end.
    pub fn set_reward_rate(
        &mut self,
        caller: &AccountId,
        rate_per_second: Amount,
        now: Timestamp,
    ) -> Result<()> {
        self.governor.ensure(caller, "set reward rates")?;
        self.set_mode(AccrualMode::Shared { rate_per_second }, None, now)
    }

    /// Switch to a fixed per-token yield expressed in yearly bps.
    pub fn set_yearly_rate(&mut self, caller: &AccountId, yearly_bps: Bps, now: Timestamp) -> Result<()> {
        self.governor.ensure(caller, "set reward rates")?;
        self.set_mode(AccrualMode::from_yearly_bps(yearly_bps), None, now)
    }

    /// Switch to a fixed per-token yield of `rate_per_token` (scaled) per second.
    pub fn set_rate_per_token(
        &mut self,
        caller: &AccountId,
        rate_per_token: u128,
        now: Timestamp,
    ) -> Result<()> {
        self.governor.ensure(caller, "set reward rates")?;
        self.set_mode(AccrualMode::FixedYield { rate_per_token }, None, now)
    }

    /// Stream `amount` over `duration` seconds, rolling over whatever the
    /// current shared stream has not paid out yet.
    pub fn notify_reward(
        &mut self,
        caller: &AccountId,
        amount: Amount,
        duration: u64,
        now: Timestamp,
    ) -> Result<Amount> {
        self.governor.ensure(caller, "fund reward streams")?;
        if duration == 0 {
            return Err(QuotaError::config("reward duration must be positive"));
        }
        let leftover = match (self.mode, self.period_finish) {
            (AccrualMode::Shared { rate_per_second }, Some(finish)) if finish > now => {
                rate_per_second
                    .checked_mul((finish - now) as u128)
                    .ok_or(MathError::Overflow)?
            }
            _ => 0,
        };
        let rate_per_second = checked_add(amount, leftover)? / duration as u128;
        if rate_per_second == 0 {
            return Err(QuotaError::invalid_amount(format!(
                "{amount} is too small to stream over {duration}s"
            )));
        }
        let finish = now.checked_add(duration).ok_or(MathError::Overflow)?;
        self.set_mode(AccrualMode::Shared { rate_per_second }, Some(finish), now)?;
        Ok(rate_per_second)
    }

    fn set_mode(
        &mut self,
        mode: AccrualMode,
        period_finish: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<()> {
        let accumulator = self.accumulator_at(now)?;
        self.commit_accumulator(accumulator, now);
        self.last_update = now.max(self.last_update);
        self.mode = mode;
        self.period_finish = period_finish;
        info!(target: "accrual", ?mode, ?period_finish, "accrual mode updated");
        Ok(())
    }

    pub fn set_restricted(&mut self, caller: &AccountId, restricted: bool) -> Result<()> {
        self.governor.ensure(caller, "gate staking")?;
        self.restricted = restricted;
        info!(target: "accrual", restricted, "staking gate updated");
        Ok(())
    }

    pub fn set_whitelisted(
        &mut self,
        caller: &AccountId,
        account: AccountId,
        whitelisted: bool,
    ) -> Result<()> {
        self.governor.ensure(caller, "whitelist stakers")?;
        if whitelisted {
            self.whitelist.insert(account);
        } else {
            self.whitelist.remove(&account);
        }
        Ok(())
    }

    pub fn transfer_governance(&mut self, caller: &AccountId, new_admin: AccountId) -> Result<()> {
        self.governor.transfer(caller, new_admin)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn position(&self, staker: &AccountId) -> Option<&StakePosition> {
        self.positions.get(staker)
    }

    pub fn positions(&self) -> impl Iterator<Item = &StakePosition> {
        self.positions.values()
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    pub fn mode(&self) -> AccrualMode {
        self.mode
    }

    pub fn vault(&self) -> AccountId {
        self.vault
    }

    pub fn period_finish(&self) -> Option<Timestamp> {
        self.period_finish
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }
}
