//! Serialized, all-or-nothing operation executor.
//!
//! Every mutating call reads the clock once, runs against the live state and
//! then commits all sections to the store. Any failure, including a failed
//! commit, restores the state the call started from.

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::state::ProtocolState;
use quota_economics::{
    ReferralNode, ReferralRates, TaxCategory, TaxConfig, TierMetrics, TierThresholds,
};
use quota_storage::{StateStore, StoreMeta};
use quota_token::{PriceOracle, RebaseParams, RebaseReport};
use quota_treasury::{
    AccountLedger, DistributionPlan, DistributionReceipt, DustPolicy, StakePosition,
};
use quota_types::{AccountId, Amount, Bps, Clock, QuotaError, Result, Timestamp};
use tracing::{info, warn};

/// Result of a claim or exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// Principal returned to the staker (exit only).
    pub withdrawn: Amount,
    pub gross: Amount,
    /// `None` when there was nothing to distribute.
    pub receipt: Option<DistributionReceipt>,
}

pub struct Protocol<S: StateStore, C: Clock> {
    store: S,
    clock: C,
    state: ProtocolState,
}

impl<S: StateStore, C: Clock> Protocol<S, C> {
    /// Create and persist a fresh instance.
    pub fn genesis(config: &ProtocolConfig, store: S, clock: C) -> ProtocolResult<Self> {
        if store.is_initialized()? {
            return Err(ProtocolError::AlreadyInitialized);
        }
        let resolved = config.resolve()?;
        let now = clock.now();
        let state = ProtocolState::genesis(&resolved, now)?;
        let meta = store.commit(state.to_batch()?)?;
        info!(
            target: "protocol",
            admin = %resolved.admin,
            supply = resolved.supply,
            commits = meta.commits,
            "genesis committed"
        );
        Ok(Self {
            store,
            clock,
            state,
        })
    }

    /// Reopen a persisted instance.
    pub fn open(store: S, clock: C) -> ProtocolResult<Self> {
        if !store.is_initialized()? {
            return Err(ProtocolError::NotInitialized);
        }
        let state = ProtocolState::load(&store)?;
        info!(target: "protocol", commits = store.meta()?.commits, "state loaded");
        Ok(Self {
            store,
            clock,
            state,
        })
    }

    pub fn open_or_genesis(config: &ProtocolConfig, store: S, clock: C) -> ProtocolResult<Self> {
        if store.is_initialized()? {
            Self::open(store, clock)
        } else {
            Self::genesis(config, store, clock)
        }
    }

    fn execute<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut ProtocolState, Timestamp) -> Result<T>,
    ) -> ProtocolResult<T> {
        let now = self.clock.now();
        let snapshot = self.state.clone();

        let outcome = match f(&mut self.state, now) {
            Ok(value) => self
                .state
                .to_batch()
                .and_then(|batch| Ok(self.store.commit(batch)?))
                .map(|_| value),
            Err(err) => Err(err.into()),
        };

        if let Err(err) = &outcome {
            self.state = snapshot;
            warn!(target: "protocol", operation, now, error = %err, "operation rolled back");
        }
        outcome
    }

    // -------------------------------------------------------------------------
    // Participants
    // -------------------------------------------------------------------------

    /// Join the referral forest. Principal staked before enrolling counts
    /// toward the new node's volume.
    pub fn enroll(&mut self, participant: AccountId, referrer: AccountId) -> ProtocolResult<ReferralNode> {
        self.execute("enroll", |state, now| {
            state.referrals.enroll(participant, referrer, now)?;
            let staked = state
                .accrual
                .position(&participant)
                .map(|p| p.principal)
                .unwrap_or(0);
            state.referrals.record_volume(&participant, staked);
            state
                .referrals
                .node(&participant)
                .cloned()
                .ok_or_else(|| QuotaError::NotEnrolled(participant.to_string()))
        })
    }

    /// Lock stake tokens and count them toward the staker's tier volume.
    pub fn stake(&mut self, staker: &AccountId, amount: Amount) -> ProtocolResult<()> {
        self.execute("stake", |state, now| {
            state
                .accrual
                .stake(staker, amount, now, &mut state.stake_token)?;
            state.referrals.record_volume(staker, amount);
            Ok(())
        })
    }

    pub fn withdraw(&mut self, staker: &AccountId, amount: Amount) -> ProtocolResult<()> {
        self.execute("withdraw", |state, now| {
            state
                .accrual
                .withdraw(staker, amount, now, &mut state.stake_token)?;
            state.referrals.release_volume(staker, amount);
            Ok(())
        })
    }

    /// Settle the staker's reward and distribute it from the reward escrow.
    pub fn claim(&mut self, staker: &AccountId) -> ProtocolResult<ClaimOutcome> {
        self.execute("claim", |state, now| {
            let gross = state.accrual.claim(staker, now)?;
            let receipt = distribute(state, gross, staker, now)?;
            Ok(ClaimOutcome {
                withdrawn: 0,
                gross,
                receipt,
            })
        })
    }

    /// Withdraw all principal and claim.
    pub fn exit(&mut self, staker: &AccountId) -> ProtocolResult<ClaimOutcome> {
        self.execute("exit", |state, now| {
            let withdrawn = state
                .accrual
                .position(staker)
                .map(|p| p.principal)
                .unwrap_or(0);
            let gross = state.accrual.exit(staker, now, &mut state.stake_token)?;
            state.referrals.release_volume(staker, withdrawn);
            let receipt = distribute(state, gross, staker, now)?;
            Ok(ClaimOutcome {
                withdrawn,
                gross,
                receipt,
            })
        })
    }

    /// Elastic-token transfer under the sender's tier limit.
    pub fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> ProtocolResult<()> {
        self.execute("transfer", |state, now| {
            state
                .token
                .session(&state.tiers, &state.referrals, now)
                .transfer(from, to, amount)
        })
    }

    /// Move elastic tokens from `from` into the reward escrow.
    pub fn fund_rewards(&mut self, from: &AccountId, amount: Amount) -> ProtocolResult<()> {
        self.execute("fund_rewards", |state, now| {
            let escrow = state.distribution.settings().escrow;
            state
                .token
                .session(&state.tiers, &state.referrals, now)
                .transfer(from, &escrow, amount)?;
            info!(target: "protocol", from = %from, amount, "reward escrow funded");
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Rebase
    // -------------------------------------------------------------------------

    /// Run a rebase epoch. Expansion shares go to the perpetual pool.
    pub fn rebase(&mut self, price: Amount) -> ProtocolResult<RebaseReport> {
        self.execute("rebase", |state, now| {
            let pool = state.tax.pool(TaxCategory::PerpetualPool);
            state.token.rebase(price, now, pool)
        })
    }

    pub fn rebase_from_oracle(&mut self, oracle: &dyn PriceOracle) -> ProtocolResult<RebaseReport> {
        let price = oracle.observed_price()?;
        self.rebase(price)
    }

    // -------------------------------------------------------------------------
    // Governance
    // -------------------------------------------------------------------------

    pub fn set_tax_rate(&mut self, caller: &AccountId, category: TaxCategory, bps: Bps) -> ProtocolResult<()> {
        self.execute("set_tax_rate", |state, _| state.tax.set_rate(caller, category, bps))
    }

    pub fn set_tax_pool(
        &mut self,
        caller: &AccountId,
        category: TaxCategory,
        pool: AccountId,
    ) -> ProtocolResult<()> {
        self.execute("set_tax_pool", |state, _| state.tax.set_pool(caller, category, pool))
    }

    pub fn set_referral_rates(
        &mut self,
        caller: &AccountId,
        tier: u8,
        rates: ReferralRates,
    ) -> ProtocolResult<()> {
        self.execute("set_referral_rates", |state, _| {
            state.tax.set_bulk_referral_rate(caller, tier, rates)
        })
    }

    pub fn clear_referral_rates(&mut self, caller: &AccountId, tier: u8) -> ProtocolResult<()> {
        self.execute("clear_referral_rates", |state, _| {
            state.tax.clear_referral_rate(caller, tier)
        })
    }

    pub fn apply_tax_config(&mut self, caller: &AccountId, config: TaxConfig) -> ProtocolResult<()> {
        self.execute("apply_tax_config", |state, _| state.tax.apply_config(caller, config))
    }

    /// Returns the previous tier.
    pub fn set_tier(&mut self, caller: &AccountId, participant: &AccountId, tier: u8) -> ProtocolResult<u8> {
        self.execute("set_tier", |state, _| {
            state
                .tiers
                .set_tier(caller, &mut state.referrals, participant, tier)
        })
    }

    pub fn promote(&mut self, caller: &AccountId, participant: &AccountId) -> ProtocolResult<Option<u8>> {
        self.execute("promote", |state, now| {
            state
                .tiers
                .promote(caller, &mut state.referrals, participant, now)
        })
    }

    pub fn set_thresholds(
        &mut self,
        caller: &AccountId,
        tier: u8,
        thresholds: TierThresholds,
    ) -> ProtocolResult<()> {
        self.execute("set_thresholds", |state, _| {
            state.tiers.set_thresholds(caller, tier, thresholds)
        })
    }

    pub fn set_transfer_limit(&mut self, caller: &AccountId, tier: u8, bps: Bps) -> ProtocolResult<()> {
        self.execute("set_transfer_limit", |state, _| {
            state.tiers.set_transfer_limit(caller, tier, bps)
        })
    }

    pub fn whitelist(&mut self, caller: &AccountId, account: &AccountId, flag: bool) -> ProtocolResult<()> {
        self.execute("whitelist", |state, _| state.token.whitelist(caller, account, flag))
    }

    pub fn mint(&mut self, caller: &AccountId, to: &AccountId, amount: Amount) -> ProtocolResult<()> {
        self.execute("mint", |state, _| state.token.mint(caller, to, amount))
    }

    /// Issue stake tokens (the asset stakers lock).
    pub fn mint_stake_tokens(&mut self, caller: &AccountId, to: &AccountId, amount: Amount) -> ProtocolResult<()> {
        self.execute("mint_stake_tokens", |state, _| {
            state.token.governor().ensure(caller, "issue stake tokens")?;
            state.stake_token.credit(to, amount)
        })
    }

    pub fn set_staking_restricted(&mut self, caller: &AccountId, restricted: bool) -> ProtocolResult<()> {
        self.execute("set_staking_restricted", |state, _| {
            state.accrual.set_restricted(caller, restricted)
        })
    }

    pub fn set_staking_whitelisted(
        &mut self,
        caller: &AccountId,
        account: AccountId,
        whitelisted: bool,
    ) -> ProtocolResult<()> {
        self.execute("set_staking_whitelisted", |state, _| {
            state.accrual.set_whitelisted(caller, account, whitelisted)
        })
    }

    pub fn set_reward_rate(&mut self, caller: &AccountId, rate_per_second: Amount) -> ProtocolResult<()> {
        self.execute("set_reward_rate", |state, now| {
            state.accrual.set_reward_rate(caller, rate_per_second, now)
        })
    }

    pub fn set_yearly_rate(&mut self, caller: &AccountId, yearly_bps: Bps) -> ProtocolResult<()> {
        self.execute("set_yearly_rate", |state, now| {
            state.accrual.set_yearly_rate(caller, yearly_bps, now)
        })
    }

    /// Stream `amount` over `duration` seconds. Returns the new per-second rate.
    pub fn notify_reward(&mut self, caller: &AccountId, amount: Amount, duration: u64) -> ProtocolResult<Amount> {
        self.execute("notify_reward", |state, now| {
            state.accrual.notify_reward(caller, amount, duration, now)
        })
    }

    pub fn set_rebase_params(&mut self, caller: &AccountId, params: RebaseParams) -> ProtocolResult<()> {
        self.execute("set_rebase_params", |state, _| {
            state.token.set_rebase_params(caller, params)
        })
    }

    pub fn set_max_depth(&mut self, caller: &AccountId, max_depth: usize) -> ProtocolResult<()> {
        self.execute("set_max_depth", |state, _| {
            state.distribution.set_max_depth(caller, max_depth)
        })
    }

    pub fn set_dust_policy(&mut self, caller: &AccountId, policy: DustPolicy) -> ProtocolResult<()> {
        self.execute("set_dust_policy", |state, _| {
            state.distribution.set_dust_policy(caller, policy)
        })
    }

    /// Hand every engine to `new_admin`.
    pub fn transfer_governance(&mut self, caller: &AccountId, new_admin: AccountId) -> ProtocolResult<()> {
        self.execute("transfer_governance", |state, _| {
            state.tax.transfer_governance(caller, new_admin)?;
            state.tiers.transfer_governance(caller, new_admin)?;
            state.accrual.transfer_governance(caller, new_admin)?;
            state.distribution.transfer_governance(caller, new_admin)?;
            state.token.transfer_governance(caller, new_admin)?;
            info!(target: "protocol", new_admin = %new_admin, "governance transferred");
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_meta(&self) -> ProtocolResult<StoreMeta> {
        Ok(self.store.meta()?)
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.state.token.balance_of(account)
    }

    pub fn stake_balance_of(&self, account: &AccountId) -> Amount {
        self.state.stake_token.balance_of(account)
    }

    pub fn position(&self, staker: &AccountId) -> Option<&StakePosition> {
        self.state.accrual.position(staker)
    }

    pub fn earned(&self, staker: &AccountId) -> ProtocolResult<Amount> {
        Ok(self.state.accrual.earned(staker, self.clock.now())?)
    }

    pub fn node(&self, participant: &AccountId) -> Option<&ReferralNode> {
        self.state.referrals.node(participant)
    }

    pub fn tier_metrics(&self, participant: &AccountId) -> Option<TierMetrics> {
        self.state
            .tiers
            .metrics_for(&self.state.referrals, participant, self.clock.now())
    }

    /// Amount `account` may still send today.
    pub fn remaining_allowance(&self, account: &AccountId) -> ProtocolResult<Amount> {
        let limit = self
            .state
            .tiers
            .transfer_limit_of(&self.state.referrals, account);
        Ok(self
            .state
            .token
            .remaining_allowance(account, self.clock.now(), limit)?)
    }

    /// Split `gross` would produce for `staker`, in token base units, without
    /// moving anything.
    pub fn preview_distribution(&self, gross: Amount, staker: &AccountId) -> ProtocolResult<DistributionPlan> {
        let units = self.state.token.to_base(gross)?;
        Ok(self
            .state
            .distribution
            .plan(units, staker, &self.state.tax, &self.state.referrals)?)
    }

    pub fn flush(&self) -> ProtocolResult<()> {
        Ok(self.store.flush()?)
    }
}

fn distribute(
    state: &mut ProtocolState,
    gross: Amount,
    staker: &AccountId,
    now: Timestamp,
) -> Result<Option<DistributionReceipt>> {
    if gross == 0 {
        return Ok(None);
    }
    let ProtocolState {
        tax,
        tiers,
        referrals,
        distribution,
        token,
        ..
    } = state;
    let mut ledger = token.session(tiers, referrals, now);
    let receipt = distribution.distribute(gross, staker, tax, referrals, &mut ledger)?;
    Ok(Some(receipt))
}
