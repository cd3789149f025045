//! Reward distribution across tax pools, the referral chain and the staker.
//!
//! A gross reward is split in two phases. [`DistributionEngine::plan`] is a
//! pure computation:
//!
//! 1. every category with a non-zero rate gets `gross * rate` (truncated);
//!    the direct-referrer category is paid to the depth-0 ancestor when there
//!    is one and to its pool otherwise;
//! 2. each ancestor at depth `d` gets `gross * referral_rate[tier][d]`;
//!    ancestors whose tier has no configured rates get zero;
//! 3. the staker gets the remainder, so the parts always sum to `gross`.
//!
//! Truncation dust (the remainder minus the staker's exact share) is routed
//! by [`DustPolicy`], by default to the perpetual pool.
//! [`DistributionEngine::distribute`] converts the gross reward into the
//! ledger's settlement units once, plans in those units and moves each part
//! out of the reward escrow, so the escrow debit always equals the sum of
//! the credits.

use crate::account_ledger::AccountLedger;
use quota_economics::{default_pool, ReferralGraph, TaxCategory, TaxManager, REFERRAL_DEPTHS};
use quota_types::{
    apply_bps, checked_add, mul_div, AccountId, Amount, Bps, Governor, QuotaError, Result,
    BPS_DENOMINATOR,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// =============================================================================
// TYPES
// =============================================================================

/// Destination of truncation dust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DustPolicy {
    /// Dust stays in the staker's remainder.
    Staker,
    /// Dust goes to the pool of the given category, or to the category's
    /// well-known pool account when none is configured.
    Pool(TaxCategory),
}

impl Default for DustPolicy {
    fn default() -> Self {
        DustPolicy::Pool(TaxCategory::PerpetualPool)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    Category(TaxCategory),
    /// Direct-referrer category paid to the depth-0 ancestor.
    DirectReferrer,
    Referral { depth: usize, tier: u8 },
    Staker,
    Dust,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub recipient: AccountId,
    pub kind: PayoutKind,
    /// Rate applied; zero for remainder-based payouts.
    pub rate_bps: Bps,
    pub amount: Amount,
}

/// Computed split of one gross reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub gross: Amount,
    pub staker: AccountId,
    pub payouts: Vec<Payout>,
    /// Truncation residue of all rate-based parts.
    pub dust: Amount,
}

impl DistributionPlan {
    pub fn total(&self) -> Amount {
        self.payouts.iter().map(|p| p.amount).sum()
    }

    fn sum_where(&self, pred: impl Fn(&PayoutKind) -> bool) -> Amount {
        self.payouts
            .iter()
            .filter(|p| pred(&p.kind))
            .map(|p| p.amount)
            .sum()
    }

    pub fn category_total(&self) -> Amount {
        self.sum_where(|k| matches!(k, PayoutKind::Category(_)))
    }

    /// Tiered referral payouts plus the direct-referrer share paid to an ancestor.
    pub fn referral_total(&self) -> Amount {
        self.sum_where(|k| matches!(k, PayoutKind::Referral { .. } | PayoutKind::DirectReferrer))
    }

    pub fn dust_paid(&self) -> Amount {
        self.sum_where(|k| matches!(k, PayoutKind::Dust))
    }

    pub fn staker_amount(&self) -> Amount {
        self.sum_where(|k| matches!(k, PayoutKind::Staker))
    }

    /// Amount planned for `recipient` across all payouts.
    pub fn amount_for(&self, recipient: &AccountId) -> Amount {
        self.payouts
            .iter()
            .filter(|p| p.recipient == *recipient)
            .map(|p| p.amount)
            .sum()
    }
}

/// Record of an executed distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReceipt {
    pub source: AccountId,
    /// Gross reward as reported by the ledger.
    pub requested: Amount,
    /// Split in the ledger's settlement units; every payout was moved as planned.
    pub plan: DistributionPlan,
    /// Number of ledger transfers performed (zero-amount payouts are skipped).
    pub transfers: usize,
}

/// Lifetime totals in settlement units, for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub distributions: u64,
    pub total_gross: Amount,
    pub total_category: Amount,
    pub total_referral: Amount,
    pub total_staker: Amount,
    pub total_dust: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSettings {
    /// Account the gross reward is paid from.
    pub escrow: AccountId,
    /// Ancestors considered per distribution (at most [`REFERRAL_DEPTHS`]).
    pub max_depth: usize,
    pub dust_policy: DustPolicy,
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionEngine {
    governor: Governor,
    settings: DistributionSettings,
    stats: DistributionStats,
}

impl DistributionEngine {
    pub fn new(admin: AccountId, settings: DistributionSettings) -> Result<Self> {
        validate_max_depth(settings.max_depth)?;
        Ok(Self {
            governor: Governor::new(admin),
            settings,
            stats: DistributionStats::default(),
        })
    }

    /// Compute the split of `gross` earned by `staker`. Touches no balances.
    pub fn plan(
        &self,
        gross: Amount,
        staker: &AccountId,
        tax: &TaxManager,
        graph: &ReferralGraph,
    ) -> Result<DistributionPlan> {
        let mut payouts = Vec::new();
        let mut distributed: Amount = 0;
        let mut applied_bps: u64 = 0;
        let chain: Vec<AccountId> = graph
            .resolve_chain(staker, self.settings.max_depth)
            .collect();

        for (category, entry) in tax.active_categories() {
            let amount = apply_bps(gross, entry.rate_bps)?;
            let (recipient, kind) = match (category, chain.first()) {
                (TaxCategory::DirectReferrer, Some(referrer)) => {
                    (*referrer, PayoutKind::DirectReferrer)
                }
                _ => {
                    let pool = entry.pool.ok_or_else(|| {
                        QuotaError::config(format!(
                            "{category} charges {} bps but has no pool",
                            entry.rate_bps
                        ))
                    })?;
                    (pool, PayoutKind::Category(category))
                }
            };
            distributed = checked_add(distributed, amount)?;
            applied_bps += entry.rate_bps as u64;
            payouts.push(Payout {
                recipient,
                kind,
                rate_bps: entry.rate_bps,
                amount,
            });
        }

        for (depth, ancestor) in chain.iter().enumerate() {
            let tier = graph.tier_of(ancestor);
            let rate_bps = tax.referral_rate(tier, depth).unwrap_or(0);
            let amount = apply_bps(gross, rate_bps)?;
            distributed = checked_add(distributed, amount)?;
            applied_bps += rate_bps as u64;
            payouts.push(Payout {
                recipient: *ancestor,
                kind: PayoutKind::Referral { depth, tier },
                rate_bps,
                amount,
            });
        }

        let remainder = gross.checked_sub(distributed).ok_or_else(|| {
            QuotaError::config(format!(
                "rates applied to {gross} distribute {distributed}, above the gross amount"
            ))
        })?;
        let untaxed_bps = (BPS_DENOMINATOR as u64).saturating_sub(applied_bps) as u128;
        let exact_staker_share = mul_div(gross, untaxed_bps, BPS_DENOMINATOR as u128)?;
        let dust = remainder.saturating_sub(exact_staker_share);

        match self.settings.dust_policy {
            DustPolicy::Staker => payouts.push(Payout {
                recipient: *staker,
                kind: PayoutKind::Staker,
                rate_bps: 0,
                amount: remainder,
            }),
            DustPolicy::Pool(category) => {
                let pool = tax.pool(category).unwrap_or_else(|| default_pool(category));
                payouts.push(Payout {
                    recipient: *staker,
                    kind: PayoutKind::Staker,
                    rate_bps: 0,
                    amount: remainder - dust,
                });
                payouts.push(Payout {
                    recipient: pool,
                    kind: PayoutKind::Dust,
                    rate_bps: 0,
                    amount: dust,
                });
            }
        }

        let plan = DistributionPlan {
            gross,
            staker: *staker,
            payouts,
            dust,
        };
        debug_assert_eq!(plan.total(), gross);
        Ok(plan)
    }

    /// Plan and pay out `gross` (in the ledger's reported units) from the
    /// escrow.
    ///
    /// The gross amount is converted to settlement units once and truncated;
    /// the split and every transfer happen in those units. A reward worth
    /// less than one settlement unit moves nothing. The escrow balance is
    /// checked before the first transfer. A ledger failure part-way through
    /// is returned as-is; callers that need the earlier transfers undone run
    /// this inside their own transaction.
    pub fn distribute(
        &mut self,
        gross: Amount,
        staker: &AccountId,
        tax: &TaxManager,
        graph: &ReferralGraph,
        ledger: &mut dyn AccountLedger,
    ) -> Result<DistributionReceipt> {
        let units = ledger.to_units(gross)?;
        let plan = self.plan(units, staker, tax, graph)?;
        let source = self.settings.escrow;

        let available = ledger.unit_balance_of(&source);
        if available < units {
            return Err(QuotaError::InsufficientBalance {
                requested: gross,
                available: ledger.balance_of(&source),
            });
        }

        let mut transfers = 0;
        for payout in plan.payouts.iter().filter(|p| p.amount > 0) {
            ledger.transfer_units(&source, &payout.recipient, payout.amount)?;
            transfers += 1;
            debug!(
                target: "distribution",
                recipient = %payout.recipient,
                kind = ?payout.kind,
                units = payout.amount,
                "payout"
            );
        }

        self.stats.distributions += 1;
        self.stats.total_gross = self.stats.total_gross.saturating_add(units);
        self.stats.total_category = self.stats.total_category.saturating_add(plan.category_total());
        self.stats.total_referral = self.stats.total_referral.saturating_add(plan.referral_total());
        self.stats.total_staker = self.stats.total_staker.saturating_add(plan.staker_amount());
        self.stats.total_dust = self.stats.total_dust.saturating_add(plan.dust);

        info!(
            target: "distribution",
            staker = %staker,
            gross,
            units,
            category = plan.category_total(),
            referral = plan.referral_total(),
            staker_share = plan.staker_amount(),
            dust = plan.dust,
            "reward distributed"
        );
        Ok(DistributionReceipt {
            source,
            requested: gross,
            plan,
            transfers,
        })
    }

    // -------------------------------------------------------------------------
    // Governance
    // -------------------------------------------------------------------------

    pub fn set_max_depth(&mut self, caller: &AccountId, max_depth: usize) -> Result<()> {
        self.governor.ensure(caller, "set the referral depth")?;
        validate_max_depth(max_depth)?;
        self.settings.max_depth = max_depth;
        info!(target: "distribution", max_depth, "referral depth updated");
        Ok(())
    }

    pub fn set_dust_policy(&mut self, caller: &AccountId, policy: DustPolicy) -> Result<()> {
        self.governor.ensure(caller, "set the dust policy")?;
        self.settings.dust_policy = policy;
        info!(target: "distribution", ?policy, "dust policy updated");
        Ok(())
    }

    pub fn transfer_governance(&mut self, caller: &AccountId, new_admin: AccountId) -> Result<()> {
        self.governor.transfer(caller, new_admin)
    }

    pub fn settings(&self) -> &DistributionSettings {
        &self.settings
    }

    pub fn stats(&self) -> &DistributionStats {
        &self.stats
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }
}

fn validate_max_depth(max_depth: usize) -> Result<()> {
    if max_depth > REFERRAL_DEPTHS {
        return Err(QuotaError::config(format!(
            "referral depth {max_depth} exceeds the {REFERRAL_DEPTHS} configured rate depths"
        )));
    }
    Ok(())
}
