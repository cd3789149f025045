//! Tier thresholds, evaluation and transfer-limit lookup.
//!
//! Evaluation is a pure comparison of a participant's metrics against the
//! stored thresholds of each tier. Tiers only ever change through
//! [`TierEngine::set_tier`] (or [`TierEngine::promote`], which never lowers a
//! tier).

use crate::referral::ReferralGraph;
use crate::tax::MAX_TIER;
use quota_types::{AccountId, Amount, Bps, Governor, QuotaError, Result, Timestamp, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Seconds per membership day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Limit applied when neither the tier nor tier 0 has one configured (20%).
pub const DEFAULT_TRANSFER_LIMIT_BPS: Bps = 2_000;

/// Number of referral-count buckets (tier >= 0, >= 1, >= 2, >= 3).
pub const REFERRAL_COUNT_BUCKETS: usize = 4;

/// Requirements for reaching a tier. All of them must hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThresholds {
    /// Minimum staked principal.
    pub min_volume: Amount,
    /// Minimum whole days since enrollment.
    pub min_membership_days: u64,
    /// `min_referrals[i]`: minimum direct referrals whose tier is at least `i`.
    pub min_referrals: [u32; REFERRAL_COUNT_BUCKETS],
}

/// Observed activity of a participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMetrics {
    pub volume: Amount,
    pub membership_days: u64,
    /// `referrals[i]`: direct referrals whose tier is at least `i`.
    pub referrals: [u32; REFERRAL_COUNT_BUCKETS],
}

impl TierThresholds {
    pub fn is_met_by(&self, metrics: &TierMetrics) -> bool {
        metrics.volume >= self.min_volume
            && metrics.membership_days >= self.min_membership_days
            && self
                .min_referrals
                .iter()
                .zip(metrics.referrals.iter())
                .all(|(required, observed)| observed >= required)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierEngine {
    governor: Governor,
    thresholds: BTreeMap<u8, TierThresholds>,
    transfer_limits: BTreeMap<u8, Bps>,
}

impl TierEngine {
    pub fn new(admin: AccountId) -> Self {
        Self {
            governor: Governor::new(admin),
            thresholds: BTreeMap::new(),
            transfer_limits: BTreeMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Governance
    // -------------------------------------------------------------------------

    pub fn set_thresholds(
        &mut self,
        caller: &AccountId,
        tier: u8,
        thresholds: TierThresholds,
    ) -> Result<()> {
        self.governor.ensure(caller, "set tier thresholds")?;
        if tier == 0 || tier > MAX_TIER {
            return Err(QuotaError::config(format!(
                "thresholds apply to tiers 1..={MAX_TIER}, got {tier}"
            )));
        }
        self.thresholds.insert(tier, thresholds);
        info!(target: "tiers", tier, ?thresholds, "tier thresholds updated");
        Ok(())
    }

    pub fn set_transfer_limit(&mut self, caller: &AccountId, tier: u8, bps: Bps) -> Result<()> {
        self.governor.ensure(caller, "set transfer limits")?;
        if tier > MAX_TIER {
            return Err(QuotaError::config(format!(
                "tier {tier} outside 0..={MAX_TIER}"
            )));
        }
        if bps > BPS_DENOMINATOR {
            return Err(QuotaError::config(format!(
                "transfer limit {bps} bps exceeds {BPS_DENOMINATOR}"
            )));
        }
        self.transfer_limits.insert(tier, bps);
        info!(target: "tiers", tier, bps, "transfer limit updated");
        Ok(())
    }

    /// Explicitly assign a tier. Returns the previous tier.
    pub fn set_tier(
        &self,
        caller: &AccountId,
        graph: &mut ReferralGraph,
        participant: &AccountId,
        tier: u8,
    ) -> Result<u8> {
        self.governor.ensure(caller, "set tiers")?;
        if tier > MAX_TIER {
            return Err(QuotaError::config(format!(
                "tier {tier} outside 0..={MAX_TIER}"
            )));
        }
        let previous = graph.set_tier(participant, tier)?;
        info!(
            target: "tiers",
            participant = %participant,
            from = previous,
            to = tier,
            "tier assigned"
        );
        Ok(previous)
    }

    /// Evaluate and raise the participant's tier if the evaluation is higher.
    ///
    /// Returns the new tier when it changed.
    pub fn promote(
        &self,
        caller: &AccountId,
        graph: &mut ReferralGraph,
        participant: &AccountId,
        now: Timestamp,
    ) -> Result<Option<u8>> {
        self.governor.ensure(caller, "promote participants")?;
        let evaluated = self.evaluate_participant(graph, participant, now)?;
        let current = graph.tier_of(participant);
        if evaluated <= current {
            debug!(
                target: "tiers",
                participant = %participant,
                current,
                evaluated,
                "no promotion"
            );
            return Ok(None);
        }
        self.set_tier(caller, graph, participant, evaluated)?;
        Ok(Some(evaluated))
    }

    pub fn transfer_governance(&mut self, caller: &AccountId, new_admin: AccountId) -> Result<()> {
        self.governor.transfer(caller, new_admin)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Highest tier whose configured thresholds are all met. Tiers without
    /// thresholds cannot be reached by evaluation; tier 0 always can.
    pub fn evaluate_tier(&self, metrics: &TierMetrics) -> u8 {
        self.thresholds
            .iter()
            .rev()
            .find(|(_, thresholds)| thresholds.is_met_by(metrics))
            .map(|(tier, _)| *tier)
            .unwrap_or(0)
    }

    pub fn evaluate_participant(
        &self,
        graph: &ReferralGraph,
        participant: &AccountId,
        now: Timestamp,
    ) -> Result<u8> {
        let metrics = self
            .metrics_for(graph, participant, now)
            .ok_or_else(|| QuotaError::NotEnrolled(participant.to_string()))?;
        Ok(self.evaluate_tier(&metrics))
    }

    /// Derive metrics for an enrolled participant from the referral forest.
    pub fn metrics_for(
        &self,
        graph: &ReferralGraph,
        participant: &AccountId,
        now: Timestamp,
    ) -> Option<TierMetrics> {
        let node = graph.node(participant)?;
        let mut referrals = [0u32; REFERRAL_COUNT_BUCKETS];
        for child in &node.referrals {
            let child_tier = graph.tier_of(child) as usize;
            for bucket in referrals.iter_mut().take(child_tier.min(REFERRAL_COUNT_BUCKETS - 1) + 1) {
                *bucket += 1;
            }
        }
        Some(TierMetrics {
            volume: node.volume,
            membership_days: now.saturating_sub(node.joined_at) / SECONDS_PER_DAY,
            referrals,
        })
    }

    pub fn thresholds(&self, tier: u8) -> Option<&TierThresholds> {
        self.thresholds.get(&tier)
    }

    /// Daily transfer limit of `tier` in bps of the window-start balance,
    /// falling back to tier 0.
    pub fn transfer_limit(&self, tier: u8) -> Bps {
        self.transfer_limits
            .get(&tier)
            .or_else(|| self.transfer_limits.get(&0))
            .copied()
            .unwrap_or(DEFAULT_TRANSFER_LIMIT_BPS)
    }

    /// Transfer limit of a participant's current tier.
    pub fn transfer_limit_of(&self, graph: &ReferralGraph, participant: &AccountId) -> Bps {
        self.transfer_limit(graph.tier_of(participant))
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }
}
