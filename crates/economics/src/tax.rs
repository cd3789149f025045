//! Tax-rate table, pool destinations and the tiered referral-rate table.
//!
//! The table is validated as a whole on every mutation: the worst-case
//! single distribution (every category plus the highest referral rate at
//! each chain depth) must never exceed 10_000 bps. A rejected mutation leaves
//! the previous configuration untouched.

use quota_types::{AccountId, Bps, Governor, QuotaError, Result, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Highest tier a participant can reach (tiers are `0..=MAX_TIER`).
pub const MAX_TIER: u8 = 4;

/// Number of referral chain depths that carry a rate (depth 0 = direct referrer).
pub const REFERRAL_DEPTHS: usize = 4;

/// One referral rate per chain depth.
pub type ReferralRates = [Bps; REFERRAL_DEPTHS];

// =============================================================================
// CATEGORIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxCategory {
    /// Charged on the staker's own reward.
    SelfTax,
    /// Flat share for the staker's direct referrer; its pool receives the
    /// share when there is no referrer in reach.
    DirectReferrer,
    Maintenance,
    Dev,
    Revenue,
    PerpetualPool,
    RewardAllocation,
    Marketing,
    TierPool,
}

impl TaxCategory {
    pub const ALL: [TaxCategory; 9] = [
        TaxCategory::SelfTax,
        TaxCategory::DirectReferrer,
        TaxCategory::Maintenance,
        TaxCategory::Dev,
        TaxCategory::Revenue,
        TaxCategory::PerpetualPool,
        TaxCategory::RewardAllocation,
        TaxCategory::Marketing,
        TaxCategory::TierPool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxCategory::SelfTax => "self_tax",
            TaxCategory::DirectReferrer => "direct_referrer",
            TaxCategory::Maintenance => "maintenance",
            TaxCategory::Dev => "dev",
            TaxCategory::Revenue => "revenue",
            TaxCategory::PerpetualPool => "perpetual_pool",
            TaxCategory::RewardAllocation => "reward_allocation",
            TaxCategory::Marketing => "marketing",
            TaxCategory::TierPool => "tier_pool",
        }
    }
}

impl fmt::Display for TaxCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaxCategory {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TaxCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| QuotaError::config(format!("unknown tax category '{s}'")))
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Rate and destination of a single category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub rate_bps: Bps,
    pub pool: Option<AccountId>,
}

/// Complete tax table.
///
/// Tiers missing from `referral_rates` are "unset" and pay nothing at any
/// depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxConfig {
    pub categories: BTreeMap<TaxCategory, CategoryEntry>,
    pub referral_rates: BTreeMap<u8, ReferralRates>,
}

impl TaxConfig {
    /// Sum of all category rates.
    pub fn category_total_bps(&self) -> u64 {
        self.categories.values().map(|e| e.rate_bps as u64).sum()
    }

    /// Highest total a single referral chain can receive: for every depth,
    /// the maximum rate across tiers.
    pub fn worst_case_referral_bps(&self) -> u64 {
        (0..REFERRAL_DEPTHS)
            .map(|depth| {
                self.referral_rates
                    .values()
                    .map(|rates| rates[depth] as u64)
                    .max()
                    .unwrap_or(0)
            })
            .sum()
    }

    pub fn total_bps(&self) -> u64 {
        self.category_total_bps() + self.worst_case_referral_bps()
    }

    pub fn validate(&self) -> Result<()> {
        for (category, entry) in &self.categories {
            if entry.rate_bps > BPS_DENOMINATOR {
                return Err(QuotaError::config(format!(
                    "{category} rate {} bps exceeds {BPS_DENOMINATOR}",
                    entry.rate_bps
                )));
            }
            if entry.pool.is_some_and(|p| p.is_root()) {
                return Err(QuotaError::config(format!(
                    "{category} pool cannot be the root sentinel"
                )));
            }
        }
        for (tier, rates) in &self.referral_rates {
            if *tier > MAX_TIER {
                return Err(QuotaError::config(format!(
                    "tier {tier} outside 0..={MAX_TIER}"
                )));
            }
            if let Some(rate) = rates.iter().find(|r| **r > BPS_DENOMINATOR) {
                return Err(QuotaError::config(format!(
                    "tier {tier} referral rate {rate} bps exceeds {BPS_DENOMINATOR}"
                )));
            }
        }

        let total = self.total_bps();
        if total > BPS_DENOMINATOR as u64 {
            return Err(QuotaError::config(format!(
                "configured distribution totals {total} bps (categories {} + worst-case referral {}), above {BPS_DENOMINATOR}",
                self.category_total_bps(),
                self.worst_case_referral_bps()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Owner of the [`TaxConfig`]. Reads are side-effect free; every mutation is
/// governance-only and validated against the full table before it lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxManager {
    governor: Governor,
    config: TaxConfig,
}

impl TaxManager {
    pub fn new(admin: AccountId) -> Self {
        Self {
            governor: Governor::new(admin),
            config: TaxConfig::default(),
        }
    }

    pub fn with_config(admin: AccountId, config: TaxConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            governor: Governor::new(admin),
            config,
        })
    }

    pub fn set_rate(&mut self, caller: &AccountId, category: TaxCategory, bps: Bps) -> Result<()> {
        self.governor.ensure(caller, "set tax rates")?;
        self.update(|config| {
            config.categories.entry(category).or_default().rate_bps = bps;
        })?;
        info!(target: "tax", category = %category, bps, "tax rate updated");
        Ok(())
    }

    pub fn set_pool(
        &mut self,
        caller: &AccountId,
        category: TaxCategory,
        pool: AccountId,
    ) -> Result<()> {
        self.governor.ensure(caller, "set tax pools")?;
        if pool.is_root() {
            return Err(QuotaError::InvalidAccount(
                "the root sentinel cannot receive taxes".into(),
            ));
        }
        self.update(|config| {
            config.categories.entry(category).or_default().pool = Some(pool);
        })?;
        info!(target: "tax", category = %category, pool = %pool, "tax pool updated");
        Ok(())
    }

    /// Set the referral rate of `tier` for every chain depth at once.
    pub fn set_bulk_referral_rate(
        &mut self,
        caller: &AccountId,
        tier: u8,
        rates: ReferralRates,
    ) -> Result<()> {
        self.governor.ensure(caller, "set referral rates")?;
        if tier > MAX_TIER {
            return Err(QuotaError::config(format!(
                "tier {tier} outside 0..={MAX_TIER}"
            )));
        }
        self.update(|config| {
            config.referral_rates.insert(tier, rates);
        })?;
        info!(target: "tax", tier, ?rates, "referral rates updated");
        Ok(())
    }

    /// Remove the referral rates of `tier`; ancestors at that tier then earn nothing.
    pub fn clear_referral_rate(&mut self, caller: &AccountId, tier: u8) -> Result<()> {
        self.governor.ensure(caller, "set referral rates")?;
        self.update(|config| {
            config.referral_rates.remove(&tier);
        })?;
        info!(target: "tax", tier, "referral rates cleared");
        Ok(())
    }

    /// Replace the whole table in one step.
    pub fn apply_config(&mut self, caller: &AccountId, config: TaxConfig) -> Result<()> {
        self.governor.ensure(caller, "replace the tax table")?;
        config.validate()?;
        self.config = config;
        info!(
            target: "tax",
            total_bps = self.config.total_bps(),
            "tax table replaced"
        );
        Ok(())
    }

    pub fn transfer_governance(&mut self, caller: &AccountId, new_admin: AccountId) -> Result<()> {
        self.governor.transfer(caller, new_admin)
    }

    fn update(&mut self, mutate: impl FnOnce(&mut TaxConfig)) -> Result<()> {
        let mut candidate = self.config.clone();
        mutate(&mut candidate);
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn rate(&self, category: TaxCategory) -> Bps {
        self.config
            .categories
            .get(&category)
            .map(|e| e.rate_bps)
            .unwrap_or(0)
    }

    pub fn pool(&self, category: TaxCategory) -> Option<AccountId> {
        self.config.categories.get(&category).and_then(|e| e.pool)
    }

    /// `None` when the tier has no rates configured or `depth` is out of range.
    pub fn referral_rate(&self, tier: u8, depth: usize) -> Option<Bps> {
        self.config
            .referral_rates
            .get(&tier)
            .and_then(|rates| rates.get(depth).copied())
    }

    pub fn referral_rates(&self, tier: u8) -> Option<ReferralRates> {
        self.config.referral_rates.get(&tier).copied()
    }

    pub fn total_configured_bps(&self) -> u64 {
        self.config.total_bps()
    }

    /// Categories with a non-zero rate, in table order.
    pub fn active_categories(&self) -> impl Iterator<Item = (TaxCategory, &CategoryEntry)> + '_ {
        self.config
            .categories
            .iter()
            .filter(|(_, e)| e.rate_bps > 0)
            .map(|(c, e)| (*c, e))
    }

    pub fn config(&self) -> &TaxConfig {
        &self.config
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }
}
