//! Complete protocol state and its persisted sections.

use crate::config::ResolvedConfig;
use crate::error::{ProtocolError, ProtocolResult};
use quota_economics::{ReferralGraph, TaxManager, TierEngine};
use quota_storage::{SectionBatch, StateStore};
use quota_token::ElasticToken;
use quota_treasury::{DistributionEngine, InMemoryAccountLedger, RewardAccrual};
use quota_types::{Result, Timestamp};
use serde::de::DeserializeOwned;

pub const TAX_SECTION: &str = "tax";
pub const TIERS_SECTION: &str = "tiers";
pub const REFERRALS_SECTION: &str = "referrals";
pub const ACCRUAL_SECTION: &str = "accrual";
pub const DISTRIBUTION_SECTION: &str = "distribution";
pub const TOKEN_SECTION: &str = "token";
pub const STAKE_TOKEN_SECTION: &str = "stake_token";

/// Every engine of one protocol instance.
#[derive(Debug, Clone)]
pub struct ProtocolState {
    pub tax: TaxManager,
    pub tiers: TierEngine,
    pub referrals: ReferralGraph,
    pub accrual: RewardAccrual,
    pub distribution: DistributionEngine,
    pub token: ElasticToken,
    /// Token locked by stakers (kept apart from the elastic token so
    /// principal is not moved by rebases).
    pub stake_token: InMemoryAccountLedger,
}

impl ProtocolState {
    pub fn genesis(config: &ResolvedConfig, now: Timestamp) -> Result<Self> {
        let admin = config.admin;

        let tax = TaxManager::with_config(admin, config.tax.clone())?;

        let mut tiers = TierEngine::new(admin);
        for (tier, thresholds) in &config.thresholds {
            tiers.set_thresholds(&admin, *tier, *thresholds)?;
        }
        for (tier, bps) in &config.transfer_limits {
            tiers.set_transfer_limit(&admin, *tier, *bps)?;
        }

        let mut accrual = RewardAccrual::new(admin, config.vault, config.accrual_mode, now);
        if config.restricted {
            accrual.set_restricted(&admin, true)?;
        }

        let distribution = DistributionEngine::new(admin, config.distribution.clone())?;

        let mut token = ElasticToken::new(admin, config.rebase.clone())?
            .with_window(config.transfer_window_secs)?;
        token.whitelist(&admin, &config.distribution.escrow, true)?;
        token.whitelist(&admin, &config.holder, true)?;
        if config.supply > 0 {
            token.mint(&admin, &config.holder, config.supply)?;
        }

        Ok(Self {
            tax,
            tiers,
            referrals: ReferralGraph::new(),
            accrual,
            distribution,
            token,
            stake_token: InMemoryAccountLedger::new(),
        })
    }

    pub fn to_batch(&self) -> ProtocolResult<SectionBatch> {
        let mut batch = SectionBatch::new();
        batch.put(TAX_SECTION, &self.tax)?;
        batch.put(TIERS_SECTION, &self.tiers)?;
        batch.put(REFERRALS_SECTION, &self.referrals)?;
        batch.put(ACCRUAL_SECTION, &self.accrual)?;
        batch.put(DISTRIBUTION_SECTION, &self.distribution)?;
        batch.put(TOKEN_SECTION, &self.token)?;
        batch.put(STAKE_TOKEN_SECTION, &self.stake_token)?;
        Ok(batch)
    }

    pub fn load<S: StateStore>(store: &S) -> ProtocolResult<Self> {
        Ok(Self {
            tax: section(store, TAX_SECTION)?,
            tiers: section(store, TIERS_SECTION)?,
            referrals: section(store, REFERRALS_SECTION)?,
            accrual: section(store, ACCRUAL_SECTION)?,
            distribution: section(store, DISTRIBUTION_SECTION)?,
            token: section(store, TOKEN_SECTION)?,
            stake_token: section(store, STAKE_TOKEN_SECTION)?,
        })
    }
}

fn section<S: StateStore, T: DeserializeOwned>(store: &S, name: &str) -> ProtocolResult<T> {
    store
        .load(name)?
        .ok_or_else(|| ProtocolError::MissingSection(name.to_string()))
}
