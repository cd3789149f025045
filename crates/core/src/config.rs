//! Protocol configuration.
//!
//! Operator-facing settings use account labels (or encoded keys) and decimal
//! token strings so they can be written in TOML and overridden from the
//! environment. [`ProtocolConfig::resolve`] turns them into engine types.

use quota_economics::{
    default_pool, launch_category_rates, CategoryEntry, ReferralRates, TaxCategory, TaxConfig,
    TierSchedule, TierThresholds, MAX_TIER, TRANSFER_WINDOW_SECS,
};
use quota_token::RebaseParams;
use quota_treasury::{AccrualMode, DistributionSettings, DustPolicy};
use quota_types::{format_scaled, parse_scaled, AccountId, Amount, Bps, QuotaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// SETTINGS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Governance key of every engine.
    pub admin: String,
    pub genesis: GenesisConfig,
    pub categories: Vec<CategorySetting>,
    pub tiers: Vec<TierSetting>,
    pub accrual: AccrualConfig,
    pub distribution: DistributionConfig,
    pub rebase: RebaseConfig,
    pub transfer_window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub holder: String,
    /// Initial supply in whole tokens (decimal).
    pub supply: String,
    /// Account paying out claimed rewards.
    pub reward_escrow: String,
    /// Account holding staked principal.
    pub stake_vault: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySetting {
    pub category: TaxCategory,
    pub rate_bps: Bps,
    pub pool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSetting {
    pub tier: u8,
    pub referral_rates: Option<ReferralRates>,
    pub transfer_limit_bps: Option<Bps>,
    pub thresholds: Option<ThresholdSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSetting {
    pub min_volume: String,
    pub min_membership_days: u64,
    pub min_referrals: [u32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccrualKind {
    Shared,
    FixedYield,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccrualConfig {
    pub mode: AccrualKind,
    /// Shared mode: tokens streamed per second (decimal).
    pub rate_per_second: String,
    /// Fixed-yield mode: yearly rate in bps.
    pub yearly_bps: Bps,
    /// Only whitelisted stakers may stake.
    pub restricted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub max_depth: usize,
    /// Destination of truncation dust (`{ pool = "<category>" }` or `"staker"`).
    pub dust_policy: DustPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebaseConfig {
    pub target_price: String,
    pub min_interval_secs: u64,
    pub max_change_bps: Bps,
    pub deviation_threshold_bps: Bps,
    pub rebase_lag: u32,
    pub expansion_tax_bps: Bps,
}

// =============================================================================
// DEFAULTS (launch parameters)
// =============================================================================

impl Default for ProtocolConfig {
    fn default() -> Self {
        let schedule = TierSchedule::default();
        let categories = launch_category_rates()
            .into_iter()
            .map(|(category, rate_bps)| CategorySetting {
                category,
                rate_bps,
                pool: Some(format!("pool:{}", category.as_str())),
            })
            .collect();
        let tiers = (0..=MAX_TIER)
            .map(|tier| TierSetting {
                tier,
                referral_rates: schedule.referral_rates.get(&tier).copied(),
                transfer_limit_bps: schedule.transfer_limits.get(&tier).copied(),
                thresholds: schedule.thresholds.get(&tier).map(|t| ThresholdSetting {
                    min_volume: format_scaled(t.min_volume).to_string(),
                    min_membership_days: t.min_membership_days,
                    min_referrals: t.min_referrals,
                }),
            })
            .collect();

        Self {
            admin: "admin".into(),
            genesis: GenesisConfig::default(),
            categories,
            tiers,
            accrual: AccrualConfig::default(),
            distribution: DistributionConfig::default(),
            rebase: RebaseConfig::default(),
            transfer_window_secs: TRANSFER_WINDOW_SECS,
        }
    }
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            holder: "treasury".into(),
            supply: "8888".into(),
            reward_escrow: "reward-escrow".into(),
            stake_vault: "stake-vault".into(),
        }
    }
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            mode: AccrualKind::FixedYield,
            rate_per_second: "0".into(),
            yearly_bps: 36_500,
            restricted: false,
        }
    }
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            dust_policy: DustPolicy::default(),
        }
    }
}

impl Default for RebaseConfig {
    fn default() -> Self {
        let params = RebaseParams::default();
        Self {
            target_price: format_scaled(params.target_price).to_string(),
            min_interval_secs: params.min_interval_secs,
            max_change_bps: params.max_change_bps,
            deviation_threshold_bps: params.deviation_threshold_bps,
            rebase_lag: params.rebase_lag,
            expansion_tax_bps: params.expansion_tax_bps,
        }
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Configuration with every label and amount resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub admin: AccountId,
    pub holder: AccountId,
    pub supply: Amount,
    pub tax: TaxConfig,
    pub thresholds: BTreeMap<u8, TierThresholds>,
    pub transfer_limits: BTreeMap<u8, Bps>,
    pub accrual_mode: AccrualMode,
    pub restricted: bool,
    pub vault: AccountId,
    pub distribution: DistributionSettings,
    pub rebase: RebaseParams,
    pub transfer_window_secs: u64,
}

pub fn parse_account(field: &str, value: &str) -> Result<AccountId> {
    let account = AccountId::resolve(value)
        .map_err(|e| QuotaError::config(format!("{field}: {e}")))?;
    if account.is_root() {
        return Err(QuotaError::config(format!("{field}: root sentinel not allowed")));
    }
    Ok(account)
}

pub fn parse_amount(field: &str, value: &str) -> Result<Amount> {
    parse_scaled(value).map_err(|e| QuotaError::config(format!("{field}: {e}")))
}

impl ProtocolConfig {
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let admin = parse_account("admin", &self.admin)?;
        let holder = parse_account("genesis.holder", &self.genesis.holder)?;
        let escrow = parse_account("genesis.reward_escrow", &self.genesis.reward_escrow)?;
        let vault = parse_account("genesis.stake_vault", &self.genesis.stake_vault)?;
        if escrow == vault {
            return Err(QuotaError::config("reward escrow and stake vault must differ"));
        }
        let supply = parse_amount("genesis.supply", &self.genesis.supply)?;

        let mut tax = TaxConfig::default();
        for setting in &self.categories {
            let pool = match &setting.pool {
                Some(label) => Some(parse_account(
                    &format!("categories.{}.pool", setting.category),
                    label,
                )?),
                None if setting.rate_bps > 0 => Some(default_pool(setting.category)),
                None => None,
            };
            let previous = tax.categories.insert(
                setting.category,
                CategoryEntry {
                    rate_bps: setting.rate_bps,
                    pool,
                },
            );
            if previous.is_some() {
                return Err(QuotaError::config(format!(
                    "category {} configured twice",
                    setting.category
                )));
            }
        }

        let mut thresholds = BTreeMap::new();
        let mut transfer_limits = BTreeMap::new();
        for setting in &self.tiers {
            if setting.tier > MAX_TIER {
                return Err(QuotaError::config(format!(
                    "tier {} outside 0..={MAX_TIER}",
                    setting.tier
                )));
            }
            if let Some(rates) = setting.referral_rates {
                tax.referral_rates.insert(setting.tier, rates);
            }
            if let Some(limit) = setting.transfer_limit_bps {
                transfer_limits.insert(setting.tier, limit);
            }
            if let Some(t) = &setting.thresholds {
                if setting.tier == 0 {
                    return Err(QuotaError::config("tier 0 has no thresholds"));
                }
                thresholds.insert(
                    setting.tier,
                    TierThresholds {
                        min_volume: parse_amount(
                            &format!("tiers.{}.min_volume", setting.tier),
                            &t.min_volume,
                        )?,
                        min_membership_days: t.min_membership_days,
                        min_referrals: t.min_referrals,
                    },
                );
            }
        }
        tax.validate()?;

        let accrual_mode = match self.accrual.mode {
            AccrualKind::Shared => AccrualMode::Shared {
                rate_per_second: parse_amount("accrual.rate_per_second", &self.accrual.rate_per_second)?,
            },
            AccrualKind::FixedYield => AccrualMode::from_yearly_bps(self.accrual.yearly_bps),
        };

        let rebase = RebaseParams {
            target_price: parse_amount("rebase.target_price", &self.rebase.target_price)?,
            min_interval_secs: self.rebase.min_interval_secs,
            max_change_bps: self.rebase.max_change_bps,
            deviation_threshold_bps: self.rebase.deviation_threshold_bps,
            rebase_lag: self.rebase.rebase_lag,
            expansion_tax_bps: self.rebase.expansion_tax_bps,
        };
        rebase.validate()?;

        if self.transfer_window_secs == 0 {
            return Err(QuotaError::config("transfer window must be positive"));
        }

        Ok(ResolvedConfig {
            admin,
            holder,
            supply,
            tax,
            thresholds,
            transfer_limits,
            accrual_mode,
            restricted: self.accrual.restricted,
            vault,
            distribution: DistributionSettings {
                escrow,
                max_depth: self.distribution.max_depth,
                dust_policy: self.distribution.dust_policy,
            },
            rebase,
            transfer_window_secs: self.transfer_window_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quota_economics::launch_tax_config;
    use quota_types::{tokens, ErrorKind, SCALE};

    #[test]
    fn defaults_resolve_to_launch_parameters() {
        let resolved = ProtocolConfig::default().resolve().unwrap();
        let schedule = TierSchedule::default();

        assert_eq!(resolved.tax, launch_tax_config(&schedule));
        assert_eq!(resolved.thresholds, schedule.thresholds);
        assert_eq!(resolved.transfer_limits, schedule.transfer_limits);
        assert_eq!(resolved.supply, tokens(8_888));
        assert_eq!(resolved.admin, AccountId::from_label("admin"));
        assert_eq!(resolved.distribution.max_depth, 4);
        assert_eq!(
            resolved.distribution.dust_policy,
            DustPolicy::Pool(TaxCategory::PerpetualPool)
        );
        assert_eq!(resolved.rebase, RebaseParams::default());
    }

    #[test]
    fn over_allocated_table_is_rejected() {
        let mut config = ProtocolConfig::default();
        config.categories.push(CategorySetting {
            category: TaxCategory::Dev,
            rate_bps: 10,
            pool: None,
        });
        assert_eq!(
            config.resolve().unwrap_err().kind(),
            ErrorKind::ConfigurationInvalid
        );

        let mut config = ProtocolConfig::default();
        config.categories[0].rate_bps = 4_000;
        assert_eq!(
            config.resolve().unwrap_err().kind(),
            ErrorKind::ConfigurationInvalid
        );
    }

    #[test]
    fn bad_amounts_and_accounts_are_configuration_errors() {
        let mut config = ProtocolConfig::default();
        config.genesis.supply = "12.x".into();
        assert_eq!(
            config.resolve().unwrap_err().kind(),
            ErrorKind::ConfigurationInvalid
        );

        let mut config = ProtocolConfig::default();
        config.genesis.stake_vault = config.genesis.reward_escrow.clone();
        assert!(config.resolve().is_err());

        let mut config = ProtocolConfig::default();
        config.admin = AccountId::ROOT.encode();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn toml_overrides_merge_with_defaults() {
        let config: ProtocolConfig = toml::from_str(
            r#"
            admin = "governance"

            [accrual]
            mode = "shared"
            rate_per_second = "0.1"

            [distribution]
            dust_policy = { pool = "tier_pool" }
            "#,
        )
        .unwrap();

        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.admin, AccountId::from_label("governance"));
        assert_eq!(
            resolved.accrual_mode,
            AccrualMode::Shared {
                rate_per_second: SCALE / 10
            }
        );
        assert_eq!(
            resolved.distribution.dust_policy,
            DustPolicy::Pool(TaxCategory::TierPool)
        );
        assert_eq!(resolved.tax.categories.len(), TaxCategory::ALL.len());
    }
}
