//! Launch parameters.
//!
//! These reproduce the rates the token shipped with and are what a fresh
//! deployment starts from unless the operator configures otherwise.

use crate::tax::{CategoryEntry, ReferralRates, TaxCategory, TaxConfig};
use crate::tiers::{TierThresholds, SECONDS_PER_DAY};
use quota_types::{tokens, AccountId, Bps};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tier schedule: thresholds, referral rates and daily transfer limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSchedule {
    pub thresholds: BTreeMap<u8, TierThresholds>,
    pub referral_rates: BTreeMap<u8, ReferralRates>,
    pub transfer_limits: BTreeMap<u8, Bps>,
}

impl Default for TierSchedule {
    fn default() -> Self {
        let thresholds = BTreeMap::from([
            (
                1,
                TierThresholds {
                    min_volume: tokens(5),
                    min_membership_days: 3,
                    min_referrals: [3, 0, 0, 0],
                },
            ),
            (
                2,
                TierThresholds {
                    min_volume: tokens(20),
                    min_membership_days: 5,
                    min_referrals: [10, 5, 0, 0],
                },
            ),
            (
                3,
                TierThresholds {
                    min_volume: tokens(60),
                    min_membership_days: 10,
                    min_referrals: [20, 10, 5, 0],
                },
            ),
            (
                4,
                TierThresholds {
                    min_volume: tokens(150),
                    min_membership_days: 14,
                    min_referrals: [50, 20, 10, 5],
                },
            ),
        ]);

        // Tier 0 is configured explicitly at zero so that its ancestors pay nothing.
        let referral_rates = BTreeMap::from([
            (0, [0, 0, 0, 0]),
            (1, [450, 100, 20, 4]),
            (2, [700, 150, 30, 6]),
            (3, [950, 200, 40, 8]),
            (4, [1_200, 250, 50, 10]),
        ]);

        // Share of the window-start balance movable per day.
        let transfer_limits = BTreeMap::from([
            (0, 2_000),
            (1, 2_000),
            (2, 3_000),
            (3, 4_000),
            (4, 5_000),
        ]);

        Self {
            thresholds,
            referral_rates,
            transfer_limits,
        }
    }
}

/// Launch tax rates per category (bps of each gross reward).
pub fn launch_category_rates() -> [(TaxCategory, Bps); 9] {
    [
        (TaxCategory::SelfTax, 500),
        (TaxCategory::DirectReferrer, 500),
        (TaxCategory::Maintenance, 100),
        (TaxCategory::Dev, 1_250),
        (TaxCategory::Revenue, 1_250),
        (TaxCategory::PerpetualPool, 450),
        (TaxCategory::RewardAllocation, 50),
        (TaxCategory::Marketing, 450),
        (TaxCategory::TierPool, 1_450),
    ]
}

/// Well-known pool account for a category (`blake3("pool:<category>")`).
pub fn default_pool(category: TaxCategory) -> AccountId {
    AccountId::from_label(&format!("pool:{}", category.as_str()))
}

/// Full launch tax table with default pool accounts.
pub fn launch_tax_config(schedule: &TierSchedule) -> TaxConfig {
    let categories = launch_category_rates()
        .into_iter()
        .map(|(category, rate_bps)| {
            (
                category,
                CategoryEntry {
                    rate_bps,
                    pool: Some(default_pool(category)),
                },
            )
        })
        .collect();
    TaxConfig {
        categories,
        referral_rates: schedule.referral_rates.clone(),
    }
}

/// Length of a transfer-limit window.
pub const TRANSFER_WINDOW_SECS: u64 = SECONDS_PER_DAY;
