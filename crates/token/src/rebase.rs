//! Price-driven supply control.
//!
//! Once per interval the observed price is compared with the target. A
//! deviation below the threshold consumes the epoch without touching the
//! factor; otherwise the factor moves by `deviation / lag`, capped at
//! `max_change_bps` per epoch, up when the price is above target and down
//! when it is below.

use quota_types::{
    bps_to_scaled, checked_add, mul_div, Amount, Bps, Governor, QuotaError, Result, Timestamp,
    AccountId, BPS_DENOMINATOR, SCALE,
};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// PARAMETERS & STATE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseParams {
    /// Target price (scaled, `SCALE` = 1.0 quote unit).
    pub target_price: Amount,
    pub min_interval_secs: u64,
    /// Largest factor change per epoch. Must stay below 10000.
    pub max_change_bps: Bps,
    /// Deviations below this leave the factor untouched.
    pub deviation_threshold_bps: Bps,
    /// Divisor applied to the deviation before capping.
    pub rebase_lag: u32,
    /// Share of each supply expansion minted to the perpetual pool.
    pub expansion_tax_bps: Bps,
}

impl Default for RebaseParams {
    fn default() -> Self {
        Self {
            target_price: SCALE,
            min_interval_secs: 86_400,
            max_change_bps: 1_000,
            deviation_threshold_bps: 500,
            rebase_lag: 10,
            expansion_tax_bps: 0,
        }
    }
}

impl RebaseParams {
    pub fn validate(&self) -> Result<()> {
        if self.target_price == 0 {
            return Err(QuotaError::config("target price must be positive"));
        }
        if self.min_interval_secs == 0 {
            return Err(QuotaError::config("rebase interval must be positive"));
        }
        if self.max_change_bps == 0 || self.max_change_bps >= BPS_DENOMINATOR {
            return Err(QuotaError::config(format!(
                "max change {} bps outside 1..{BPS_DENOMINATOR}",
                self.max_change_bps
            )));
        }
        if self.deviation_threshold_bps > BPS_DENOMINATOR {
            return Err(QuotaError::config(format!(
                "deviation threshold {} bps above {BPS_DENOMINATOR}",
                self.deviation_threshold_bps
            )));
        }
        if self.rebase_lag == 0 {
            return Err(QuotaError::config("rebase lag must be at least 1"));
        }
        if self.expansion_tax_bps > BPS_DENOMINATOR {
            return Err(QuotaError::config(format!(
                "expansion tax {} bps above {BPS_DENOMINATOR}",
                self.expansion_tax_bps
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseState {
    /// Elastic units per base unit (scaled).
    pub scaling_factor: u128,
    /// `None` until the first rebase.
    pub last_rebase_at: Option<Timestamp>,
    pub last_price: Amount,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebaseDirection {
    Expansion,
    Contraction,
    Neutral,
}

/// Result of one rebase epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseOutcome {
    pub epoch: u64,
    pub price: Amount,
    /// `|price - target| / target` (scaled).
    pub deviation: u128,
    pub direction: RebaseDirection,
    pub previous_factor: u128,
    pub scaling_factor: u128,
    pub at: Timestamp,
}

// =============================================================================
// CONTROLLER
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseController {
    governor: Governor,
    params: RebaseParams,
    state: RebaseState,
}

impl RebaseController {
    pub fn new(admin: AccountId, params: RebaseParams) -> Result<Self> {
        params.validate()?;
        let state = RebaseState {
            scaling_factor: SCALE,
            last_rebase_at: None,
            last_price: params.target_price,
            epoch: 0,
        };
        Ok(Self {
            governor: Governor::new(admin),
            params,
            state,
        })
    }

    /// Earliest time the next rebase is accepted.
    pub fn next_allowed_at(&self) -> Timestamp {
        match self.state.last_rebase_at {
            Some(last) => last.saturating_add(self.params.min_interval_secs),
            None => 0,
        }
    }

    /// Compute the epoch `price` would produce at `now`. Changes nothing.
    pub fn preview(&self, price: Amount, now: Timestamp) -> Result<RebaseOutcome> {
        let next_allowed = self.next_allowed_at();
        if now < next_allowed {
            return Err(QuotaError::TooEarly {
                now,
                next_allowed,
            });
        }
        if price == 0 {
            return Err(QuotaError::invalid_amount("observed price is zero"));
        }

        let target = self.params.target_price;
        let (gap, direction) = if price >= target {
            (price - target, RebaseDirection::Expansion)
        } else {
            (target - price, RebaseDirection::Contraction)
        };
        let deviation = mul_div(gap, SCALE, target)?;
        let previous_factor = self.state.scaling_factor;
        let epoch = self.state.epoch + 1;

        if deviation < bps_to_scaled(self.params.deviation_threshold_bps) || gap == 0 {
            return Ok(RebaseOutcome {
                epoch,
                price,
                deviation,
                direction: RebaseDirection::Neutral,
                previous_factor,
                scaling_factor: previous_factor,
                at: now,
            });
        }

        let adjustment =
            (deviation / self.params.rebase_lag as u128).min(bps_to_scaled(self.params.max_change_bps));
        let delta = mul_div(previous_factor, adjustment, SCALE)?;
        let scaling_factor = match direction {
            RebaseDirection::Expansion => checked_add(previous_factor, delta)?,
            _ => previous_factor.saturating_sub(delta).max(1),
        };

        Ok(RebaseOutcome {
            epoch,
            price,
            deviation,
            direction,
            previous_factor,
            scaling_factor,
            at: now,
        })
    }

    /// Record a previewed epoch.
    pub(crate) fn commit(&mut self, outcome: &RebaseOutcome) {
        self.state.scaling_factor = outcome.scaling_factor;
        self.state.last_rebase_at = Some(outcome.at);
        self.state.last_price = outcome.price;
        self.state.epoch = outcome.epoch;

        info!(
            target: "rebase",
            epoch = outcome.epoch,
            price = outcome.price,
            direction = ?outcome.direction,
            previous_factor = outcome.previous_factor,
            scaling_factor = outcome.scaling_factor,
            "rebase epoch"
        );
    }

    pub fn rebase(&mut self, price: Amount, now: Timestamp) -> Result<RebaseOutcome> {
        let outcome = self.preview(price, now)?;
        self.commit(&outcome);
        Ok(outcome)
    }

    pub fn set_params(&mut self, caller: &AccountId, params: RebaseParams) -> Result<()> {
        self.governor.ensure(caller, "set rebase parameters")?;
        params.validate()?;
        info!(target: "rebase", ?params, "rebase parameters updated");
        self.params = params;
        Ok(())
    }

    pub fn transfer_governance(&mut self, caller: &AccountId, new_admin: AccountId) -> Result<()> {
        self.governor.transfer(caller, new_admin)
    }

    pub fn params(&self) -> &RebaseParams {
        &self.params
    }

    pub fn state(&self) -> &RebaseState {
        &self.state
    }

    pub fn scaling_factor(&self) -> u128 {
        self.state.scaling_factor
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }
}

// =============================================================================
// PRICE SOURCE
// =============================================================================

/// Source of the observed market price (scaled).
pub trait PriceOracle {
    fn observed_price(&self) -> Result<Amount>;
}

/// Oracle returning a configured price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPriceOracle {
    price: Amount,
}

impl FixedPriceOracle {
    pub fn new(price: Amount) -> Self {
        Self { price }
    }

    pub fn set(&mut self, price: Amount) {
        self.price = price;
    }
}

impl PriceOracle for FixedPriceOracle {
    fn observed_price(&self) -> Result<Amount> {
        Ok(self.price)
    }
}
