//! Quota Treasury Module
//!
//! Moves value for the staking side of the economy:
//! - [`RewardAccrual`]: snapshot-diff reward ledger for stake positions
//! - [`DistributionEngine`]: exact split of each claimed reward
//! - [`AccountLedger`]: transfer seam implemented by every token ledger

pub mod account_ledger;
pub mod distribution;
pub mod reward_accrual;

pub use account_ledger::{AccountLedger, InMemoryAccountLedger, MockAccountLedger};
pub use distribution::{
    DistributionEngine, DistributionPlan, DistributionReceipt, DistributionSettings,
    DistributionStats, DustPolicy, Payout, PayoutKind,
};
pub use reward_accrual::{AccrualMode, RewardAccrual, StakePosition, SECONDS_PER_YEAR};
