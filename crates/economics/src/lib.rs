//! Quota Economics Module
//!
//! Configuration-side engines consulted by every reward distribution:
//! - [`TaxManager`]: category rates, pool destinations, tiered referral rates
//! - [`ReferralGraph`]: acyclic referral forest with bounded chain walks
//! - [`TierEngine`]: tier thresholds, explicit tier changes, transfer limits
//! - [`params`]: launch schedule

pub mod params;
pub mod referral;
pub mod tax;
pub mod tiers;

pub use params::*;
pub use referral::*;
pub use tax::*;
pub use tiers::*;

/// Module version for API introspection
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
