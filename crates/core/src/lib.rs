//! Quota protocol executor.
//!
//! [`Protocol`] owns one instance of every engine, runs each operation
//! atomically against it and commits the result to a [`StateStore`].
//!
//! [`StateStore`]: quota_storage::StateStore

pub mod config;
pub mod error;
pub mod protocol;
pub mod state;

pub use config::{
    parse_account, parse_amount, AccrualConfig, AccrualKind, CategorySetting, DistributionConfig,
    GenesisConfig, ProtocolConfig, RebaseConfig, ResolvedConfig, ThresholdSetting, TierSetting,
};
pub use error::{ProtocolError, ProtocolResult};
pub use protocol::{ClaimOutcome, Protocol};
pub use state::ProtocolState;
