//! Quota Token Module
//!
//! The base token of the economy. Balances are elastic: the
//! [`RebaseController`] moves a global scaling factor toward the target
//! price and every holder's balance follows it. [`ElasticToken`] also
//! enforces the per-tier daily transfer limits.

pub mod elastic;
pub mod rebase;

pub use elastic::{ElasticToken, RebaseReport, TokenAccount, TokenSession};
pub use rebase::{
    FixedPriceOracle, PriceOracle, RebaseController, RebaseDirection, RebaseOutcome, RebaseParams,
    RebaseState,
};
