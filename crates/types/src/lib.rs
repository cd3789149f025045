//! Shared primitives for the Quota economy engines.
//!
//! - [`AccountId`]: 32-byte participant and pool keys
//! - [`fixed_point`]: 1e18-scaled integer math with wide intermediates
//! - [`QuotaError`] / [`ErrorKind`]: rejection reasons shared by every engine
//! - [`Governor`]: admin-key authorization
//! - [`Clock`]: single-read time source per operation

pub mod account;
pub mod clock;
pub mod errors;
pub mod fixed_point;
pub mod governance;

pub use account::*;
pub use clock::*;
pub use errors::*;
pub use fixed_point::*;
pub use governance::*;
