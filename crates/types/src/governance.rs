use crate::account::AccountId;
use crate::errors::{QuotaError, Result};
use serde::{Deserialize, Serialize};

/// Admin key guarding every configuration mutation of a component.
///
/// Authorization is a plain key-equality check and fails closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Governor {
    admin: AccountId,
}

impl Governor {
    pub fn new(admin: AccountId) -> Self {
        Self { admin }
    }

    pub fn admin(&self) -> AccountId {
        self.admin
    }

    pub fn ensure(&self, caller: &AccountId, action: &str) -> Result<()> {
        if *caller == self.admin {
            Ok(())
        } else {
            Err(QuotaError::Unauthorized(format!(
                "{caller} may not {action}"
            )))
        }
    }

    /// Hand governance to `new_admin`. Only the current admin may do this.
    pub fn transfer(&mut self, caller: &AccountId, new_admin: AccountId) -> Result<()> {
        self.ensure(caller, "transfer governance")?;
        if new_admin.is_root() {
            return Err(QuotaError::InvalidAccount(
                "governance cannot be handed to the root sentinel".into(),
            ));
        }
        self.admin = new_admin;
        Ok(())
    }
}
