//! # Admin Principal
//!
//! Exactly one principal may write to the registry at any time. The holder
//! can hand the role to another principal; every handover is recorded.

use farmcert_core::{PrincipalId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::registry::RegistryError;

/// A completed admin handover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminTransfer {
    /// Previous holder.
    pub from: PrincipalId,
    /// New holder.
    pub to: PrincipalId,
    /// When the handover was applied.
    pub at: Timestamp,
}

/// The single privileged identity authorized to issue and revoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminPrincipal {
    current: PrincipalId,
    since: Timestamp,
    transfers: Vec<AdminTransfer>,
}

impl AdminPrincipal {
    /// Install `initial` as the admin from `since`.
    pub fn new(initial: PrincipalId, since: Timestamp) -> Self {
        Self {
            current: initial,
            since,
            transfers: Vec::new(),
        }
    }

    /// The current holder.
    pub fn current(&self) -> &PrincipalId {
        &self.current
    }

    /// When the current holder took over.
    pub fn since(&self) -> Timestamp {
        self.since
    }

    /// All handovers, oldest first.
    pub fn transfers(&self) -> &[AdminTransfer] {
        &self.transfers
    }

    /// Fail with `Unauthorized` unless `caller` is the current holder.
    pub fn authorize(&self, caller: &PrincipalId) -> Result<(), RegistryError> {
        if caller == &self.current {
            Ok(())
        } else {
            Err(RegistryError::Unauthorized {
                caller: caller.clone(),
            })
        }
    }

    /// Hand the role to `new_admin`. Only the current holder may do this.
    pub fn transfer(
        &mut self,
        caller: &PrincipalId,
        new_admin: PrincipalId,
        at: Timestamp,
    ) -> Result<&AdminTransfer, RegistryError> {
        self.authorize(caller)?;
        if new_admin == self.current {
            return Err(RegistryError::InvalidArgument(format!(
                "{new_admin} already holds the admin role"
            )));
        }
        let from = std::mem::replace(&mut self.current, new_admin.clone());
        self.since = at;
        self.transfers.push(AdminTransfer {
            from,
            to: new_admin,
            at,
        });
        Ok(&self.transfers[self.transfers.len() - 1])
    }
}
