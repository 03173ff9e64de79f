//! Capability resolution for record-scoped operations
//!
//! The lifecycle services share one permission rule: a SUPER_ADMIN may
//! act on any record, a FACTORY_ADMIN only on records whose equipment
//! belongs to their assigned factory, and an INSPECTOR only on records
//! they created themselves and whose equipment is in their own factory.
//! The rule lives here as a single pure function so it can be tested
//! without touching the database.

use crate::error::{EngineError, EngineResult};
use crate::models::{Principal, Role};

/// The factory and owner a record is scoped to
#[derive(Debug, Clone, Copy)]
pub struct RecordScope {
    pub equipment_factory_id: i64,
    pub owner_id: i64,
}

/// Outcome of resolving a principal against a record scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessVerdict {
    Granted,
    Denied(DeniedReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedReason {
    /// Principal has no factory assignment to scope against
    MissingFactory,
    /// Record's equipment belongs to a different factory
    ForeignFactory,
    /// Inspector acting on a record created by someone else
    NotRecordOwner,
}

/// Resolve whether `principal` may act on a record with `scope`
pub fn resolve_access(principal: &Principal, scope: &RecordScope) -> AccessVerdict {
    match principal.role {
        Role::SuperAdmin => AccessVerdict::Granted,
        Role::FactoryAdmin => match principal.factory_id {
            None => AccessVerdict::Denied(DeniedReason::MissingFactory),
            Some(factory_id) if factory_id != scope.equipment_factory_id => {
                AccessVerdict::Denied(DeniedReason::ForeignFactory)
            }
            Some(_) => AccessVerdict::Granted,
        },
        Role::Inspector => match principal.factory_id {
            None => AccessVerdict::Denied(DeniedReason::MissingFactory),
            Some(factory_id) if factory_id != scope.equipment_factory_id => {
                AccessVerdict::Denied(DeniedReason::ForeignFactory)
            }
            Some(_) if principal.id != scope.owner_id => {
                AccessVerdict::Denied(DeniedReason::NotRecordOwner)
            }
            Some(_) => AccessVerdict::Granted,
        },
    }
}

impl AccessVerdict {
    /// Convert the verdict into a service-layer result
    pub fn require(self, operation: &str) -> EngineResult<()> {
        match self {
            AccessVerdict::Granted => Ok(()),
            AccessVerdict::Denied(_) => Err(EngineError::PermissionDenied {
                operation: operation.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: i64, role: Role, factory_id: Option<i64>) -> Principal {
        Principal {
            id,
            role,
            factory_id,
        }
    }

    const SCOPE: RecordScope = RecordScope {
        equipment_factory_id: 1,
        owner_id: 3,
    };

    #[test]
    fn test_super_admin_acts_anywhere() {
        let p = principal(99, Role::SuperAdmin, None);
        assert_eq!(resolve_access(&p, &SCOPE), AccessVerdict::Granted);
    }

    #[test]
    fn test_factory_admin_scoped_to_own_factory() {
        let own = principal(7, Role::FactoryAdmin, Some(1));
        assert_eq!(resolve_access(&own, &SCOPE), AccessVerdict::Granted);

        let other = principal(7, Role::FactoryAdmin, Some(2));
        assert_eq!(
            resolve_access(&other, &SCOPE),
            AccessVerdict::Denied(DeniedReason::ForeignFactory)
        );

        let unassigned = principal(7, Role::FactoryAdmin, None);
        assert_eq!(
            resolve_access(&unassigned, &SCOPE),
            AccessVerdict::Denied(DeniedReason::MissingFactory)
        );
    }

    #[test]
    fn test_inspector_needs_ownership_and_factory() {
        let owner = principal(3, Role::Inspector, Some(1));
        assert_eq!(resolve_access(&owner, &SCOPE), AccessVerdict::Granted);

        let colleague = principal(4, Role::Inspector, Some(1));
        assert_eq!(
            resolve_access(&colleague, &SCOPE),
            AccessVerdict::Denied(DeniedReason::NotRecordOwner)
        );

        // Owner id matching is not enough when the factory differs
        let transferred = principal(3, Role::Inspector, Some(2));
        assert_eq!(
            resolve_access(&transferred, &SCOPE),
            AccessVerdict::Denied(DeniedReason::ForeignFactory)
        );
    }

    #[test]
    fn test_require_maps_denial_to_permission_denied() {
        let p = principal(4, Role::Inspector, Some(1));
        let err = resolve_access(&p, &SCOPE).require("finalize inspection");
        assert!(matches!(
            err,
            Err(crate::error::EngineError::PermissionDenied { .. })
        ));
    }
}
