//! Reconciliation logic for Tenant resources

pub mod cleanup;
pub mod namespace;
pub mod role_binding;
pub mod tenant;

pub use tenant::{ReconcileOutcome, TenantReconciler, ADMIN_ROLE, EDIT_ROLE, FINALIZER};

/// Result of a single synchronizer call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}
