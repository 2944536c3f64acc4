//! Finalizer-gated state machine for Tenant resources
//!
//! Every invocation re-reads the Tenant from the store and drives the
//! namespaces and role bindings it names toward the spec. All steps are
//! idempotent, so a failed invocation is simply delivered again; nothing is
//! rolled back. Invocations for the same Tenant must not overlap, which the
//! delivering controller guarantees.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::cleanup::delete_tenant_namespaces;
use super::namespace::ensure_namespace;
use super::role_binding::ensure_role_binding;
use crate::crd::{Tenant, TenantStatus};
use crate::store::{ObjectKey, ObjectStore};
use crate::{Error, Result};

/// Finalizer that holds a Tenant until its namespaces are gone
pub const FINALIZER: &str = "tenant.codereliant.io/finalizer";

/// Cluster role bound to the tenant admin groups
pub const ADMIN_ROLE: &str = "admin";

/// Cluster role bound to the tenant user groups
pub const EDIT_ROLE: &str = "edit";

/// How an invocation ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No such Tenant, either never created or already gone
    NotFound,
    /// Namespaces, role bindings and status match the spec
    Converged { namespaces: usize },
    /// Namespaces were deleted and the finalizer removed
    CleanedUp { namespaces: usize },
    /// Tenant is being deleted and carries no finalizer of ours
    Released,
}

impl ReconcileOutcome {
    /// Controller action for this outcome
    pub fn action(&self, resync: Duration) -> Action {
        match self {
            ReconcileOutcome::Converged { .. } => Action::requeue(resync),
            _ => Action::await_change(),
        }
    }
}

/// Reconciles one Tenant per call against an [`ObjectStore`]
pub struct TenantReconciler<S> {
    store: Arc<S>,
}

impl<S> Clone for TenantReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ObjectStore> TenantReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Store the reconciler reads from and writes to
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile the Tenant called `name`
    ///
    /// When `cancel` fires the in-flight store call is dropped and
    /// [`Error::Cancelled`] is returned.
    pub async fn reconcile(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.reconcile_tenant(name) => result,
        }
    }

    async fn reconcile_tenant(&self, name: &str) -> Result<ReconcileOutcome> {
        let Some(tenant) = self.store.get::<Tenant>(&ObjectKey::cluster(name)).await? else {
            debug!(tenant = name, "Tenant not found, nothing to reconcile");
            return Ok(ReconcileOutcome::NotFound);
        };

        if tenant.metadata.deletion_timestamp.is_none() {
            self.apply(tenant).await
        } else {
            self.cleanup(tenant).await
        }
    }

    async fn apply(&self, mut tenant: Tenant) -> Result<ReconcileOutcome> {
        let name = tenant.name_any();

        // The finalizer must be persisted before anything is created for the tenant.
        if !has_finalizer(&tenant) {
            info!(tenant = %name, "Adding finalizer");
            tenant.finalizers_mut().push(FINALIZER.to_string());
            tenant = self.store.update(&tenant).await.map_err(|e| {
                error!(tenant = %name, error = %e, "Unable to add finalizer to Tenant");
                e
            })?;
        }

        let spec = &tenant.spec;
        for ns in &spec.namespaces {
            ensure_namespace(self.store(), &spec.admin_email, ns)
                .await
                .map_err(|e| {
                    error!(tenant = %name, namespace = %ns, error = %e, "Unable to ensure Namespace");
                    e
                })?;

            ensure_role_binding(self.store(), ns, &spec.admin_groups, ADMIN_ROLE)
                .await
                .map_err(|e| {
                    error!(tenant = %name, namespace = %ns, error = %e, "Unable to ensure admin RoleBinding");
                    e
                })?;

            ensure_role_binding(self.store(), ns, &spec.user_groups, EDIT_ROLE)
                .await
                .map_err(|e| {
                    error!(tenant = %name, namespace = %ns, error = %e, "Unable to ensure edit RoleBinding");
                    e
                })?;
        }

        let namespaces = tenant.spec.namespaces.len();
        let desired = TenantStatus::observed(&tenant.spec);
        if tenant.status.as_ref() != Some(&desired) {
            tenant.status = Some(desired);
            self.store.update_status(&tenant).await.map_err(|e| {
                error!(tenant = %name, error = %e, "Unable to update Tenant status");
                e
            })?;
            info!(tenant = %name, namespaces, "Updated Tenant status");
        }

        Ok(ReconcileOutcome::Converged { namespaces })
    }

    async fn cleanup(&self, mut tenant: Tenant) -> Result<ReconcileOutcome> {
        let name = tenant.name_any();

        if !has_finalizer(&tenant) {
            debug!(tenant = %name, "Tenant is being deleted and holds no finalizer");
            return Ok(ReconcileOutcome::Released);
        }

        info!(tenant = %name, "Finalizer found, cleaning up resources");
        let report = delete_tenant_namespaces(self.store(), &tenant)
            .await
            .map_err(|e| {
                error!(tenant = %name, error = %e, "Failed to cleanup resources");
                e
            })?;
        info!(
            tenant = %name,
            deleted = report.deleted.len(),
            already_absent = report.already_absent.len(),
            "Resource cleanup succeeded"
        );

        // Releasing the finalizer lets the API server remove the Tenant.
        tenant.finalizers_mut().retain(|f| f != FINALIZER);
        self.store.update(&tenant).await.map_err(|e| {
            error!(tenant = %name, error = %e, "Unable to remove finalizer from Tenant");
            e
        })?;

        Ok(ReconcileOutcome::CleanedUp {
            namespaces: tenant.spec.namespaces.len(),
        })
    }
}

fn has_finalizer(tenant: &Tenant) -> bool {
    tenant.finalizers().iter().any(|f| f == FINALIZER)
}
