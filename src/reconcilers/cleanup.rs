//! Namespace cleanup for deleted tenants

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{error, info};

use crate::crd::Tenant;
use crate::store::{ObjectKey, ObjectStore};
use crate::Result;

/// What a cleanup pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Namespaces removed by this pass
    pub deleted: Vec<String>,
    /// Namespaces that were already gone
    pub already_absent: Vec<String>,
}

/// Delete every namespace listed in the tenant spec
///
/// Role bindings go with their namespace. A missing namespace counts as
/// clean; any other failure stops the pass.
pub async fn delete_tenant_namespaces<S: ObjectStore>(
    store: &S,
    tenant: &Tenant,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    for ns in &tenant.spec.namespaces {
        match store.delete::<Namespace>(&ObjectKey::cluster(ns)).await {
            Ok(()) => {
                info!(namespace = %ns, "Namespace deleted");
                report.deleted.push(ns.clone());
            }
            Err(e) if e.is_not_found() => report.already_absent.push(ns.clone()),
            Err(e) => {
                error!(namespace = %ns, error = %e, "Unable to delete Namespace");
                return Err(e);
            }
        }
    }

    info!(tenant = %tenant.name_any(), "All resources deleted for tenant");
    Ok(report)
}
