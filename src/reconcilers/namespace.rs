//! Namespace synchronization for tenant namespaces

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use super::SyncOutcome;
use crate::store::{ObjectKey, ObjectStore};
use crate::Result;

/// Annotation carrying the tenant administrator email
pub const ADMIN_EMAIL_ANNOTATION: &str = "adminEmail";

/// Annotation marking a namespace as operator-managed
pub const MANAGED_BY_ANNOTATION: &str = "managed-by";

/// Value of [`MANAGED_BY_ANNOTATION`]
pub const MANAGED_BY_VALUE: &str = "tenant-operator";

/// Annotations every tenant namespace must carry
pub fn desired_annotations(admin_email: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ADMIN_EMAIL_ANNOTATION.to_string(), admin_email.to_string()),
        (MANAGED_BY_ANNOTATION.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// Ensure `name` exists and carries the tenant annotations
///
/// Unrelated annotations on an existing namespace are left alone. All
/// mismatched keys are written in a single update.
pub async fn ensure_namespace<S: ObjectStore>(
    store: &S,
    admin_email: &str,
    name: &str,
) -> Result<SyncOutcome> {
    let desired = desired_annotations(admin_email);

    let Some(mut namespace) = store.get::<Namespace>(&ObjectKey::cluster(name)).await? else {
        info!(namespace = name, "Creating Namespace");
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(desired),
                ..Default::default()
            },
            ..Default::default()
        };
        store.create(&namespace).await?;
        return Ok(SyncOutcome::Created);
    };

    let annotations = namespace.annotations_mut();
    let mut changed = Vec::new();
    for (key, value) in desired {
        if annotations.get(&key) != Some(&value) {
            changed.push(key.clone());
            annotations.insert(key, value);
        }
    }

    if changed.is_empty() {
        debug!(namespace = name, "Namespace already up to date");
        return Ok(SyncOutcome::Unchanged);
    }

    info!(namespace = name, annotations = ?changed, "Updating namespace annotations");
    store.update(&namespace).await?;
    Ok(SyncOutcome::Updated)
}
