//! RoleBinding synchronization for tenant groups

use std::collections::BTreeSet;

use k8s_openapi::api::rbac::v1::{ClusterRole, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info, warn};

use super::SyncOutcome;
use crate::store::{ObjectKey, ObjectStore};
use crate::Result;

/// API group of RBAC objects, used for both role references and subjects
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

const GROUP_KIND: &str = "Group";
const CLUSTER_ROLE_KIND: &str = "ClusterRole";

/// Deterministic name of the binding for `role` in `namespace`
pub fn role_binding_name(namespace: &str, role: &str) -> String {
    format!("{}-{}-rb", namespace, role)
}

/// Group subjects for `groups`, duplicates collapsed in first-seen order
pub fn group_subjects(groups: &[String]) -> Vec<Subject> {
    let mut seen = BTreeSet::new();
    groups
        .iter()
        .filter(|group| seen.insert(group.as_str()))
        .map(|group| Subject {
            kind: GROUP_KIND.to_string(),
            name: group.clone(),
            api_group: Some(RBAC_API_GROUP.to_string()),
            namespace: None,
        })
        .collect()
}

/// Whether the group subjects of `existing` are exactly the group set `groups`
///
/// Order and duplicates are ignored. Subjects of any other kind are not
/// compared.
pub fn subjects_match(existing: &[Subject], groups: &[String]) -> bool {
    let current: BTreeSet<&str> = existing
        .iter()
        .filter(|s| s.kind == GROUP_KIND)
        .map(|s| s.name.as_str())
        .collect();
    let desired: BTreeSet<&str> = groups.iter().map(String::as_str).collect();
    current == desired
}

/// Ensure `namespace` has a binding of cluster role `role` to exactly `groups`
pub async fn ensure_role_binding<S: ObjectStore>(
    store: &S,
    namespace: &str,
    groups: &[String],
    role: &str,
) -> Result<SyncOutcome> {
    let name = role_binding_name(namespace, role);

    // Soft check: a dangling reference is reported, the store decides whether it is fatal.
    match store.get::<ClusterRole>(&ObjectKey::cluster(role)).await {
        Ok(Some(_)) => {}
        Ok(None) => warn!(cluster_role = role, "ClusterRole not found"),
        Err(e) => warn!(cluster_role = role, error = %e, "Failed to get ClusterRole"),
    }

    let key = ObjectKey::namespaced(namespace, &name);
    let Some(mut binding) = store.get::<RoleBinding>(&key).await? else {
        info!(namespace, role_binding = %name, "Creating RoleBinding");
        let binding = RoleBinding {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: CLUSTER_ROLE_KIND.to_string(),
                name: role.to_string(),
            },
            subjects: Some(group_subjects(groups)),
        };
        store.create(&binding).await?;
        return Ok(SyncOutcome::Created);
    };

    if subjects_match(binding.subjects.as_deref().unwrap_or_default(), groups) {
        debug!(namespace, role_binding = %name, "RoleBinding already up to date");
        return Ok(SyncOutcome::Unchanged);
    }

    info!(namespace, role_binding = %name, "Updating RoleBinding subjects");
    binding.subjects = Some(group_subjects(groups));
    store.update(&binding).await?;
    Ok(SyncOutcome::Updated)
}
