//! Tenant Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tenant resource specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "multitenancy.codereliant.io",
    version = "v1",
    kind = "Tenant",
    plural = "tenants",
    singular = "tenant",
    status = "TenantStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Email", "type": "string", "description": "AdminEmail", "jsonPath": ".status.adminEmail"}"#,
    printcolumn = r#"{"name": "NamespaceCount", "type": "integer", "description": "NamespaceCount", "jsonPath": ".status.namespaceCount"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Namespaces that belong to this tenant
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Email of the tenant administrator
    #[serde(default)]
    pub admin_email: String,

    /// Groups bound to the `admin` cluster role in every tenant namespace
    #[serde(default)]
    pub admin_groups: Vec<String>,

    /// Groups bound to the `edit` cluster role in every tenant namespace
    #[serde(default)]
    pub user_groups: Vec<String>,
}

/// Tenant status, owned by the operator
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// Number of namespaces managed for this tenant
    #[serde(default)]
    pub namespace_count: i32,

    /// Mirrored administrator email
    #[serde(default)]
    pub admin_email: String,
}

impl TenantStatus {
    /// Status the operator reports once `spec` has converged
    pub fn observed(spec: &TenantSpec) -> Self {
        Self {
            namespace_count: i32::try_from(spec.namespaces.len()).unwrap_or(i32::MAX),
            admin_email: spec.admin_email.clone(),
        }
    }
}
