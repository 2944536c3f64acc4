//! Custom Resource Definitions for the Tenant Operator

mod tenant;

pub use tenant::*;

use kube::CustomResourceExt;

use crate::Result;

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Result<Vec<String>> {
    let yaml = serde_yaml::to_string(&Tenant::crd())
        .map_err(|e| crate::Error::ConfigError(format!("Failed to render Tenant CRD: {}", e)))?;
    Ok(vec![yaml])
}
