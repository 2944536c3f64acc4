//! Object store client used by the reconcilers
//!
//! The reconcilers never talk to the API server directly. Every read and
//! write goes through [`ObjectStore`], which has a Kubernetes-backed
//! implementation ([`KubeStore`]) and an in-memory one ([`MemoryStore`]).

mod kubernetes;
pub mod memory;

pub use kubernetes::KubeStore;
pub use memory::MemoryStore;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRole, RoleBinding};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::Tenant;
use crate::{Error, Result};

/// Address of an object in the store
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key of a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of an existing object, taken from its metadata
    pub fn of<K: Resource>(obj: &K) -> Result<Self> {
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("metadata.name"))?;
        Ok(Self {
            namespace: obj.namespace(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A resource kind the store knows how to address
pub trait StoreResource:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Typed API handle for this kind, scoped to `namespace` when given
    fn api(client: &Client, namespace: Option<&str>) -> Api<Self>;

    /// Kind name used in logs and errors
    fn kind_name() -> String {
        Self::kind(&()).to_string()
    }
}

macro_rules! cluster_scoped {
    ($($kind:ty),* $(,)?) => {
        $(
            impl StoreResource for $kind {
                fn api(client: &Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client.clone())
                }
            }
        )*
    };
}

macro_rules! namespace_scoped {
    ($($kind:ty),* $(,)?) => {
        $(
            impl StoreResource for $kind {
                fn api(client: &Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client.clone(), ns),
                        None => Api::all(client.clone()),
                    }
                }
            }
        )*
    };
}

cluster_scoped!(Tenant, Namespace, ClusterRole);
namespace_scoped!(RoleBinding);

/// Typed access to a shared resource store
///
/// Every call is independently fallible. A missing object is `Ok(None)` from
/// [`ObjectStore::get`] and [`Error::NotFound`] from the mutating calls.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object by key
    async fn get<K: StoreResource>(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// List objects, optionally restricted to a namespace and label selector
    async fn list<K: StoreResource>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>>;

    /// Create a new object
    async fn create<K: StoreResource>(&self, obj: &K) -> Result<K>;

    /// Replace an existing object (metadata and spec, never status)
    async fn update<K: StoreResource>(&self, obj: &K) -> Result<K>;

    /// Write the status subresource of an existing object
    async fn update_status<K: StoreResource>(&self, obj: &K) -> Result<K>;

    /// Delete an object by key
    async fn delete<K: StoreResource>(&self, key: &ObjectKey) -> Result<()>;
}
