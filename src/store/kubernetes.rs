//! Kubernetes API server backed store

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::Value;

use super::{ObjectKey, ObjectStore, StoreResource};
use crate::{Error, Result};

/// Store backed by a live `kube::Client`
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store on top of an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreResource>(&self, key: &ObjectKey) -> Result<Option<K>> {
        K::api(&self.client, key.namespace.as_deref())
            .get_opt(&key.name)
            .await
            .map_err(|e| api_error::<K>(key, e))
    }

    async fn list<K: StoreResource>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        let list = K::api(&self.client, namespace)
            .list(&params)
            .await
            .map_err(|e| {
                Error::KubeError(format!("Failed to list {}: {}", K::kind_name(), e))
            })?;

        Ok(list.items)
    }

    async fn create<K: StoreResource>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj)?;
        K::api(&self.client, key.namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| api_error::<K>(&key, e))
    }

    async fn update<K: StoreResource>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj)?;
        K::api(&self.client, key.namespace.as_deref())
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| api_error::<K>(&key, e))
    }

    async fn update_status<K: StoreResource>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj)?;
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let patch = serde_json::json!({ "status": status });

        K::api(&self.client, key.namespace.as_deref())
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| api_error::<K>(&key, e))
    }

    async fn delete<K: StoreResource>(&self, key: &ObjectKey) -> Result<()> {
        K::api(&self.client, key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| api_error::<K>(key, e))
    }
}

/// Translate an API server error into the operator's error taxonomy
fn api_error<K: StoreResource>(key: &ObjectKey, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
            kind: K::kind_name(),
            key: key.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind: K::kind_name(),
                key: key.to_string(),
            }
        }
        other => Error::KubeError(format!("{} {}: {}", K::kind_name(), key, other)),
    }
}
