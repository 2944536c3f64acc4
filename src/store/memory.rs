//! In-memory object store
//!
//! Mirrors the parts of API server behaviour the reconcilers depend on:
//! finalizer-gated deletion, the status subresource, namespace containment
//! and optimistic `resourceVersion` checks on replace. Every successful
//! mutation is recorded, and failures can be injected per verb and kind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use serde_json::Value;

use super::{ObjectKey, ObjectStore, StoreResource};
use crate::{Error, Result};

const NAMESPACE_KIND: &str = "Namespace";

/// Store operation, used for the mutation log and failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::UpdateStatus => "update status",
            Verb::Delete => "delete",
        };
        f.write_str(verb)
    }
}

/// A successful write against the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub verb: Verb,
    pub kind: String,
    pub key: ObjectKey,
}

#[derive(Debug)]
struct FailureRule {
    verb: Verb,
    kind: String,
    name: Option<String>,
    remaining: Option<usize>,
}

impl FailureRule {
    fn matches(&self, verb: Verb, kind: &str, name: Option<&str>) -> bool {
        self.verb == verb
            && self.kind == kind
            && self.remaining != Some(0)
            && match (&self.name, name) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
                (None, _) => true,
            }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, ObjectKey), Value>,
    mutations: Vec<Mutation>,
    failures: Vec<FailureRule>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn check_failure(&mut self, verb: Verb, kind: &str, name: Option<&str>) -> Result<()> {
        if let Some(rule) = self
            .failures
            .iter_mut()
            .find(|rule| rule.matches(verb, kind, name))
        {
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(Error::KubeError(format!(
                "injected {} failure for {} {}",
                verb,
                kind,
                name.unwrap_or("*")
            )));
        }
        Ok(())
    }

    fn record(&mut self, verb: Verb, kind: &str, key: &ObjectKey) {
        self.mutations.push(Mutation {
            verb,
            kind: kind.to_string(),
            key: key.clone(),
        });
    }

    /// Physically drop an object, and everything it contains if it is a namespace
    fn remove(&mut self, kind: &str, key: &ObjectKey) {
        self.objects.remove(&(kind.to_string(), key.clone()));
        if kind == NAMESPACE_KIND {
            self.objects
                .retain(|(_, k), _| k.namespace.as_deref() != Some(key.name.as_str()));
        }
    }

    fn namespace_exists(&self, namespace: &str) -> bool {
        self.objects
            .contains_key(&(NAMESPACE_KIND.to_string(), ObjectKey::cluster(namespace)))
    }
}

/// Object store held entirely in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed an object without recording a mutation
    pub fn insert<K: StoreResource>(&self, obj: K) -> Result<K> {
        let key = ObjectKey::of(&obj)?;
        let mut state = self.state();
        let stored = stamp_new(obj, &mut state);
        state
            .objects
            .insert((K::kind_name(), key), serde_json::to_value(&stored)?);
        Ok(stored)
    }

    /// Current state of an object, if present
    pub fn object<K: StoreResource>(&self, key: &ObjectKey) -> Option<K> {
        self.state()
            .objects
            .get(&(K::kind_name(), key.clone()))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Whether an object is present
    pub fn contains<K: StoreResource>(&self, key: &ObjectKey) -> bool {
        self.state()
            .objects
            .contains_key(&(K::kind_name(), key.clone()))
    }

    /// All successful writes so far, oldest first
    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    /// Forget recorded writes
    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    /// Make `verb` on `kind` fail
    ///
    /// `name` restricts the failure to one object; `times` bounds how many
    /// calls fail (`None` fails every call until [`MemoryStore::clear_failures`]).
    pub fn inject_failure(&self, verb: Verb, kind: &str, name: Option<&str>, times: Option<usize>) {
        self.state().failures.push(FailureRule {
            verb,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            remaining: times,
        });
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreResource>(&self, key: &ObjectKey) -> Result<Option<K>> {
        let kind = K::kind_name();
        let mut state = self.state();
        state.check_failure(Verb::Get, &kind, Some(&key.name))?;

        state
            .objects
            .get(&(kind, key.clone()))
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Error::from)
    }

    async fn list<K: StoreResource>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let kind = K::kind_name();
        let mut state = self.state();
        state.check_failure(Verb::List, &kind, None)?;

        let selector = parse_selector(label_selector);
        let mut items = Vec::new();
        for ((k, key), value) in &state.objects {
            if *k != kind || (namespace.is_some() && key.namespace.as_deref() != namespace) {
                continue;
            }
            let obj: K = serde_json::from_value(value.clone())?;
            let labels = obj.labels();
            if selector
                .iter()
                .all(|(l, v)| labels.get(l).map(String::as_str) == Some(v.as_str()))
            {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn create<K: StoreResource>(&self, obj: &K) -> Result<K> {
        let kind = K::kind_name();
        let key = ObjectKey::of(obj)?;
        let mut state = self.state();
        state.check_failure(Verb::Create, &kind, Some(&key.name))?;

        if state.objects.contains_key(&(kind.clone(), key.clone())) {
            return Err(Error::AlreadyExists {
                kind,
                key: key.to_string(),
            });
        }
        if let Some(ns) = key.namespace.as_deref() {
            if !state.namespace_exists(ns) {
                return Err(Error::NotFound {
                    kind: NAMESPACE_KIND.to_string(),
                    key: ns.to_string(),
                });
            }
        }

        let stored = stamp_new(obj.clone(), &mut state);
        state
            .objects
            .insert((kind.clone(), key.clone()), serde_json::to_value(&stored)?);
        state.record(Verb::Create, &kind, &key);
        Ok(stored)
    }

    async fn update<K: StoreResource>(&self, obj: &K) -> Result<K> {
        let kind = K::kind_name();
        let key = ObjectKey::of(obj)?;
        let mut state = self.state();
        state.check_failure(Verb::Update, &kind, Some(&key.name))?;

        let current: K = stored_object(&state, &kind, &key)?;
        if obj.resource_version().is_some() && obj.resource_version() != current.resource_version()
        {
            return Err(Error::KubeError(format!(
                "conflict updating {} {}: object has been modified",
                kind, key
            )));
        }

        let mut next = obj.clone();
        let revision = state.next_revision();
        {
            let meta = next.meta_mut();
            meta.resource_version = Some(revision);
            meta.uid = current.meta().uid.clone();
            meta.creation_timestamp = current.meta().creation_timestamp.clone();
            meta.deletion_timestamp = current.meta().deletion_timestamp.clone();
        }

        // Status only changes through the status subresource.
        let mut value = serde_json::to_value(&next)?;
        let current_status = state
            .objects
            .get(&(kind.clone(), key.clone()))
            .and_then(|v| v.get("status").cloned());
        if let Some(fields) = value.as_object_mut() {
            match current_status {
                Some(status) => {
                    fields.insert("status".to_string(), status);
                }
                None => {
                    fields.remove("status");
                }
            }
        }
        let next: K = serde_json::from_value(value.clone())?;

        state.record(Verb::Update, &kind, &key);
        if next.meta().deletion_timestamp.is_some() && next.finalizers().is_empty() {
            state.remove(&kind, &key);
        } else {
            state.objects.insert((kind, key), value);
        }
        Ok(next)
    }

    async fn update_status<K: StoreResource>(&self, obj: &K) -> Result<K> {
        let kind = K::kind_name();
        let key = ObjectKey::of(obj)?;
        let mut state = self.state();
        state.check_failure(Verb::UpdateStatus, &kind, Some(&key.name))?;

        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let revision = state.next_revision();
        let stored = state
            .objects
            .get_mut(&(kind.clone(), key.clone()))
            .ok_or_else(|| Error::NotFound {
                kind: kind.clone(),
                key: key.to_string(),
            })?;
        if let Some(fields) = stored.as_object_mut() {
            fields.insert("status".to_string(), status);
        }
        stored["metadata"]["resourceVersion"] = Value::String(revision);
        let updated: K = serde_json::from_value(stored.clone())?;

        state.record(Verb::UpdateStatus, &kind, &key);
        Ok(updated)
    }

    async fn delete<K: StoreResource>(&self, key: &ObjectKey) -> Result<()> {
        let kind = K::kind_name();
        let mut state = self.state();
        state.check_failure(Verb::Delete, &kind, Some(&key.name))?;

        let mut current: K = stored_object(&state, &kind, key)?;
        if current.finalizers().is_empty() {
            state.remove(&kind, key);
        } else if current.meta().deletion_timestamp.is_none() {
            let revision = state.next_revision();
            let meta = current.meta_mut();
            meta.deletion_timestamp = Some(Time(Utc::now()));
            meta.resource_version = Some(revision);
            state
                .objects
                .insert((kind.clone(), key.clone()), serde_json::to_value(&current)?);
        }

        state.record(Verb::Delete, &kind, key);
        Ok(())
    }
}

/// Assign server-owned metadata to a new object
fn stamp_new<K: StoreResource>(mut obj: K, state: &mut State) -> K {
    let revision = state.next_revision();
    let meta = obj.meta_mut();
    meta.uid = Some(format!("uid-{}", revision));
    meta.resource_version = Some(revision);
    meta.creation_timestamp = Some(Time(Utc::now()));
    meta.deletion_timestamp = None;
    obj
}

fn stored_object<K: StoreResource>(state: &State, kind: &str, key: &ObjectKey) -> Result<K> {
    let value = state
        .objects
        .get(&(kind.to_string(), key.clone()))
        .ok_or_else(|| Error::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        })?;
    Ok(serde_json::from_value(value.clone())?)
}

/// Parse an equality-only label selector (`a=b,c=d`)
fn parse_selector(selector: Option<&str>) -> Vec<(String, String)> {
    selector
        .unwrap_or_default()
        .split(',')
        .filter_map(|term| {
            let (label, value) = term.split_once('=')?;
            Some((label.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Tenant, TenantSpec, TenantStatus};
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::api::rbac::v1::RoleBinding;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn role_binding(ns: &str, name: &str) -> RoleBinding {
        RoleBinding {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn finalizers_defer_removal_until_cleared() {
        let store = MemoryStore::new();
        let mut tenant = Tenant::new("t1", TenantSpec::default());
        tenant.metadata.finalizers = Some(vec!["example.com/hold".to_string()]);
        store.insert(tenant).unwrap();

        let key = ObjectKey::cluster("t1");
        store.delete::<Tenant>(&key).await.unwrap();

        let pending: Tenant = store.get(&key).await.unwrap().expect("still present");
        assert!(pending.metadata.deletion_timestamp.is_some());

        let mut released = pending.clone();
        released.metadata.finalizers = Some(vec![]);
        store.update(&released).await.unwrap();

        assert!(!store.contains::<Tenant>(&key));
    }

    #[tokio::test]
    async fn update_ignores_status_and_update_status_ignores_spec() {
        let store = MemoryStore::new();
        let stored = store
            .insert(Tenant::new("t1", TenantSpec::default()))
            .unwrap();

        let mut changed = stored.clone();
        changed.spec.admin_email = "a@x.com".to_string();
        changed.status = Some(TenantStatus {
            namespace_count: 7,
            admin_email: "ignored".to_string(),
        });
        let updated = store.update(&changed).await.unwrap();
        assert_eq!(updated.spec.admin_email, "a@x.com");
        assert!(updated.status.is_none());

        let mut status_only = updated.clone();
        status_only.spec.admin_email = "ignored@x.com".to_string();
        status_only.status = Some(TenantStatus {
            namespace_count: 1,
            admin_email: "a@x.com".to_string(),
        });
        let written = store.update_status(&status_only).await.unwrap();
        assert_eq!(written.spec.admin_email, "a@x.com");
        assert_eq!(written.status.unwrap().namespace_count, 1);
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let stored = store.insert(namespace("ns-a")).unwrap();

        store.update(&stored).await.unwrap();
        let err = store.update(&stored).await.unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[tokio::test]
    async fn deleting_a_namespace_removes_its_contents() {
        let store = MemoryStore::new();
        store.insert(namespace("ns-a")).unwrap();
        store.insert(namespace("ns-b")).unwrap();
        store
            .create(&role_binding("ns-a", "ns-a-admin-rb"))
            .await
            .unwrap();
        store
            .create(&role_binding("ns-b", "ns-b-admin-rb"))
            .await
            .unwrap();

        store
            .delete::<Namespace>(&ObjectKey::cluster("ns-a"))
            .await
            .unwrap();

        assert!(!store.contains::<RoleBinding>(&ObjectKey::namespaced("ns-a", "ns-a-admin-rb")));
        assert!(store.contains::<RoleBinding>(&ObjectKey::namespaced("ns-b", "ns-b-admin-rb")));
    }

    #[tokio::test]
    async fn namespaced_create_requires_the_namespace() {
        let store = MemoryStore::new();
        let err = store
            .create(&role_binding("missing", "rb"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let store = MemoryStore::new();
        store.create(&namespace("ns-a")).await.unwrap();
        let err = store.create(&namespace("ns-a")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn injected_failures_are_bounded() {
        let store = MemoryStore::new();
        store.inject_failure(Verb::Create, "Namespace", Some("ns-a"), Some(1));

        assert!(store.create(&namespace("ns-b")).await.is_ok());
        assert!(store.create(&namespace("ns-a")).await.is_err());
        assert!(store.create(&namespace("ns-a")).await.is_ok());
        assert_eq!(store.mutations().len(), 2);
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        store.insert(namespace("ns-a")).unwrap();
        let mut labelled = role_binding("ns-a", "labelled");
        labelled.metadata.labels = Some(BTreeMap::from([(
            "team".to_string(),
            "blue".to_string(),
        )]));
        store.create(&labelled).await.unwrap();
        store.create(&role_binding("ns-a", "plain")).await.unwrap();

        let all: Vec<RoleBinding> = store.list(Some("ns-a"), None).await.unwrap();
        assert_eq!(all.len(), 2);

        let blue: Vec<RoleBinding> = store.list(None, Some("team=blue")).await.unwrap();
        assert_eq!(blue.len(), 1);
        assert_eq!(blue[0].name_any(), "labelled");
    }
}
