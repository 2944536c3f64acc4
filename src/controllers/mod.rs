//! Controller implementations for watching and reconciling resources

pub mod queue;
pub mod tenant_controller;

use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::reconcilers::TenantReconciler;
use crate::store::KubeStore;

/// Shared context for controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator settings
    pub config: OperatorConfig,
    /// Cancelled on shutdown, aborting in-flight reconciles
    pub shutdown: CancellationToken,
    /// Tenant reconciler backed by the API server
    pub reconciler: TenantReconciler<KubeStore>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: OperatorConfig) -> Arc<Self> {
        let store = Arc::new(KubeStore::new(client.clone()));
        Arc::new(Self {
            client,
            config,
            shutdown: CancellationToken::new(),
            reconciler: TenantReconciler::new(store),
        })
    }
}
