//! Controller for Tenant resources

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::Tenant;
use crate::metrics::prometheus::{
    MANAGED_NAMESPACES, RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS,
};
use crate::reconcilers::ReconcileOutcome;
use crate::Error;

/// Run the tenant controller
///
/// The kube controller never runs two reconciles for the same Tenant at once,
/// which the reconciler relies on.
pub async fn run(ctx: Arc<Context>) {
    let tenants: Api<Tenant> = Api::all(ctx.client.clone());
    let controller_config = controller::Config::default().concurrency(ctx.config.concurrency);

    info!("Starting Tenant controller");

    Controller::new(tenants, Config::default().any_semantic())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("Tenant controller stopped");
}

/// Reconcile a Tenant resource
///
/// Only the name of the watched object is used; the reconciler reads the
/// current state from the API server itself.
#[instrument(skip(tenant, ctx), fields(tenant = %tenant.name_any()))]
async fn reconcile(tenant: Arc<Tenant>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let name = tenant.name_any();

    RECONCILIATIONS.with_label_values(&["Tenant"]).inc();

    let result = ctx.reconciler.reconcile(&name, &ctx.shutdown).await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["Tenant"])
        .observe(duration);

    match &result {
        Ok(outcome) => {
            record_managed_namespaces(&name, outcome);
            info!(
                "Successfully reconciled {} in {:.2}s: {:?}",
                name, duration, outcome
            );
        }
        Err(e) => {
            RECONCILIATION_ERRORS.with_label_values(&["Tenant"]).inc();
            error!("Failed to reconcile {}: {}", name, e);
        }
    }

    Ok(result?.action(ctx.config.resync_interval))
}

fn record_managed_namespaces(name: &str, outcome: &ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::Converged { namespaces } => {
            MANAGED_NAMESPACES
                .with_label_values(&[name])
                .set(*namespaces as f64);
        }
        ReconcileOutcome::CleanedUp { .. }
        | ReconcileOutcome::NotFound
        | ReconcileOutcome::Released => {
            // The series may not exist yet.
            let _ = MANAGED_NAMESPACES.remove_label_values(&[name]);
        }
    }
}

/// Error policy for the controller
fn error_policy(tenant: Arc<Tenant>, err: &Error, ctx: Arc<Context>) -> Action {
    error!("Reconciliation error for {}: {:?}", tenant.name_any(), err);
    requeue_for(err, ctx.config.error_requeue)
}

/// Requeue delay for a failed reconcile
fn requeue_for(err: &Error, error_requeue: Duration) -> Action {
    match err {
        Error::ConfigError(_) | Error::SerializationError(_) | Error::MissingObjectKey(_) => {
            Action::requeue(Duration::from_secs(300))
        }
        Error::KubeError(_)
        | Error::NotFound { .. }
        | Error::AlreadyExists { .. }
        | Error::Cancelled => Action::requeue(error_requeue),
    }
}
