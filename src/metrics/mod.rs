//! Prometheus metrics for the Tenant Operator
//!
//! Reconcile counters and timings, managed namespaces per tenant, and the
//! HTTP server exposing them alongside health probes.

pub mod prometheus;

pub use prometheus::*;
