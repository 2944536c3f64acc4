//! Tenant Kubernetes Operator
//!
//! Turns cluster-scoped `Tenant` resources into namespaces and role bindings,
//! keeps them in sync with the Tenant spec and removes the namespaces when
//! the Tenant is deleted.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod store;

pub use error::{Error, Result};
