//! # Controller
//!
//! Reconciliation core: the per-object reconcile entry and its component
//! modules, the probe/metrics server and the retry backoff.

pub mod backoff;
pub mod reconciler;
pub mod server;
