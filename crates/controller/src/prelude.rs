//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use controller::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Gateway API and inference extension types
pub use crate::gateway::inference::{InferenceModel, InferencePool, InferencePoolSpec};
pub use crate::gateway::{Gateway, GatewayClass, HTTPRoute, HTTPRouteSpec};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, BackoffState, ControllerError, ReconcileError, Reconciler,
};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, SharedControllerConfig};
