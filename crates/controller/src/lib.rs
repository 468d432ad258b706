//! LLMInferenceService Controller Library
//!
//! Core functionality for the LLMInferenceService controller: CRD types,
//! the reconciliation engine and its component modules, configuration,
//! observability and the runtime wiring.
//!
//! ## Quick Start
//!
//! ```rust
//! use controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific
//! imports, use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod gateway;
pub mod observability;
pub mod prelude;
pub mod runtime;
