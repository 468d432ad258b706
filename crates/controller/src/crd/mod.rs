//! # Custom Resource Definitions
//!
//! CRD types owned by this controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - LLMInferenceService / LLMInferenceServiceConfig and model types
//! - `router.rs` - Router sub-spec and the managed/referenced/default sum types
//! - `status.rs` - Status, conditions and the per-pass condition set

mod router;
mod spec;
mod status;

pub use router::{
    GatewayRoutingSpec, HttpRouteOverride, LocalObjectRef, PoolMode, PoolSpec, RouteMode,
    RouteSpec, RouterSpec, SchedulerSpec, UntypedObjectRef,
};
pub use spec::{
    BaseRef, Criticality, LLMInferenceService, LLMInferenceServiceConfig,
    LLMInferenceServiceConfigSpec, LLMInferenceServiceSpec, ModelSpec, PrefillSpec,
};
pub use status::{condition_types, Addressable, Condition, ConditionSet, LLMInferenceServiceStatus};

/// Value of the `app.kubernetes.io/part-of` label on every owned child.
pub const PART_OF_VALUE: &str = "llminferenceservice";

/// Annotation that disables the auth requirement when set to `"false"`.
/// Absent means enabled.
pub const ENABLE_AUTH_ANNOTATION: &str = "security.opendatahub.io/enable-auth";

/// Annotation that stops the scheduler stack when set to `"true"`.
pub const STOP_ANNOTATION: &str = "serving.kserve.io/stop";

/// Annotation carrying the self-signed certificate renewal deadline (RFC 3339).
pub const CERT_EXPIRATION_ANNOTATION: &str = "certificates.kserve.io/expiration-v2";

impl LLMInferenceService {
    /// Whether request authentication is required for this service.
    /// The annotation is case-insensitive and absent means enabled.
    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|ann| ann.get(ENABLE_AUTH_ANNOTATION))
            .is_none_or(|v| !v.eq_ignore_ascii_case("false"))
    }

    /// Whether the service is stopped via the platform-level annotation.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|ann| ann.get(STOP_ANNOTATION))
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}
