//! # LLMInferenceService Controller
//!
//! A Kubernetes controller that reconciles `LLMInferenceService` resources
//! into running model-serving topologies.
//!
//! ## Overview
//!
//! For each LLMInferenceService the controller:
//!
//! 1. **Composes presets** - merges `baseRefs` (LLMInferenceServiceConfig) into an effective spec
//! 2. **Reconciles workloads** - single-node, multi-node worker, or prefill/decode deployments,
//!    with the model artifact attached from `model.uri` (`pvc://`, `oci://`, `hf://`, `s3://`, ...)
//! 3. **Reconciles the scheduler** - the endpoint-picker deployment, its RBAC and Service,
//!    plus the InferencePool (both wire versions) and InferenceModel
//! 4. **Reconciles routing** - a managed HTTPRoute bound to Gateways, or user-referenced routes
//! 5. **Issues certificates** - a CA-signed TLS leaf whose SANs track pod and service IPs
//! 6. **Aggregates readiness** - folds child conditions into a single top-level `Ready`
//!
//! ## Features
//!
//! - **Watch-driven**: owned children and preset changes requeue the affected services
//! - **Prometheus metrics** and HTTP health probes
//! - **Graceful shutdown** on SIGTERM/SIGINT

use anyhow::Result;
use clap::Parser;

use controller::runtime::initialization::initialize;
use controller::runtime::watch_loop::run_watch_loop;

/// LLMInferenceService controller
#[derive(Debug, Parser)]
#[command(name = "llmisvc-controller", version, about)]
struct Args {
    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        let config = controller::config::ControllerConfig::from_env();
        println!("{config:#?}");
        return Ok(());
    }

    let init = initialize().await?;

    run_watch_loop(
        init.services,
        init.presets,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await
}
