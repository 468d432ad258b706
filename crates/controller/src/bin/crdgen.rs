//! Print the CustomResourceDefinitions this controller serves to stdout.
//!
//! ```sh
//! cargo run --bin crdgen > config/crds.yaml
//! ```

use kube::CustomResourceExt;

use controller::crd::{LLMInferenceService, LLMInferenceServiceConfig};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&LLMInferenceService::crd())?);
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&LLMInferenceServiceConfig::crd())?
    );
    Ok(())
}
