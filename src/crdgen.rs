//! # CRD Generator
//!
//! Generates the CustomResourceDefinition YAML for `CloudStorageSource` and
//! `PullSubscription`.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/sources.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use cloud_source_controller::crd::{CloudStorageSource, PullSubscription};
use kube::core::CustomResourceExt;

fn main() {
    let crds = [CloudStorageSource::crd(), PullSubscription::crd()];

    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
