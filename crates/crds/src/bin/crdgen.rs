//! Prints the CustomResourceDefinitions as multi-document YAML.

use crds::{NetworkClass, PodNetwork};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [PodNetwork::crd(), NetworkClass::crd()];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
