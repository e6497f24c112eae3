//! # CRD Generator
//!
//! Prints the `AzureKeyVaultSecret` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > deploy/crd/azurekeyvaultsecret.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use azure_keyvault_controller::crd::AzureKeyVaultSecret;
use kube::core::CustomResourceExt;

fn main() {
    let crd = AzureKeyVaultSecret::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            println!("# This file is auto-generated by crdgen");
            println!("# DO NOT EDIT THIS FILE MANUALLY");
            println!("---");
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
