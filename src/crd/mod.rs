//! # Custom Resource Definitions
//!
//! CRD types for the Azure Key Vault Controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `AzureKeyVaultSecret` resource and its spec
//! - `vault.rs` - Key Vault object reference
//! - `output.rs` - Destination `Secret` settings

mod output;
mod spec;
mod vault;

pub use output::{OutputSecret, SecretOutput};
pub use spec::{AzureKeyVaultSecret, AzureKeyVaultSecretSpec};
pub use vault::{ObjectContentType, VaultObject, VaultObjectType, VaultSpec};
