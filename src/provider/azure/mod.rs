//! # Azure Provider
//!
//! - `token`: Azure AD access tokens (client credentials or managed identity), cached
//! - `key_vault`: Key Vault data-plane REST client implementing [`VaultService`](super::VaultService)

mod key_vault;
mod token;

pub use key_vault::KeyVaultClient;
pub use token::{AccessToken, TokenError, TokenProvider};
