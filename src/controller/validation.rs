//! # Binding Validation
//!
//! Name checks for Kubernetes destinations and Key Vault references. A binding that
//! fails these checks is reported as invalid instead of being sent to either API.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

/// RFC 1123 subdomain
static KUBERNETES_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("Failed to compile KUBERNETES_NAME regex - this should never happen")
});

/// Secret and ConfigMap data keys
static DATA_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-._a-zA-Z0-9]+$")
        .expect("Failed to compile DATA_KEY regex - this should never happen")
});

/// Key Vault names: 3-24 characters, starts with a letter, no consecutive hyphens
static VAULT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9-]{1,22}[a-zA-Z0-9]$")
        .expect("Failed to compile VAULT_NAME regex - this should never happen")
});

/// Key Vault object names: 1-127 alphanumerics and hyphens
static OBJECT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9-]{1,127}$")
        .expect("Failed to compile OBJECT_NAME regex - this should never happen")
});

/// Validate Kubernetes resource name (RFC 1123 subdomain, 1-253 characters)
pub fn validate_kubernetes_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }
    if name.len() > 253 {
        return Err(anyhow::anyhow!(
            "{field_name} '{name}' exceeds maximum length of 253 characters (got {})",
            name.len()
        ));
    }
    if !KUBERNETES_NAME.is_match(name) {
        return Err(anyhow::anyhow!(
            "{field_name} '{name}' must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)"
        ));
    }
    Ok(())
}

/// Validate a Secret data key
pub fn validate_data_key(key: &str, field_name: &str) -> Result<()> {
    if key.len() > 253 || !DATA_KEY.is_match(key) {
        return Err(anyhow::anyhow!(
            "{field_name} '{key}' must consist of alphanumerics, '-', '_' or '.'"
        ));
    }
    Ok(())
}

pub fn validate_vault_name(name: &str) -> Result<()> {
    if !VAULT_NAME.is_match(name) || name.contains("--") {
        return Err(anyhow::anyhow!(
            "vault.name '{name}' must be 3-24 alphanumerics or hyphens, start with a letter and not end with a hyphen"
        ));
    }
    Ok(())
}

pub fn validate_object_name(name: &str) -> Result<()> {
    if !OBJECT_NAME.is_match(name) {
        return Err(anyhow::anyhow!(
            "vault.object.name '{name}' must be 1-127 alphanumerics or hyphens"
        ));
    }
    Ok(())
}

/// Validate an optional object version (32 hex characters in Key Vault)
pub fn validate_object_version(version: &str) -> Result<()> {
    if version.is_empty() || !version.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(anyhow::anyhow!(
            "vault.object.version '{version}' must be alphanumeric"
        ));
    }
    Ok(())
}
