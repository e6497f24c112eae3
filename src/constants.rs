//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable (see [`crate::config`]).

/// Name reported as the event source and `managed-by` label value
pub const CONTROLLER_NAME: &str = "azure-keyvault-controller";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default poll interval while a binding is healthy (minutes)
pub const DEFAULT_NORMAL_POLL_INTERVAL_MINS: u64 = 1;

/// Default poll interval once a binding keeps failing (minutes)
pub const DEFAULT_SLOW_POLL_INTERVAL_MINS: u64 = 5;

/// Consecutive failures before a binding is polled at the slow interval
pub const DEFAULT_MAX_FAILURES_BEFORE_SLOWING_DOWN: u32 = 5;

/// Retries allowed within one failure episode before a key is dropped
pub const DEFAULT_MAX_NUM_REQUEUES: u32 = 5;

/// Default number of reconciliation workers
pub const DEFAULT_NUM_THREADS: usize = 1;

/// How often every live binding is re-enqueued so the poll scheduler can check it (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// How long in-flight reconciliations may run after a shutdown signal (seconds)
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_SECS: u64 = 30;

/// Default delay before restarting a watch stream after an error (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default location of the Azure cloud provider config on AKS nodes
pub const DEFAULT_CLOUD_CONFIG_PATH: &str = "/etc/kubernetes/azure.json";

/// Default name of the CA bundle ConfigMap
pub const DEFAULT_CA_CONFIG_MAP_NAME: &str = "akv2k8s-ca";

/// Default namespace label that opts a namespace into env injection
pub const DEFAULT_AKV_LABEL_NAME: &str = "azure-key-vault-env-injection";

/// Label value that marks a namespace as enabled
pub const NAMESPACE_LABEL_ENABLED: &str = "enabled";

/// Key in the CA source secret that holds the CA certificate
pub const CA_SOURCE_DATA_KEY: &str = "ca.crt";

/// Key in the CA bundle ConfigMap that receives the CA certificate
pub const CA_BUNDLE_DATA_KEY: &str = "caCert";

/// Labels and annotations written on objects the controller manages
pub mod annotations {
    /// Standard managed-by label
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

    /// `namespace/name` of the binding that owns a destination secret
    pub const BINDING: &str = "azure-keyvault-controller.spv.no/binding";

    /// Key Vault object version last written to a destination secret
    pub const OBJECT_VERSION: &str = "azure-keyvault-controller.spv.no/object-version";

    /// Generation of the binding that produced the destination content
    pub const BINDING_GENERATION: &str = "azure-keyvault-controller.spv.no/binding-generation";

    /// SHA-256 of the CA bundle content in a managed ConfigMap
    pub const CA_BUNDLE_HASH: &str = "azure-keyvault-controller.spv.no/ca-bundle-hash";
}

/// Event reasons published to the event sink
pub mod reasons {
    pub const MAX_NUM_REQUEUES_EXCEEDED: &str = "MaxNumRequeuesExceeded";
    pub const AUTHORIZATION_FAILED: &str = "AuthorizationFailed";
    pub const INVALID_BINDING: &str = "InvalidBinding";
    pub const DESTINATION_CHANGED: &str = "DestinationChanged";
}

/// Key Vault REST API version used for all data-plane calls
pub const KEY_VAULT_API_VERSION: &str = "7.4";
