//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use azure_keyvault_controller::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Collaborator traits - implemented by the production clients and by test doubles
pub use crate::cluster::{ClusterApi, ClusterError};
pub use crate::controller::events::EventSink;
pub use crate::provider::{FetchedObject, ObjectMaterial, ObjectRequest, VaultError, VaultService};

// Reconciler types - core controller functionality
pub use crate::controller::binding::{BindingKey, QueueKey, TrackedBinding};
pub use crate::controller::queue::{RequeueDecision, WorkQueue};
pub use crate::controller::reconciler::{ReconcileOutcome, Reconciler, ReconcilerError};
pub use crate::controller::scheduler::{PollFrequency, PollInterval, PollScheduler};

// Config types
pub use crate::config::{ConfigurationError, ControllerConfig};
pub use crate::credentials::{CredentialSet, CredentialSource};
