//! # Reconciler Tests
//!
//! Binding reconciliation against in-memory Key Vault and Kubernetes fakes: write
//! idempotence, poll hysteresis, the requeue bound, deletion and ownership rules.

mod common;

use azure_keyvault_controller::constants::{annotations, reasons};
use azure_keyvault_controller::controller::binding::QueueKey;
use azure_keyvault_controller::controller::reconciler::ReconcileOutcome;
use azure_keyvault_controller::controller::scheduler::PollInterval;
use azure_keyvault_controller::crd::{ObjectContentType, OutputSecret, VaultObject, VaultObjectType};
use azure_keyvault_controller::provider::{FetchedObject, ObjectMaterial, VaultError};
use azure_keyvault_controller::runtime::watch_loop::{handle_binding_event, resync};
use common::{binding_with, secret_binding, test_config, Harness};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube_runtime::watcher;
use std::collections::BTreeMap;
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

/// A destination written by another binding
fn claimed_by(owner: &str, name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(BTreeMap::from([(
                annotations::BINDING.to_string(),
                owner.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            "value".to_string(),
            ByteString(b"theirs".to_vec()),
        )])),
        ..Secret::default()
    }
}

fn transient() -> VaultError {
    VaultError::Transient {
        object: "secret 'db-password' in vault 'test-kv'".to_string(),
        reason: "HTTP 503: service unavailable".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_pass_without_new_version_does_not_write() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key.clone());

    let first = h.reconciler.process(&queue_key).await.unwrap();
    assert_eq!(first, ReconcileOutcome::Created);
    assert_eq!(
        h.cluster.secret_value("payments", "db-credentials", "value").as_deref(),
        Some("hunter2")
    );

    tokio::time::advance(MINUTE).await;
    let second = h.reconciler.process(&queue_key).await.unwrap();
    assert_eq!(second, ReconcileOutcome::Unchanged);

    assert_eq!(h.cluster.secret_writes(), 1);
    assert_eq!(h.vault.calls(), 2);
    assert!(h.events.all().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_binding_not_due_is_skipped_without_vault_call() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key);

    h.reconciler.process(&queue_key).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(
        h.reconciler.process(&queue_key).await.unwrap(),
        ReconcileOutcome::Skipped
    );
    assert_eq!(h.vault.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_vault_version_updates_destination() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key);
    h.reconciler.process(&queue_key).await.unwrap();

    h.vault.set_secret("db-password", "v2", "correct-horse");
    tokio::time::advance(MINUTE).await;

    assert_eq!(
        h.reconciler.process(&queue_key).await.unwrap(),
        ReconcileOutcome::Updated
    );
    let secret = h.cluster.secret("payments", "db-credentials").unwrap();
    assert_eq!(
        secret.metadata.annotations.unwrap()[annotations::OBJECT_VERSION],
        "v2"
    );
    assert_eq!(
        h.cluster.secret_value("payments", "db-credentials", "value").as_deref(),
        Some("correct-horse")
    );
    assert_eq!(h.cluster.secret_creates.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(h.cluster.secret_replaces.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failures_slow_down_polling_then_drop_key_until_fresh_enqueue() {
    let config = test_config(&[
        ("AZURE_VAULT_NORMAL_POLL_INTERVALS", "1"),
        ("AZURE_VAULT_EXCEPTION_POLL_INTERVALS", "5"),
        ("AZURE_VAULT_MAX_FAILURE_ATTEMPTS", "5"),
        ("MAX_NUM_REQUEUES", "5"),
    ]);
    let h = Harness::with_config(&config);
    h.vault.fail_with(Some(transient()));
    let resource = secret_binding("payments", "db", "db-password", "db-credentials", 1);
    let key = h.track(&resource);
    let queue_key = QueueKey::Binding(key.clone());

    for attempt in 1..=5u32 {
        let err = h.reconciler.process(&queue_key).await.unwrap_err();
        assert_eq!(err.kind(), "transient");

        let state = h.reconciler.scheduler.state(&key).unwrap();
        assert_eq!(state.consecutive_failures, attempt);
        let expected = if attempt >= 5 {
            PollInterval::Slow
        } else {
            PollInterval::Normal
        };
        assert_eq!(state.interval, expected, "after failure {attempt}");
        assert_eq!(h.reconciler.queue.num_requeues(&queue_key), attempt);
        assert!(!h.reconciler.queue.is_dropped(&queue_key));

        tokio::time::advance(if attempt >= 5 { 5 * MINUTE } else { MINUTE }).await;
    }
    assert_eq!(h.events.count(reasons::MAX_NUM_REQUEUES_EXCEEDED), 0);

    // Sixth consecutive failure exceeds the requeue bound
    h.reconciler.process(&queue_key).await.unwrap_err();
    assert!(h.reconciler.queue.is_dropped(&queue_key));
    assert_eq!(h.events.count(reasons::MAX_NUM_REQUEUES_EXCEEDED), 1);
    assert!(h.reconciler.queue.is_empty());

    // The resync timer does not revive a dropped key
    resync(&h.reconciler);
    assert!(h.reconciler.queue.is_dropped(&queue_key));
    assert_eq!(h.reconciler.queue.len(), 1, "only the CA bundle key is queued");

    // A watch notification does
    h.vault.fail_with(None);
    h.vault.set_secret("db-password", "v1", "hunter2");
    let mut relist = Vec::new();
    handle_binding_event(&h.reconciler, &mut relist, watcher::Event::Apply(resource));
    assert!(!h.reconciler.queue.is_dropped(&queue_key));
    assert_eq!(h.reconciler.queue.num_requeues(&queue_key), 0);

    tokio::time::advance(5 * MINUTE).await;
    assert_eq!(
        h.reconciler.process(&queue_key).await.unwrap(),
        ReconcileOutcome::Created
    );
    let state = h.reconciler.scheduler.state(&key).unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.interval, PollInterval::Normal);
    assert_eq!(h.events.count(reasons::MAX_NUM_REQUEUES_EXCEEDED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_success_resets_slow_interval() {
    let config = test_config(&[("AZURE_VAULT_MAX_FAILURE_ATTEMPTS", "2")]);
    let h = Harness::with_config(&config);
    h.vault.fail_with(Some(transient()));
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key.clone());

    for _ in 0..3 {
        h.reconciler.process(&queue_key).await.unwrap_err();
        tokio::time::advance(5 * MINUTE).await;
    }
    assert_eq!(
        h.reconciler.scheduler.state(&key).unwrap().interval,
        PollInterval::Slow
    );

    h.vault.fail_with(None);
    h.vault.set_secret("db-password", "v1", "hunter2");
    h.reconciler.process(&queue_key).await.unwrap();

    let state = h.reconciler.scheduler.state(&key).unwrap();
    assert_eq!(state.interval, PollInterval::Normal);
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(h.reconciler.queue.num_requeues(&queue_key), 0);
}

#[tokio::test(start_paused = true)]
async fn test_authorization_failure_records_event() {
    let h = Harness::new();
    h.vault.fail_with(Some(VaultError::Auth {
        object: "secret 'db-password' in vault 'test-kv'".to_string(),
        reason: "HTTP 403: Forbidden".to_string(),
    }));
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));

    let err = h
        .reconciler
        .process(&QueueKey::Binding(key))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "auth");
    let events = h.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, reasons::AUTHORIZATION_FAILED);
    assert_eq!(events[0].object, "payments/db");
    assert!(events[0].note.as_deref().unwrap().contains("403"));
    assert!(h.cluster.secret("payments", "db-credentials").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_upstream_not_found_leaves_destination_untouched() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key);
    h.reconciler.process(&queue_key).await.unwrap();

    h.vault.fail_with(Some(VaultError::NotFound {
        object: "secret 'db-password' in vault 'test-kv'".to_string(),
    }));
    tokio::time::advance(MINUTE).await;
    let err = h.reconciler.process(&queue_key).await.unwrap_err();

    assert_eq!(err.kind(), "upstream_not_found");
    assert_eq!(
        h.cluster.secret_value("payments", "db-credentials", "value").as_deref(),
        Some("hunter2")
    );
    assert_eq!(h.cluster.secret_deletes.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_binding_removes_owned_destination_once() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let resource = secret_binding("payments", "db", "db-password", "db-credentials", 1);
    let key = h.track(&resource);
    let queue_key = QueueKey::Binding(key.clone());
    h.reconciler.process(&queue_key).await.unwrap();

    let mut relist = Vec::new();
    handle_binding_event(&h.reconciler, &mut relist, watcher::Event::Delete(resource));

    assert_eq!(
        h.reconciler.process(&queue_key).await.unwrap(),
        ReconcileOutcome::Deleted
    );
    assert!(h.cluster.secret("payments", "db-credentials").is_none());
    assert_eq!(h.cluster.secret_deletes.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(h.reconciler.scheduler.state(&key).is_none());
    assert!(h.reconciler.bindings.tombstone(&key).is_none());

    // A second pass for the same key has nothing left to do
    assert_eq!(
        h.reconciler.process(&queue_key).await.unwrap(),
        ReconcileOutcome::NothingToDelete
    );
    assert_eq!(h.cluster.secret_deletes.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_binding_without_destination_is_noop() {
    let h = Harness::new();
    h.vault.fail_with(Some(transient()));
    let resource = secret_binding("payments", "db", "db-password", "db-credentials", 1);
    let key = h.track(&resource);

    let mut relist = Vec::new();
    handle_binding_event(&h.reconciler, &mut relist, watcher::Event::Delete(resource));

    assert_eq!(
        h.reconciler.process(&QueueKey::Binding(key)).await.unwrap(),
        ReconcileOutcome::NothingToDelete
    );
    assert_eq!(h.cluster.secret_deletes.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(h.vault.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_destination_owned_by_another_binding_is_not_overwritten() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    h.cluster
        .insert_secret("payments", claimed_by("payments/other", "db-credentials"));
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));

    let err = h
        .reconciler
        .process(&QueueKey::Binding(key))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_binding");
    assert_eq!(h.events.count(reasons::INVALID_BINDING), 1);
    assert_eq!(
        h.cluster.secret_value("payments", "db-credentials", "value").as_deref(),
        Some("theirs")
    );
    assert_eq!(h.cluster.secret_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_adopts_destination_already_at_version() {
    let before = Harness::new();
    before.vault.set_secret("db-password", "v1", "hunter2");
    let resource = secret_binding("payments", "db", "db-password", "db-credentials", 1);
    let key = before.track(&resource);
    before
        .reconciler
        .process(&QueueKey::Binding(key))
        .await
        .unwrap();
    let written = before.cluster.secret("payments", "db-credentials").unwrap();

    let after = Harness::new();
    after.vault.set_secret("db-password", "v1", "hunter2");
    after.cluster.insert_secret("payments", written);
    let key = after.track(&resource);

    assert_eq!(
        after
            .reconciler
            .process(&QueueKey::Binding(key.clone()))
            .await
            .unwrap(),
        ReconcileOutcome::Unchanged
    );
    assert_eq!(after.cluster.secret_writes(), 0);
    assert_eq!(
        after.reconciler.scheduler.last_applied_version(&key).as_deref(),
        Some("v1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_binding_edit_is_applied_immediately() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key);
    h.reconciler.process(&queue_key).await.unwrap();

    let mut edited = secret_binding("payments", "db", "db-password", "db-credentials", 2);
    edited.spec.output.secret.data_key = Some("password".to_string());
    h.track(&edited);

    assert_eq!(
        h.reconciler.process(&queue_key).await.unwrap(),
        ReconcileOutcome::Updated
    );
    assert_eq!(
        h.cluster.secret_value("payments", "db-credentials", "password").as_deref(),
        Some("hunter2")
    );
}

#[tokio::test(start_paused = true)]
async fn test_renamed_destination_leaves_old_secret_and_warns() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key);
    h.reconciler.process(&queue_key).await.unwrap();

    h.track(&secret_binding("payments", "db", "db-password", "db-credentials-v2", 2));
    assert_eq!(
        h.reconciler.process(&queue_key).await.unwrap(),
        ReconcileOutcome::Created
    );

    assert!(h.cluster.secret("payments", "db-credentials").is_some());
    assert!(h.cluster.secret("payments", "db-credentials-v2").is_some());
    assert_eq!(h.events.count(reasons::DESTINATION_CHANGED), 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_conflict_is_retried_once() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key);
    h.reconciler.process(&queue_key).await.unwrap();

    h.vault.set_secret("db-password", "v2", "correct-horse");
    h.cluster.inject_conflicts(1);
    tokio::time::advance(MINUTE).await;

    assert_eq!(
        h.reconciler.process(&queue_key).await.unwrap(),
        ReconcileOutcome::Updated
    );
    assert_eq!(
        h.cluster.secret_value("payments", "db-credentials", "value").as_deref(),
        Some("correct-horse")
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_conflicts_are_transient_failures() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    let queue_key = QueueKey::Binding(key);
    h.cluster.inject_conflicts(2);

    let err = h.reconciler.process(&queue_key).await.unwrap_err();

    assert_eq!(err.kind(), "transient");
    assert_eq!(h.reconciler.queue.num_requeues(&queue_key), 1);
    assert!(h.cluster.secret("payments", "db-credentials").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_destination_claimed_during_conflict_retry_is_not_overwritten() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let key = h.track(&secret_binding("payments", "db", "db-password", "db-credentials", 1));
    h.cluster
        .race_next_write("payments", claimed_by("payments/other", "db-credentials"));

    let err = h
        .reconciler
        .process(&QueueKey::Binding(key))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_binding");
    assert_eq!(h.events.count(reasons::INVALID_BINDING), 1);
    let stored = h.cluster.secret("payments", "db-credentials").unwrap();
    assert_eq!(
        stored.metadata.annotations.unwrap()[annotations::BINDING],
        "payments/other"
    );
    assert_eq!(
        h.cluster.secret_value("payments", "db-credentials", "value").as_deref(),
        Some("theirs")
    );
    assert_eq!(h.cluster.secret_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_multi_key_value_secret_expands_into_data_keys() {
    let h = Harness::new();
    h.vault.set_object(
        "app-config",
        FetchedObject {
            version: "v7".to_string(),
            material: ObjectMaterial::Secret {
                value: r#"{"user":"app","port":5432,"tls":true}"#.to_string(),
                content_type: Some("application/x-json".to_string()),
            },
        },
    );
    let resource = binding_with(
        "payments",
        "app-config",
        1,
        VaultObject {
            name: "app-config".to_string(),
            object_type: VaultObjectType::MultiKeyValueSecret,
            version: None,
            content_type: Some(ObjectContentType::Json),
        },
        OutputSecret {
            name: "app-config".to_string(),
            data_key: None,
            secret_type: None,
            base64_decode: false,
        },
    );
    let key = h.track(&resource);

    h.reconciler.process(&QueueKey::Binding(key)).await.unwrap();

    assert_eq!(
        h.cluster.secret_value("payments", "app-config", "user").as_deref(),
        Some("app")
    );
    assert_eq!(
        h.cluster.secret_value("payments", "app-config", "port").as_deref(),
        Some("5432")
    );
    assert_eq!(
        h.cluster.secret_value("payments", "app-config", "tls").as_deref(),
        Some("true")
    );
    let secret = h.cluster.secret("payments", "app-config").unwrap();
    assert_eq!(secret.type_.as_deref(), Some("Opaque"));
}

#[tokio::test(start_paused = true)]
async fn test_binding_without_data_key_is_invalid() {
    let h = Harness::new();
    h.vault.set_secret("db-password", "v1", "hunter2");
    let mut resource = secret_binding("payments", "db", "db-password", "db-credentials", 1);
    resource.spec.output.secret.data_key = None;
    let key = h.track(&resource);

    let err = h
        .reconciler
        .process(&QueueKey::Binding(key))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "invalid_binding");
    assert_eq!(h.events.count(reasons::INVALID_BINDING), 1);
    assert_eq!(h.vault.calls(), 0);
}
