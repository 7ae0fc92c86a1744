mod common;

use std::sync::Arc;

use ambient_tx::{
    method_fn, Instrumenter, ServiceBuilder, ServiceError, ServiceRegistry,
    TransactionCoordinator,
};
use anyhow::Result;
use common::RecordingResource;
use serde_json::json;

struct Harness {
    registry: Arc<ServiceRegistry>,
    resource: Arc<RecordingResource>,
    instrumenter: Instrumenter,
}

/// Registry with two real services and one plain collaborator:
/// - organizations: marked `create` and `explode`, unmarked `list`
/// - frameworks: marked `adopt`, which calls organizations.create internally
/// - health: no callable surface at all
async fn harness() -> Harness {
    let registry = Arc::new(ServiceRegistry::new());
    let resource = RecordingResource::new();
    let coordinator = TransactionCoordinator::new(resource.clone());

    ServiceBuilder::new("organizations")
        .transactional(
            "create",
            method_fn(|args| async move { Ok(json!({ "created": args })) }),
        )
        .transactional(
            "explode",
            method_fn(|_args| async move {
                Err::<serde_json::Value, _>(ServiceError::Failed("boom".to_string()))
            }),
        )
        .method("list", method_fn(|_args| async move { Ok(json!([])) }))
        .register(&registry)
        .await;

    let inner_registry = registry.clone();
    ServiceBuilder::new("frameworks")
        .transactional(
            "adopt",
            method_fn(move |args| {
                let registry = inner_registry.clone();
                async move { registry.call("organizations", "create", args).await }
            }),
        )
        .register(&registry)
        .await;

    ServiceBuilder::new("health").register(&registry).await;

    Harness {
        registry,
        resource,
        instrumenter: Instrumenter::new(coordinator),
    }
}

#[tokio::test]
async fn marking_alone_has_no_runtime_effect() -> Result<()> {
    let harness = harness().await;

    // No discovery pass has run: the marked method behaves like any other
    let result = harness
        .registry
        .call("organizations", "create", json!({ "name": "acme" }))
        .await?;

    assert_eq!(result, json!({ "created": { "name": "acme" } }));
    assert_eq!(harness.resource.begins(), 0);
    Ok(())
}

#[tokio::test]
async fn discovery_wraps_every_marked_method_once() -> Result<()> {
    let harness = harness().await;

    let report = harness.instrumenter.initialize(&harness.registry).await;
    assert_eq!(report.services_scanned, 3);
    assert_eq!(report.services_skipped, 1);
    assert_eq!(report.methods_wrapped, 3);

    // Three invocations yield three physical transactions, values intact
    for i in 0..3 {
        let result = harness
            .registry
            .call("organizations", "create", json!({ "seq": i }))
            .await?;
        assert_eq!(result, json!({ "created": { "seq": i } }));
    }
    assert_eq!(harness.resource.begins(), 3);
    assert_eq!(harness.resource.commits(), 3);
    Ok(())
}

#[tokio::test]
async fn unmarked_methods_are_left_untouched() -> Result<()> {
    let harness = harness().await;
    harness.instrumenter.initialize(&harness.registry).await;

    let result = harness.registry.call("organizations", "list", json!({})).await?;
    assert_eq!(result, json!([]));
    assert_eq!(harness.resource.begins(), 0);
    Ok(())
}

#[tokio::test]
async fn rerunning_discovery_is_a_guarded_no_op() -> Result<()> {
    let harness = harness().await;

    let first = harness.instrumenter.initialize(&harness.registry).await;
    assert_eq!(first.methods_wrapped, 3);

    let second = harness.instrumenter.initialize(&harness.registry).await;
    assert_eq!(second.methods_wrapped, 0);

    // Still exactly one transaction per invocation, not two
    harness
        .registry
        .call("organizations", "create", json!({}))
        .await?;
    assert_eq!(harness.resource.begins(), 1);
    Ok(())
}

#[tokio::test]
async fn wrapped_methods_propagate_errors_and_roll_back() -> Result<()> {
    let harness = harness().await;
    harness.instrumenter.initialize(&harness.registry).await;

    let err = harness
        .registry
        .call("organizations", "explode", json!({}))
        .await
        .unwrap_err();

    match err {
        ServiceError::Failed(msg) => assert_eq!(msg, "boom"),
        other => panic!("expected the business error unchanged, got: {}", other),
    }
    assert_eq!(harness.resource.begins(), 1);
    assert_eq!(harness.resource.commits(), 0);
    assert_eq!(harness.resource.rollbacks(), 1);
    Ok(())
}

#[tokio::test]
async fn nested_wrapped_calls_share_one_physical_transaction() -> Result<()> {
    let harness = harness().await;
    harness.instrumenter.initialize(&harness.registry).await;

    // frameworks.adopt (wrapped) calls organizations.create (also wrapped)
    let result = harness
        .registry
        .call("frameworks", "adopt", json!({ "name": "cmmi" }))
        .await?;

    assert_eq!(result, json!({ "created": { "name": "cmmi" } }));
    assert_eq!(harness.resource.begins(), 1);
    assert_eq!(harness.resource.commits(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_targets_are_dispatch_errors() {
    let harness = harness().await;

    let err = harness
        .registry
        .call("nonsense", "create", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnknownService(_)));

    let err = harness
        .registry
        .call("organizations", "nonsense", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnknownMethod { .. }));
}
