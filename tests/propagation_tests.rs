mod common;

use common::{Harness, Script, new_recordset, ok, test_config};
use zonecentral::{
    CentralError, RpcOutcome,
    model::{DomainAction, DomainStatus, RecordType, RequestContext, TargetOutcomeState},
    storage::Storage,
};

#[tokio::test]
async fn test_domain_active_once_all_targets_ack() {
    let harness = Harness::start(test_config(&["ns1", "ns2"], 100));
    let ctx = RequestContext::tenant("t1");

    let domain = harness.create_domain(&ctx, "example.org.").await;
    let active = harness
        .wait_for_status(domain.id, 1, DomainStatus::Active)
        .await;

    // Propagation never touches the serial
    assert_eq!(active.serial, 1);
    assert!(harness.transport.calls("ns1") >= 1);
    assert!(harness.transport.calls("ns2") >= 1);
}

#[tokio::test]
async fn test_recordset_change_propagates_new_serial() {
    let harness = Harness::start(test_config(&["ns1", "ns2"], 100));
    let ctx = RequestContext::tenant("t1");
    let domain = harness.create_domain(&ctx, "example.org.").await;
    harness.wait_for_status(domain.id, 1, DomainStatus::Active).await;

    ok(harness
        .client
        .create_recordset(&ctx, domain.id, new_recordset("www.example.org.", RecordType::A))
        .await);
    harness.wait_for_status(domain.id, 2, DomainStatus::Active).await;

    let report = ok(harness.client.get_domain_status(&ctx, domain.id).await);
    assert_eq!(report.serial, 2);
    assert_eq!(report.targets.len(), 2);
    for target in &report.targets {
        assert_eq!(target.serial, 2);
        assert_eq!(target.state, TargetOutcomeState::Success);
    }
}

#[tokio::test]
async fn test_partial_threshold_tolerates_failed_target() {
    let harness = Harness::start(test_config(&["ns1", "ns2"], 50));
    harness.transport.set("ns2", Script::Nack);
    let ctx = RequestContext::tenant("t1");

    let domain = harness.create_domain(&ctx, "example.org.").await;
    harness.wait_for_status(domain.id, 1, DomainStatus::Active).await;
}

#[tokio::test]
async fn test_failing_target_errors_then_recovers() {
    let harness = Harness::start(test_config(&["ns1", "ns2"], 100));
    harness.transport.set("ns2", Script::Timeout);
    let ctx = RequestContext::tenant("t1");

    let domain = harness.create_domain(&ctx, "example.org.").await;
    harness.wait_for_status(domain.id, 1, DomainStatus::Error).await;
    // Every configured attempt was spent on the broken target
    assert_eq!(harness.transport.calls("ns2"), 3);

    let report = ok(harness.client.get_domain_status(&ctx, domain.id).await);
    let failed = report
        .targets
        .iter()
        .find(|t| t.state == TargetOutcomeState::Error)
        .expect("failed target is reported");
    assert_eq!(failed.attempts, 3);
    assert!(failed.last_error.as_deref().unwrap().contains("ns2"));

    harness.transport.set("ns2", Script::Ack);
    harness.pool_manager.recover().await;
    harness.wait_for_status(domain.id, 1, DomainStatus::Active).await;
}

#[tokio::test]
async fn test_newer_serial_supersedes_failed_round() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    harness.transport.set("ns1", Script::Nack);
    let ctx = RequestContext::tenant("t1");

    let domain = harness.create_domain(&ctx, "example.org.").await;
    harness.wait_for_status(domain.id, 1, DomainStatus::Error).await;

    harness.transport.set("ns1", Script::Ack);
    ok(harness
        .client
        .create_recordset(&ctx, domain.id, new_recordset("www.example.org.", RecordType::A))
        .await);
    harness.wait_for_status(domain.id, 2, DomainStatus::Active).await;
}

#[tokio::test]
async fn test_delete_purges_after_quorum() {
    let harness = Harness::start(test_config(&["ns1", "ns2"], 100));
    let ctx = RequestContext::tenant("t1");
    let domain = harness.create_domain(&ctx, "example.org.").await;
    harness.wait_for_status(domain.id, 1, DomainStatus::Active).await;

    let deleting = ok(harness.client.delete_domain(&ctx, domain.id).await);
    assert_eq!(deleting.serial, 2);
    assert_eq!(deleting.status, DomainStatus::Pending);
    assert_eq!(deleting.action, DomainAction::Delete);

    harness.wait_for_purge(domain.id).await;
    assert_eq!(
        harness.client.get_domain(&ctx, domain.id).await,
        RpcOutcome::Error(CentralError::DomainNotFound(domain.id.to_string()))
    );

    // The name is free again
    let again = harness.create_domain(&ctx, "example.org.").await;
    assert_ne!(again.id, domain.id);
}

#[tokio::test]
async fn test_deleting_domain_rejects_further_mutations() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    harness.transport.set("ns1", Script::Timeout);
    let ctx = RequestContext::tenant("t1");
    let domain = harness.create_domain(&ctx, "example.org.").await;

    ok(harness.client.delete_domain(&ctx, domain.id).await);

    let outcome = harness
        .client
        .create_recordset(&ctx, domain.id, new_recordset("www.example.org.", RecordType::A))
        .await;
    assert!(matches!(
        outcome,
        RpcOutcome::Error(CentralError::DomainNotFound(_))
    ));
    assert!(matches!(
        harness.client.delete_domain(&ctx, domain.id).await,
        RpcOutcome::Error(CentralError::DomainNotFound(_))
    ));

    // Removal never reached quorum, so the row is kept in ERROR
    harness.wait_for_status(domain.id, 2, DomainStatus::Error).await;
    assert!(harness.storage.get_domain(domain.id).await.is_ok());
}

#[tokio::test]
async fn test_zone_gauges_follow_status() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let ctx = RequestContext::tenant("t1");
    let domain = harness.create_domain(&ctx, "example.org.").await;
    harness.wait_for_status(domain.id, 1, DomainStatus::Active).await;

    harness.pool_manager.recover().await;

    let exported = harness.metrics.export().unwrap();
    assert!(exported.contains("zonecentral_zones{status=\"ACTIVE\"} 1"));
}
