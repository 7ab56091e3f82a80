mod common;

use common::{Harness, new_recordset, ok, test_config};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use zonecentral::{
    CentralError, RpcOutcome,
    model::{
        DomainStatus, DomainUpdate, NewBlacklist, NewRecord, RecordSetFilter, RecordSetUpdate,
        RecordType, RecordUpdate, RequestContext,
    },
};

#[tokio::test]
async fn test_new_domain_starts_pending_at_serial_one() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let ctx = RequestContext::tenant("t1");

    let domain = harness.create_domain(&ctx, "Example.ORG.").await;
    assert_eq!(domain.name, "example.org.");
    assert_eq!(domain.serial, 1);
    assert_eq!(domain.status, DomainStatus::Pending);
}

#[tokio::test]
async fn test_recordset_bumps_serial_and_is_listed_once() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let ctx = RequestContext::tenant("t1");
    let domain = harness.create_domain(&ctx, "example.org.").await;

    let recordset = ok(harness
        .client
        .create_recordset(&ctx, domain.id, new_recordset("www.example.org.", RecordType::A))
        .await);
    assert_eq!(recordset.domain_id, domain.id);

    let domain = ok(harness.client.get_domain(&ctx, domain.id).await);
    assert_eq!(domain.serial, 2);
    assert_eq!(domain.status, DomainStatus::Pending);

    let listed = ok(harness
        .client
        .find_recordsets(&ctx, domain.id, RecordSetFilter::default())
        .await);
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_serial_strictly_increases_across_mutations() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let ctx = RequestContext::tenant("t1");
    let domain = harness.create_domain(&ctx, "example.org.").await;
    let mut last = domain.serial;

    let recordset = ok(harness
        .client
        .create_recordset(&ctx, domain.id, new_recordset("mail.example.org.", RecordType::MX))
        .await);
    let mut serials = vec![ok(harness.client.get_domain(&ctx, domain.id).await).serial];

    let record = ok(harness
        .client
        .create_record(
            &ctx,
            domain.id,
            recordset.id,
            NewRecord {
                data: "10 mx1.example.org.".to_string(),
                description: None,
            },
        )
        .await);
    serials.push(ok(harness.client.get_domain(&ctx, domain.id).await).serial);

    ok(harness
        .client
        .update_recordset(
            &ctx,
            domain.id,
            recordset.id,
            RecordSetUpdate {
                ttl: Some(600),
                ..Default::default()
            },
        )
        .await);
    serials.push(ok(harness.client.get_domain(&ctx, domain.id).await).serial);

    ok(harness
        .client
        .delete_record(&ctx, domain.id, recordset.id, record.id)
        .await);
    serials.push(ok(harness.client.get_domain(&ctx, domain.id).await).serial);

    let updated = ok(harness
        .client
        .update_domain(
            &ctx,
            domain.id,
            DomainUpdate {
                ttl: Some(7200),
                ..Default::default()
            },
        )
        .await);
    serials.push(updated.serial);

    for serial in serials {
        assert!(serial > last, "serial {} did not advance past {}", serial, last);
        last = serial;
    }
}

#[tokio::test]
async fn test_duplicate_recordset_rejected_and_single_row_kept() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let ctx = RequestContext::tenant("t1");
    let domain = harness.create_domain(&ctx, "example.org.").await;

    ok(harness
        .client
        .create_recordset(&ctx, domain.id, new_recordset("www.example.org.", RecordType::A))
        .await);
    let serial = ok(harness.client.get_domain(&ctx, domain.id).await).serial;

    let duplicate = harness
        .client
        .create_recordset(&ctx, domain.id, new_recordset("www.example.org.", RecordType::A))
        .await;
    assert!(matches!(
        duplicate,
        RpcOutcome::Error(CentralError::DuplicateRecordSet { .. })
    ));

    let listed = ok(harness
        .client
        .find_recordsets(&ctx, domain.id, RecordSetFilter::default())
        .await);
    assert_eq!(listed.len(), 1);
    // A rejected mutation leaves the serial alone
    assert_eq!(ok(harness.client.get_domain(&ctx, domain.id).await).serial, serial);
}

#[tokio::test]
async fn test_concurrent_mutations_each_bump_serial_once() {
    let harness = Arc::new(Harness::start(test_config(&["ns1"], 100)));
    let ctx = RequestContext::tenant("t1");
    let domain_id = harness.create_domain(&ctx, "example.org.").await.id;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let harness = harness.clone();
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            harness
                .client
                .create_recordset(
                    &ctx,
                    domain_id,
                    new_recordset(&format!("host{}.example.org.", i), RecordType::A),
                )
                .await
        }));
    }
    for task in tasks {
        ok(task.await.unwrap());
    }

    let domain = ok(harness.client.get_domain(&ctx, domain_id).await);
    assert_eq!(domain.serial, 11);
    let listed = ok(harness
        .client
        .find_recordsets(&ctx, domain.id, RecordSetFilter::default())
        .await);
    assert_eq!(listed.len(), 10);
}

#[tokio::test]
async fn test_concurrent_recordset_updates_keep_every_field() {
    let harness = Arc::new(Harness::start(test_config(&["ns1"], 100)));
    let ctx = RequestContext::tenant("t1");
    let domain_id = harness.create_domain(&ctx, "example.org.").await.id;
    let recordset = ok(harness
        .client
        .create_recordset(&ctx, domain_id, new_recordset("www.example.org.", RecordType::A))
        .await);

    // Both callers read the row before either commit lands
    harness.storage.set_commit_delay(Duration::from_millis(50));
    let updates = [
        RecordSetUpdate {
            ttl: Some(600),
            description: None,
        },
        RecordSetUpdate {
            ttl: None,
            description: Some("web".to_string()),
        },
    ];
    let mut tasks = Vec::new();
    for update in updates {
        let harness = harness.clone();
        let ctx = ctx.clone();
        let id = recordset.id;
        tasks.push(tokio::spawn(async move {
            harness
                .client
                .update_recordset(&ctx, domain_id, id, update)
                .await
        }));
    }
    for task in tasks {
        ok(task.await.unwrap());
    }
    harness.storage.set_commit_delay(Duration::ZERO);

    let stored = ok(harness
        .client
        .get_recordset(&ctx, domain_id, recordset.id)
        .await);
    assert_eq!(stored.ttl, Some(600));
    assert_eq!(stored.description.as_deref(), Some("web"));
    assert_eq!(ok(harness.client.get_domain(&ctx, domain_id).await).serial, 4);
}

#[tokio::test]
async fn test_concurrent_record_updates_keep_every_field() {
    let harness = Arc::new(Harness::start(test_config(&["ns1"], 100)));
    let ctx = RequestContext::tenant("t1");
    let domain_id = harness.create_domain(&ctx, "example.org.").await.id;
    let recordset = ok(harness
        .client
        .create_recordset(&ctx, domain_id, new_recordset("www.example.org.", RecordType::A))
        .await);
    let record = ok(harness
        .client
        .create_record(
            &ctx,
            domain_id,
            recordset.id,
            NewRecord {
                data: "192.0.2.10".to_string(),
                description: None,
            },
        )
        .await);

    harness.storage.set_commit_delay(Duration::from_millis(50));
    let updates = [
        RecordUpdate {
            data: Some("192.0.2.20".to_string()),
            description: None,
        },
        RecordUpdate {
            data: None,
            description: Some("primary".to_string()),
        },
    ];
    let mut tasks = Vec::new();
    for update in updates {
        let harness = harness.clone();
        let ctx = ctx.clone();
        let (rs_id, id) = (recordset.id, record.id);
        tasks.push(tokio::spawn(async move {
            harness
                .client
                .update_record(&ctx, domain_id, rs_id, id, update)
                .await
        }));
    }
    for task in tasks {
        ok(task.await.unwrap());
    }
    harness.storage.set_commit_delay(Duration::ZERO);

    let stored = ok(harness
        .client
        .get_record(&ctx, domain_id, recordset.id, record.id)
        .await);
    assert_eq!(stored.data, "192.0.2.20");
    assert_eq!(stored.description.as_deref(), Some("primary"));
    assert_eq!(ok(harness.client.get_domain(&ctx, domain_id).await).serial, 5);
}

#[tokio::test]
async fn test_concurrent_domain_updates_keep_every_field() {
    let harness = Arc::new(Harness::start(test_config(&["ns1"], 100)));
    let ctx = RequestContext::tenant("t1");
    let domain_id = harness.create_domain(&ctx, "example.org.").await.id;

    harness.storage.set_commit_delay(Duration::from_millis(50));
    let updates = [
        DomainUpdate {
            email: Some("dns@example.org".to_string()),
            ttl: None,
            description: None,
        },
        DomainUpdate {
            email: None,
            ttl: Some(7200),
            description: None,
        },
        DomainUpdate {
            email: None,
            ttl: None,
            description: Some("corporate".to_string()),
        },
    ];
    let mut tasks = Vec::new();
    for update in updates {
        let harness = harness.clone();
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            harness.client.update_domain(&ctx, domain_id, update).await
        }));
    }
    for task in tasks {
        ok(task.await.unwrap());
    }
    harness.storage.set_commit_delay(Duration::ZERO);

    let domain = ok(harness.client.get_domain(&ctx, domain_id).await);
    assert_eq!(domain.serial, 4);
    assert_eq!(domain.email, "dns@example.org");
    assert_eq!(domain.ttl, 7200);
    assert_eq!(domain.description.as_deref(), Some("corporate"));
}

#[tokio::test]
async fn test_deleting_unknown_recordset_is_not_found() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let ctx = RequestContext::tenant("t1");
    let domain = harness.create_domain(&ctx, "example.org.").await;
    ok(harness
        .client
        .create_recordset(&ctx, domain.id, new_recordset("www.example.org.", RecordType::A))
        .await);

    let missing = Uuid::new_v4();
    assert_eq!(
        harness.client.delete_recordset(&ctx, domain.id, missing).await,
        RpcOutcome::Error(CentralError::RecordSetNotFound(missing.to_string()))
    );

    let listed = ok(harness
        .client
        .find_recordsets(&ctx, domain.id, RecordSetFilter::default())
        .await);
    assert_eq!(listed.len(), 1);
    assert_eq!(ok(harness.client.get_domain(&ctx, domain.id).await).serial, 2);
}

#[tokio::test]
async fn test_blacklist_blocks_until_removed() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let admin = RequestContext::admin("ops");
    let tenant = RequestContext::tenant("t1");

    let entry = ok(harness
        .client
        .create_blacklist(
            &admin,
            NewBlacklist {
                pattern: r"^blocked\.org\.$".to_string(),
                description: None,
            },
        )
        .await);

    let rejected = harness
        .client
        .create_domain(&tenant, common::new_domain("blocked.org."))
        .await;
    assert!(matches!(
        rejected,
        RpcOutcome::Error(CentralError::Blacklisted(_))
    ));
    assert_eq!(ok(harness.client.count_domains(&tenant).await), 0);

    ok(harness.client.delete_blacklist(&admin, entry.id).await);

    let domain = ok(harness
        .client
        .create_domain(&tenant, common::new_domain("blocked.org."))
        .await);
    assert_eq!(domain.name, "blocked.org.");
}

#[tokio::test]
async fn test_blacklists_are_admin_only() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let tenant = RequestContext::tenant("t1");

    let outcome = harness
        .client
        .create_blacklist(
            &tenant,
            NewBlacklist {
                pattern: "evil".to_string(),
                description: None,
            },
        )
        .await;
    assert!(matches!(outcome, RpcOutcome::Error(CentralError::Forbidden(_))));
}

#[tokio::test]
async fn test_tenants_do_not_see_each_other() {
    let harness = Harness::start(test_config(&["ns1"], 100));
    let owner = RequestContext::tenant("t1");
    let other = RequestContext::tenant("t2");
    let domain = harness.create_domain(&owner, "example.org.").await;

    assert_eq!(
        harness.client.get_domain(&other, domain.id).await,
        RpcOutcome::Error(CentralError::DomainNotFound(domain.id.to_string()))
    );
    assert_eq!(ok(harness.client.count_domains(&other).await), 0);

    let all = RequestContext::admin("ops").with_all_tenants();
    assert_eq!(ok(harness.client.count_domains(&all).await), 1);
}
