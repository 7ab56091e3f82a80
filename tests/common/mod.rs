//! Common test utilities for zonecentral integration tests

#![allow(dead_code)] // Not every test file uses every helper

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use zonecentral::{
    backend::{TargetOutcome, ZoneTransport},
    central::{CentralOptions, CentralService},
    config::{CentralConfig, DEFAULT_POOL_ID, PoolConfig, PropagationConfig},
    metrics::CentralMetrics,
    model::{
        Blacklist, Domain, DomainFilter, DomainStatus, NewDomain, NewRecordSet, PoolTarget,
        Record, RecordFilter, RecordSet, RecordSetFilter, RecordType, RequestContext,
        TargetStatus,
    },
    pool_manager::{PoolManager, PoolManagerHandle},
    rpc::{self, CentralClient, RpcOutcome, RpcServer},
    serial::SerialManager,
    storage::{MemoryStorage, Storage, StorageError, StorageResult, ZoneChange},
};

/// How a scripted target answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Ack,
    Nack,
    Timeout,
}

/// Name server double answering per target according to a switchable script
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, target: &str, script: Script) {
        self.scripts.lock().insert(target.to_string(), script);
    }

    pub fn calls(&self, target: &str) -> usize {
        self.calls.lock().get(target).copied().unwrap_or(0)
    }

    fn answer(&self, target: &PoolTarget) -> TargetOutcome {
        *self.calls.lock().entry(target.name.clone()).or_insert(0) += 1;
        match self.scripts.lock().get(&target.name).copied().unwrap_or(Script::Ack) {
            Script::Ack => TargetOutcome::Ack,
            Script::Nack => TargetOutcome::Nack("scripted refusal".to_string()),
            Script::Timeout => TargetOutcome::Timeout,
        }
    }
}

#[async_trait]
impl ZoneTransport for ScriptedTransport {
    async fn update_zone(&self, target: &PoolTarget, _zone: &str, _serial: u32) -> TargetOutcome {
        self.answer(target)
    }

    async fn remove_zone(&self, target: &PoolTarget, _zone: &str) -> TargetOutcome {
        self.answer(target)
    }
}

/// Memory storage whose commits can be slowed down
#[derive(Default)]
pub struct SlowStorage {
    inner: MemoryStorage,
    commit_delay: Mutex<Duration>,
}

impl SlowStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock() = delay;
    }
}

#[async_trait]
impl Storage for SlowStorage {
    async fn create_domain(&self, domain: Domain, quota: Option<usize>) -> StorageResult<Domain> {
        self.inner.create_domain(domain, quota).await
    }

    async fn get_domain(&self, id: Uuid) -> StorageResult<Domain> {
        self.inner.get_domain(id).await
    }

    async fn find_domain_by_name(&self, name: &str) -> StorageResult<Option<Domain>> {
        self.inner.find_domain_by_name(name).await
    }

    async fn find_domains(&self, filter: &DomainFilter) -> StorageResult<Vec<Domain>> {
        self.inner.find_domains(filter).await
    }

    async fn count_domains(&self, tenant_id: Option<&str>) -> StorageResult<usize> {
        self.inner.count_domains(tenant_id).await
    }

    async fn domain_counts_by_status(&self) -> StorageResult<HashMap<DomainStatus, usize>> {
        self.inner.domain_counts_by_status().await
    }

    async fn commit(&self, change: ZoneChange) -> StorageResult<Domain> {
        let delay = *self.commit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.commit(change).await
    }

    async fn set_domain_status(
        &self,
        id: Uuid,
        serial: u32,
        status: DomainStatus,
    ) -> StorageResult<bool> {
        self.inner.set_domain_status(id, serial, status).await
    }

    async fn purge_domain(&self, id: Uuid, serial: u32) -> StorageResult<bool> {
        self.inner.purge_domain(id, serial).await
    }

    async fn get_recordset(&self, id: Uuid) -> StorageResult<RecordSet> {
        self.inner.get_recordset(id).await
    }

    async fn find_recordsets(
        &self,
        domain_id: Uuid,
        filter: &RecordSetFilter,
    ) -> StorageResult<Vec<RecordSet>> {
        self.inner.find_recordsets(domain_id, filter).await
    }

    async fn get_record(&self, id: Uuid) -> StorageResult<Record> {
        self.inner.get_record(id).await
    }

    async fn find_records(
        &self,
        recordset_id: Uuid,
        filter: &RecordFilter,
    ) -> StorageResult<Vec<Record>> {
        self.inner.find_records(recordset_id, filter).await
    }

    async fn create_blacklist(&self, blacklist: Blacklist) -> StorageResult<Blacklist> {
        self.inner.create_blacklist(blacklist).await
    }

    async fn get_blacklist(&self, id: Uuid) -> StorageResult<Blacklist> {
        self.inner.get_blacklist(id).await
    }

    async fn find_blacklists(&self) -> StorageResult<Vec<Blacklist>> {
        self.inner.find_blacklists().await
    }

    async fn update_blacklist(&self, blacklist: Blacklist) -> StorageResult<Blacklist> {
        self.inner.update_blacklist(blacklist).await
    }

    async fn delete_blacklist(&self, id: Uuid) -> StorageResult<Blacklist> {
        self.inner.delete_blacklist(id).await
    }

    async fn upsert_target_status(&self, status: TargetStatus) -> StorageResult<()> {
        self.inner.upsert_target_status(status).await
    }

    async fn get_target_statuses(&self, domain_id: Uuid) -> StorageResult<Vec<TargetStatus>> {
        self.inner.get_target_statuses(domain_id).await
    }
}

/// Configuration with fast retries, no quota and a pool made of `targets`
pub fn test_config(targets: &[&str], threshold_percentage: u8) -> CentralConfig {
    CentralConfig {
        http_bind_addr: None,
        rpc_timeout: Duration::from_secs(5),
        max_domains_per_tenant: None,
        conflict_retries: 50,
        conflict_backoff: Duration::from_millis(1),
        pools: vec![PoolConfig {
            id: DEFAULT_POOL_ID,
            name: "test".to_string(),
            threshold_percentage,
            targets: targets
                .iter()
                .enumerate()
                .map(|(i, name)| PoolTarget {
                    id: Uuid::new_v4(),
                    pool_id: DEFAULT_POOL_ID,
                    name: name.to_string(),
                    address: format!("127.0.0.1:{}", 5300 + i),
                    description: None,
                })
                .collect(),
        }],
        propagation: PropagationConfig {
            max_attempts: 3,
            retry_base: Duration::from_millis(10),
            retry_max: Duration::from_millis(20),
            target_timeout: Duration::from_millis(500),
            max_concurrent_targets: 8,
            queue_size: 64,
            recovery_interval: Duration::ZERO,
            pending_grace: Duration::from_secs(60),
        },
        ..CentralConfig::default()
    }
}

/// A running central service, pool manager and RPC server
pub struct Harness {
    pub client: CentralClient,
    pub storage: Arc<SlowStorage>,
    pub transport: Arc<ScriptedTransport>,
    pub pool_manager: Arc<PoolManager>,
    pub metrics: Arc<CentralMetrics>,
    pub handle: PoolManagerHandle,
    shutdown_tx: broadcast::Sender<()>,
}

impl Harness {
    pub fn start(config: CentralConfig) -> Self {
        let storage = SlowStorage::new();
        let transport = ScriptedTransport::new();
        let metrics = Arc::new(CentralMetrics::new().unwrap());
        let (shutdown_tx, _) = broadcast::channel(1);

        let (handle, requests) = PoolManagerHandle::channel(config.propagation.queue_size);
        let pool_manager = Arc::new(
            PoolManager::new(storage.clone(), transport.clone(), &config, handle.clone())
                .with_metrics(metrics.clone()),
        );
        tokio::spawn(pool_manager.clone().run(requests, shutdown_tx.subscribe()));

        let central = CentralService::new(
            storage.clone(),
            SerialManager::new(config.serial_scheme),
            handle.clone(),
            CentralOptions::from(&config),
        )
        .with_metrics(metrics.clone());

        let (client, calls) = rpc::channel(config.rpc_queue_size, config.rpc_timeout);
        let server = Arc::new(
            RpcServer::new(Arc::new(central), config.rpc_workers).with_metrics(metrics.clone()),
        );
        tokio::spawn(server.run(calls, shutdown_tx.subscribe()));

        Self {
            client: client.with_metrics(metrics.clone()),
            storage,
            transport,
            pool_manager,
            metrics,
            handle,
            shutdown_tx,
        }
    }

    pub async fn create_domain(&self, ctx: &RequestContext, name: &str) -> Domain {
        self.client
            .create_domain(ctx, new_domain(name))
            .await
            .into_result()
            .expect("domain creation failed")
    }

    /// Poll until the domain reaches `status` at `serial`
    pub async fn wait_for_status(&self, id: Uuid, serial: u32, status: DomainStatus) -> Domain {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let domain = self.storage.get_domain(id).await.unwrap();
            if domain.serial == serial && domain.status == status {
                return domain;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "domain stuck at serial {} {}, wanted serial {} {}",
                domain.serial,
                domain.status,
                serial,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the domain row is gone
    pub async fn wait_for_purge(&self, id: Uuid) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !matches!(
            self.storage.get_domain(id).await,
            Err(StorageError::NotFound { .. })
        ) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "domain {} was never purged",
                id
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

pub fn new_domain(name: &str) -> NewDomain {
    NewDomain {
        name: name.to_string(),
        email: "hostmaster@example.org".to_string(),
        ttl: None,
        description: None,
    }
}

pub fn new_recordset(name: &str, rtype: RecordType) -> NewRecordSet {
    NewRecordSet {
        name: name.to_string(),
        rtype,
        ttl: None,
        description: None,
    }
}

/// Unwrap a successful gateway call
pub fn ok<T: std::fmt::Debug>(outcome: RpcOutcome<T>) -> T {
    match outcome {
        RpcOutcome::Ok(value) => value,
        other => panic!("expected success, got {:?}", other),
    }
}
