//! Propagation coordinator.
//!
//! Receives serial bumps from the central service, pushes them to every
//! target of the zone's pool, and moves the zone to ACTIVE once enough
//! targets acknowledge (or ERROR once that can no longer happen). Zones
//! being deleted are purged from storage at that point instead.

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::time::{self, timeout};
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{TargetOutcome, ZoneTransport};
use crate::config::{CentralConfig, PoolConfig, PropagationConfig};
use crate::error::CentralError;
use crate::metrics::CentralMetrics;
use crate::model::{
    Domain, DomainAction, DomainFilter, DomainStatus, PoolTarget, TargetOutcomeState,
    TargetStatus,
};
use crate::storage::{Storage, StorageError};

/// A zone serial that has to reach the name servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationRequest {
    pub domain_id: Uuid,
    pub zone_name: String,
    pub serial: u32,
    pub action: DomainAction,
    pub pool_id: Uuid,
}

impl From<&Domain> for PropagationRequest {
    fn from(domain: &Domain) -> Self {
        Self {
            domain_id: domain.id,
            zone_name: domain.name.clone(),
            serial: domain.serial,
            action: domain.action,
            pool_id: domain.pool_id,
        }
    }
}

/// Sending side of the propagation queue, held by the central service
#[derive(Clone)]
pub struct PoolManagerHandle {
    sender: mpsc::Sender<PropagationRequest>,
    /// Newest serial scheduled per domain
    scheduled: Arc<DashMap<Uuid, u32>>,
}

impl PoolManagerHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PropagationRequest>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                scheduled: Arc::new(DashMap::new()),
            },
            receiver,
        )
    }

    /// Queue propagation of the domain's current serial without waiting
    pub fn schedule(&self, domain: &Domain) {
        self.scheduled
            .entry(domain.id)
            .and_modify(|s| *s = (*s).max(domain.serial))
            .or_insert(domain.serial);

        match self.sender.try_send(PropagationRequest::from(domain)) {
            Ok(()) => debug!(
                "Scheduled propagation of {} serial {}",
                domain.name, domain.serial
            ),
            Err(mpsc::error::TrySendError::Full(_)) => warn!(
                "Propagation queue full, {} serial {} left to recovery",
                domain.name, domain.serial
            ),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Pool manager stopped, dropping {}", domain.name)
            }
        }
    }

    pub fn latest_scheduled(&self, domain_id: Uuid) -> Option<u32> {
        self.scheduled.get(&domain_id).map(|s| *s)
    }

    fn forget(&self, domain_id: Uuid) {
        self.scheduled.remove(&domain_id);
    }

    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

/// Progress of one serial of one domain across its pool
#[derive(Debug, Clone)]
struct Round {
    id: Uuid,
    serial: u32,
    action: DomainAction,
    total: usize,
    quorum: usize,
    acked: usize,
    failed: usize,
    concluded: bool,
}

impl Round {
    fn new(serial: u32, action: DomainAction, pool: &PoolConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            serial,
            action,
            total: pool.targets.len(),
            quorum: pool.quorum(),
            acked: 0,
            failed: 0,
            concluded: false,
        }
    }

    /// Account for one target finishing; returns the zone status once decided
    fn record(&mut self, acked: bool) -> Option<DomainStatus> {
        if acked {
            self.acked += 1;
        } else {
            self.failed += 1;
        }
        self.evaluate()
    }

    fn evaluate(&mut self) -> Option<DomainStatus> {
        if self.concluded {
            return None;
        }
        let outstanding = self.total - self.acked - self.failed;
        if self.acked >= self.quorum {
            self.concluded = true;
            Some(DomainStatus::Active)
        } else if self.acked + outstanding < self.quorum {
            self.concluded = true;
            Some(DomainStatus::Error)
        } else {
            None
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    /// The target did not reach the requested state
    Failed(CentralError),
    /// A newer serial or a purge made this request moot
    Cancelled,
}

pub struct PoolManager {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn ZoneTransport>,
    pools: HashMap<Uuid, PoolConfig>,
    config: PropagationConfig,
    handle: PoolManagerHandle,
    permits: Arc<Semaphore>,
    rounds: DashMap<Uuid, Round>,
    metrics: Option<Arc<CentralMetrics>>,
}

impl PoolManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn ZoneTransport>,
        config: &CentralConfig,
        handle: PoolManagerHandle,
    ) -> Self {
        info!(
            "Pool manager with {} pools, {} concurrent target exchanges",
            config.pools.len(),
            config.propagation.max_concurrent_targets
        );
        Self {
            storage,
            transport,
            pools: config.pools.iter().map(|p| (p.id, p.clone())).collect(),
            config: config.propagation.clone(),
            handle,
            permits: Arc::new(Semaphore::new(config.propagation.max_concurrent_targets)),
            rounds: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CentralMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn handle(&self) -> &PoolManagerHandle {
        &self.handle
    }

    /// Consume propagation requests until shutdown. Each request is driven on
    /// its own task.
    pub async fn run(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<PropagationRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let recovery_enabled = !self.config.recovery_interval.is_zero();
        let mut recovery = time::interval(if recovery_enabled {
            self.config.recovery_interval
        } else {
            Duration::from_secs(3600)
        });
        recovery.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick fires immediately
        recovery.tick().await;

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        debug!("Propagation queue closed");
                        break;
                    };
                    let manager = self.clone();
                    tokio::spawn(async move { manager.propagate(request).await });
                }
                _ = recovery.tick(), if recovery_enabled => {
                    self.recover().await;
                }
                _ = shutdown.recv() => {
                    info!("Pool manager shutting down");
                    break;
                }
            }
            if let Some(metrics) = &self.metrics {
                metrics.set_queue_depth(self.handle.queue_depth());
            }
        }
    }

    /// Drive one request to a decision
    pub async fn propagate(&self, request: PropagationRequest) {
        if self.superseded(&request) {
            debug!(
                "Skipping {} serial {}: superseded",
                request.zone_name, request.serial
            );
            return;
        }

        let domain = match self.storage.get_domain(request.domain_id).await {
            Ok(domain) => domain,
            Err(StorageError::NotFound { .. }) => {
                debug!("Skipping {}: domain is gone", request.zone_name);
                return;
            }
            Err(e) => {
                error!("Cannot load domain {}: {}", request.zone_name, e);
                return;
            }
        };
        if domain.serial != request.serial {
            debug!(
                "Skipping {} serial {}: domain is at {}",
                request.zone_name, request.serial, domain.serial
            );
            return;
        }

        let Some(pool) = self.pools.get(&request.pool_id) else {
            error!(
                "Domain {} references unknown pool {}",
                request.zone_name, request.pool_id
            );
            self.conclude(&request, DomainStatus::Error).await;
            return;
        };

        // Start the round unless the same serial is already in flight
        let mut started = None;
        self.rounds
            .entry(request.domain_id)
            .and_modify(|round| {
                if round.serial < request.serial || (round.serial == request.serial && round.concluded) {
                    *round = Round::new(request.serial, request.action, pool);
                    started = Some(round.id);
                }
            })
            .or_insert_with(|| {
                let round = Round::new(request.serial, request.action, pool);
                started = Some(round.id);
                round
            });
        let Some(round_id) = started else {
            debug!(
                "Propagation of {} serial {} already in progress",
                request.zone_name, request.serial
            );
            return;
        };

        info!(
            "Propagating {} serial {} ({:?}) to {} targets, quorum {}",
            request.zone_name,
            request.serial,
            request.action,
            pool.targets.len(),
            pool.quorum()
        );

        if pool.targets.is_empty() {
            let decision = self
                .rounds
                .get_mut(&request.domain_id)
                .filter(|round| round.id == round_id)
                .and_then(|mut round| round.evaluate());
            if let Some(status) = decision {
                self.conclude(&request, status).await;
            }
        }

        let shared = &request;
        let mut targets: FuturesUnordered<_> = pool
            .targets
            .iter()
            .map(|target| self.drive_target(shared, target))
            .collect();

        while let Some(result) = targets.next().await {
            let acked = match result {
                Ok(()) => true,
                Err(AttemptError::Cancelled) => continue,
                Err(AttemptError::Failed(err)) => {
                    warn!("Gave up on {} serial {}: {}", request.zone_name, request.serial, err);
                    false
                }
            };

            let decision = match self.rounds.get_mut(&request.domain_id) {
                Some(mut round) if round.id == round_id => round.record(acked),
                _ => None,
            };
            if let Some(status) = decision {
                self.conclude(&request, status).await;
            }
        }

        // Every target is done; forget the round unless another one replaced it
        self.rounds
            .remove_if(&request.domain_id, |_, round| round.id == round_id);
    }

    /// Retry one target until it acknowledges, gives up, or the request
    /// becomes moot
    async fn drive_target(
        &self,
        request: &PropagationRequest,
        target: &PoolTarget,
    ) -> Result<(), AttemptError> {
        let factor = (self.config.retry_base.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.config.retry_max)
            .map(jitter)
            .take(self.config.max_attempts.saturating_sub(1));

        let attempts = AtomicU32::new(0);
        let result = RetryIf::spawn(
            strategy,
            || self.attempt(request, target, &attempts),
            |err: &AttemptError| matches!(err, AttemptError::Failed(_)),
        )
        .await;

        let (state, last_error) = match &result {
            Ok(()) => (TargetOutcomeState::Success, None),
            Err(AttemptError::Failed(err)) => (TargetOutcomeState::Error, Some(err.to_string())),
            Err(AttemptError::Cancelled) => return result,
        };
        self.record_target(request, target, state, attempts.load(Ordering::Relaxed), last_error)
            .await;
        result
    }

    async fn attempt(
        &self,
        request: &PropagationRequest,
        target: &PoolTarget,
        attempts: &AtomicU32,
    ) -> Result<(), AttemptError> {
        if self.superseded(request) || self.purged(request) {
            debug!(
                "Stopping attempts of {} serial {} on {}",
                request.zone_name, request.serial, target.name
            );
            return Err(AttemptError::Cancelled);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AttemptError::Cancelled)?;

        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.record_target(request, target, TargetOutcomeState::Pending, attempt, None)
            .await;

        let call = async {
            match request.action {
                DomainAction::Delete => {
                    self.transport
                        .remove_zone(target, &request.zone_name)
                        .await
                }
                _ => {
                    self.transport
                        .update_zone(target, &request.zone_name, request.serial)
                        .await
                }
            }
        };
        let outcome = timeout(self.config.target_timeout, call)
            .await
            .unwrap_or(TargetOutcome::Timeout);

        if let Some(metrics) = &self.metrics {
            metrics.record_propagation_attempt(&target.name, outcome.label());
        }
        debug!(
            "{} serial {} on {} attempt {}: {}",
            request.zone_name, request.serial, target.name, attempt, outcome
        );

        if outcome.is_ack() {
            return Ok(());
        }
        Err(AttemptError::Failed(CentralError::Propagation {
            target: target.name.clone(),
            reason: outcome.to_string(),
        }))
    }

    async fn record_target(
        &self,
        request: &PropagationRequest,
        target: &PoolTarget,
        state: TargetOutcomeState,
        attempts: u32,
        last_error: Option<String>,
    ) {
        let status = TargetStatus {
            domain_id: request.domain_id,
            target_id: target.id,
            serial: request.serial,
            action: request.action,
            state,
            attempts,
            last_error,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.storage.upsert_target_status(status).await {
            warn!("Cannot record status of {} on {}: {}", request.zone_name, target.name, e);
        }
    }

    /// Persist the decision for a round
    async fn conclude(&self, request: &PropagationRequest, status: DomainStatus) {
        let result = match (status, request.action) {
            (DomainStatus::Active, DomainAction::Delete) => {
                let purged = self
                    .storage
                    .purge_domain(request.domain_id, request.serial)
                    .await;
                if matches!(purged, Ok(true)) {
                    self.handle.forget(request.domain_id);
                    info!("Purged {} after removal from name servers", request.zone_name);
                }
                purged
            }
            _ => {
                self.storage
                    .set_domain_status(request.domain_id, request.serial, status)
                    .await
            }
        };

        match result {
            Ok(true) => {
                info!(
                    "{} serial {} is {}",
                    request.zone_name, request.serial, status
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_propagation_result(status);
                }
            }
            Ok(false) => debug!(
                "{} moved past serial {}, status {} not applied",
                request.zone_name, request.serial, status
            ),
            Err(StorageError::NotFound { .. }) => {
                debug!("{} vanished before status {}", request.zone_name, status)
            }
            Err(e) => error!("Cannot set status of {}: {}", request.zone_name, e),
        }
    }

    fn superseded(&self, request: &PropagationRequest) -> bool {
        self.handle
            .latest_scheduled(request.domain_id)
            .is_some_and(|latest| latest > request.serial)
    }

    /// Whether a deletion of this domain already reached quorum
    fn purged(&self, request: &PropagationRequest) -> bool {
        self.rounds.get(&request.domain_id).is_some_and(|round| {
            round.action == DomainAction::Delete && round.concluded && round.acked >= round.quorum
        })
    }

    /// Re-queue zones stuck in ERROR, or in PENDING with no progress
    pub async fn recover(&self) {
        let errored = DomainFilter {
            status: Some(DomainStatus::Error),
            ..Default::default()
        };
        let pending = DomainFilter {
            status: Some(DomainStatus::Pending),
            ..Default::default()
        };

        let (errored, pending) = match (
            self.storage.find_domains(&errored).await,
            self.storage.find_domains(&pending).await,
        ) {
            (Ok(e), Ok(p)) => (e, p),
            (Err(e), _) | (_, Err(e)) => {
                error!("Recovery scan failed: {}", e);
                return;
            }
        };

        let cutoff = chrono::Duration::from_std(self.config.pending_grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace));
        let stuck = pending.into_iter().filter(|d| {
            cutoff.is_some_and(|cutoff| d.updated_at.unwrap_or(d.created_at) < cutoff)
                && !self
                    .rounds
                    .get(&d.id)
                    .is_some_and(|r| r.serial == d.serial && !r.concluded)
        });

        let mut requeued = 0;
        for domain in errored.into_iter().chain(stuck) {
            debug!("Recovering {} at serial {}", domain.name, domain.serial);
            self.handle.schedule(&domain);
            requeued += 1;
        }
        if requeued > 0 {
            info!("Recovery re-queued {} zones", requeued);
        }

        if let Some(metrics) = &self.metrics {
            match self.storage.domain_counts_by_status().await {
                Ok(counts) => metrics.update_zone_counts(&counts),
                Err(e) => warn!("Cannot refresh zone gauges: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(targets: usize, threshold: u8) -> PoolConfig {
        let mut pool = CentralConfig::default().pools.remove(0);
        let template = pool.targets[0].clone();
        pool.targets = (0..targets)
            .map(|i| PoolTarget {
                id: Uuid::new_v4(),
                name: format!("ns{}", i),
                ..template.clone()
            })
            .collect();
        pool.threshold_percentage = threshold;
        pool
    }

    #[test]
    fn test_round_reaches_quorum() {
        let mut round = Round::new(2, DomainAction::Update, &pool(2, 100));
        assert_eq!(round.record(true), None);
        assert_eq!(round.record(true), Some(DomainStatus::Active));
        // Decided once
        assert_eq!(round.evaluate(), None);
    }

    #[test]
    fn test_round_fails_when_quorum_unreachable() {
        let mut round = Round::new(2, DomainAction::Update, &pool(3, 100));
        assert_eq!(round.record(false), Some(DomainStatus::Error));

        let mut round = Round::new(2, DomainAction::Update, &pool(3, 50));
        assert_eq!(round.record(false), None);
        assert_eq!(round.record(true), None);
        assert_eq!(round.record(true), Some(DomainStatus::Active));
    }

    #[test]
    fn test_empty_pool_is_immediately_active() {
        let mut round = Round::new(1, DomainAction::Create, &pool(0, 100));
        assert_eq!(round.evaluate(), Some(DomainStatus::Active));
    }

    #[tokio::test]
    async fn test_schedule_tracks_latest_serial() {
        let (handle, mut rx) = PoolManagerHandle::channel(1);
        let domain = Domain {
            id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            name: "example.org.".to_string(),
            email: "hostmaster@example.org".to_string(),
            ttl: 3600,
            serial: 3,
            status: DomainStatus::Pending,
            action: DomainAction::Update,
            description: None,
            pool_id: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: None,
        };

        handle.schedule(&domain);
        assert_eq!(handle.queue_depth(), 1);
        // Queue full: dropped, but still recorded as latest
        handle.schedule(&Domain {
            serial: 4,
            ..domain.clone()
        });
        assert_eq!(handle.latest_scheduled(domain.id), Some(4));

        let request = rx.recv().await.unwrap();
        assert_eq!(request.serial, 3);
        assert_eq!(handle.queue_depth(), 0);
    }
}
