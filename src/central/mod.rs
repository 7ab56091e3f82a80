//! The central service: business rules for zones, record sets, records and
//! blacklists.
//!
//! Every zone content change bumps the zone serial in the same storage
//! transaction and then hands the new serial to the pool manager. Callers
//! never wait for name servers.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CentralConfig;
use crate::error::{CentralError, Result};
use crate::metrics::CentralMetrics;
use crate::model::{Domain, DomainAction, DomainStatus, RequestContext};
use crate::pool_manager::PoolManagerHandle;
use crate::serial::SerialManager;
use crate::storage::{Storage, ZoneChange, ZoneOp};

mod blacklists;
mod domains;
mod recordsets;
pub mod validation;

/// Business rule settings taken from [`CentralConfig`]
#[derive(Debug, Clone)]
pub struct CentralOptions {
    pub default_ttl: u32,
    pub min_ttl: u32,
    pub max_domains_per_tenant: Option<usize>,
    pub default_pool_id: Uuid,
    pub conflict_retries: usize,
    pub conflict_backoff: Duration,
}

impl From<&CentralConfig> for CentralOptions {
    fn from(config: &CentralConfig) -> Self {
        Self {
            default_ttl: config.default_ttl,
            min_ttl: config.min_ttl,
            max_domains_per_tenant: config.max_domains_per_tenant,
            default_pool_id: config.default_pool_id,
            conflict_retries: config.conflict_retries,
            conflict_backoff: config.conflict_backoff,
        }
    }
}

pub struct CentralService {
    storage: Arc<dyn Storage>,
    serials: SerialManager,
    propagation: PoolManagerHandle,
    options: CentralOptions,
    metrics: Option<Arc<CentralMetrics>>,
}

impl CentralService {
    pub fn new(
        storage: Arc<dyn Storage>,
        serials: SerialManager,
        propagation: PoolManagerHandle,
        options: CentralOptions,
    ) -> Self {
        Self {
            storage,
            serials,
            propagation,
            options,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CentralMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Load a domain the caller may see
    async fn visible_domain(&self, ctx: &RequestContext, id: Uuid) -> Result<Domain> {
        match self.storage.get_domain(id).await {
            Ok(domain) if ctx.can_access(&domain.tenant_id) => Ok(domain),
            // Other tenants' zones are indistinguishable from missing ones
            Ok(_) => Err(CentralError::DomainNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Load a domain the caller may change; zones awaiting removal are gone
    async fn writable_domain(&self, ctx: &RequestContext, id: Uuid) -> Result<Domain> {
        let domain = self.visible_domain(ctx, id).await?;
        if domain.is_deleting() {
            return Err(CentralError::DomainNotFound(id.to_string()));
        }
        Ok(domain)
    }

    /// Apply a zone change together with a serial increment.
    ///
    /// `build` receives the next domain row (attributes may be edited) and
    /// returns the content change plus the value handed back to the caller.
    /// It runs again, against freshly read state, whenever the commit loses
    /// an optimistic race.
    async fn mutate_zone<T, F>(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        action: DomainAction,
        build: F,
    ) -> Result<(Domain, T)>
    where
        F: Fn(&mut Domain) -> Result<(ZoneOp, T)>,
    {
        self.mutate_zone_with(
            ctx,
            domain_id,
            action,
            || async { Ok(()) },
            |domain, ()| build(domain),
        )
        .await
    }

    /// Like `mutate_zone`, for changes derived from an existing row.
    ///
    /// `load` runs on every attempt after the domain row is read, so a
    /// successful commit proves the row was not changed in between.
    async fn mutate_zone_with<S, T, L, LFut, F>(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        action: DomainAction,
        load: L,
        build: F,
    ) -> Result<(Domain, T)>
    where
        L: Fn() -> LFut,
        LFut: Future<Output = Result<S>>,
        F: Fn(&mut Domain, S) -> Result<(ZoneOp, T)>,
    {
        let factor = (self.options.conflict_backoff.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_millis(500))
            .map(jitter)
            .take(self.options.conflict_retries);

        let (domain, out) = RetryIf::spawn(
            strategy,
            || self.try_mutate(ctx, domain_id, action, &load, &build),
            |err: &CentralError| {
                let conflict = matches!(err, CentralError::Conflict(_));
                if conflict {
                    debug!("Serial race on domain {}, retrying", domain_id);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_serial_conflict();
                    }
                }
                conflict
            },
        )
        .await?;

        self.propagation.schedule(&domain);
        Ok((domain, out))
    }

    async fn try_mutate<S, T, L, LFut, F>(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        action: DomainAction,
        load: &L,
        build: &F,
    ) -> Result<(Domain, T)>
    where
        L: Fn() -> LFut,
        LFut: Future<Output = Result<S>>,
        F: Fn(&mut Domain, S) -> Result<(ZoneOp, T)>,
    {
        let current = self.writable_domain(ctx, domain_id).await?;
        let loaded = load().await?;

        let mut next = current.clone();
        let (op, out) = build(&mut next, loaded)?;

        let now = Utc::now();
        next.serial = self
            .serials
            .next(current.serial, now)
            .ok_or(CentralError::SerialExhausted(domain_id))?;
        next.status = DomainStatus::Pending;
        next.action = action;
        next.updated_at = Some(now);

        let stored = self
            .storage
            .commit(ZoneChange {
                expected_serial: current.serial,
                domain: next,
                op,
            })
            .await?;

        debug!(
            "Domain {} serial {} -> {} ({:?})",
            stored.name, current.serial, stored.serial, action
        );
        Ok((stored, out))
    }

    fn require_admin(&self, ctx: &RequestContext, what: &str) -> Result<()> {
        if !ctx.is_admin {
            warn!(
                "Tenant {} denied {} (request {})",
                ctx.tenant_id, what, ctx.request_id
            );
            return Err(CentralError::Forbidden(format!("{} requires an admin context", what)));
        }
        Ok(())
    }
}
