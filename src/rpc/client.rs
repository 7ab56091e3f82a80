use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::message::{Call, CentralRequest, CentralResponse, Envelope, Reply, RpcOutcome};
use crate::error::CentralError;
use crate::metrics::CentralMetrics;
use crate::model::{
    Blacklist, BlacklistUpdate, Domain, DomainFilter, DomainStatusReport, DomainUpdate,
    NewBlacklist, NewDomain, NewRecord, NewRecordSet, Record, RecordFilter, RecordSet,
    RecordSetFilter, RecordSetUpdate, RecordUpdate, RequestContext,
};

/// Typed client of the central service.
///
/// Cheap to clone; every clone shares the same connection to the server.
#[derive(Clone)]
pub struct CentralClient {
    sender: mpsc::Sender<Call>,
    timeout: Duration,
    metrics: Option<Arc<CentralMetrics>>,
}

/// Pick the expected variant out of a response
macro_rules! expect_response {
    ($outcome:expr, $variant:ident) => {
        match $outcome {
            RpcOutcome::Ok(CentralResponse::$variant(value)) => RpcOutcome::Ok(value),
            RpcOutcome::Ok(other) => RpcOutcome::Error(CentralError::Transport(format!(
                "unexpected response {:?}",
                other
            ))),
            RpcOutcome::Timeout => RpcOutcome::Timeout,
            RpcOutcome::Error(e) => RpcOutcome::Error(e),
        }
    };
}

impl CentralClient {
    pub(crate) fn new(sender: mpsc::Sender<Call>, timeout: Duration) -> Self {
        Self {
            sender,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CentralMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// A client sharing this connection with a different deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Issue a raw call. Exceeding the deadline yields `Timeout`; the server
    /// keeps working on the request regardless.
    pub async fn call(
        &self,
        ctx: &RequestContext,
        request: CentralRequest,
    ) -> RpcOutcome<CentralResponse> {
        let method = request.method();
        let envelope = Envelope {
            msg_id: Uuid::new_v4(),
            context: ctx.clone(),
            request,
        };
        let msg_id = envelope.msg_id;
        let started = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.round_trip(envelope)).await {
            Ok(reply) => RpcOutcome::from(reply),
            Err(_) => {
                warn!(
                    "{} ({}) timed out after {:?}, outcome unknown",
                    method, msg_id, self.timeout
                );
                RpcOutcome::Timeout
            }
        };

        debug!("{} ({}) -> {}", method, msg_id, outcome.label());
        if let Some(metrics) = &self.metrics {
            metrics.record_rpc(method, outcome.label(), started.elapsed());
        }
        outcome
    }

    async fn round_trip(&self, envelope: Envelope) -> Reply {
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| CentralError::Transport(format!("cannot encode request: {}", e)))?;

        let (reply, response) = oneshot::channel();
        self.sender
            .send(Call { payload, reply })
            .await
            .map_err(|_| CentralError::ShuttingDown)?;

        let raw = response
            .await
            .map_err(|_| CentralError::Transport("central service dropped the request".to_string()))?;

        serde_json::from_str::<Reply>(&raw)
            .map_err(|e| CentralError::Transport(format!("cannot decode reply: {}", e)))?
    }

    // ----- Domains -----

    pub async fn create_domain(&self, ctx: &RequestContext, domain: NewDomain) -> RpcOutcome<Domain> {
        expect_response!(
            self.call(ctx, CentralRequest::CreateDomain { domain }).await,
            Domain
        )
    }

    pub async fn get_domain(&self, ctx: &RequestContext, domain_id: Uuid) -> RpcOutcome<Domain> {
        expect_response!(
            self.call(ctx, CentralRequest::GetDomain { domain_id }).await,
            Domain
        )
    }

    pub async fn find_domains(
        &self,
        ctx: &RequestContext,
        filter: DomainFilter,
    ) -> RpcOutcome<Vec<Domain>> {
        expect_response!(
            self.call(ctx, CentralRequest::FindDomains { filter }).await,
            Domains
        )
    }

    pub async fn count_domains(&self, ctx: &RequestContext) -> RpcOutcome<usize> {
        expect_response!(self.call(ctx, CentralRequest::CountDomains).await, Count)
    }

    pub async fn update_domain(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        update: DomainUpdate,
    ) -> RpcOutcome<Domain> {
        expect_response!(
            self.call(ctx, CentralRequest::UpdateDomain { domain_id, update })
                .await,
            Domain
        )
    }

    pub async fn delete_domain(&self, ctx: &RequestContext, domain_id: Uuid) -> RpcOutcome<Domain> {
        expect_response!(
            self.call(ctx, CentralRequest::DeleteDomain { domain_id }).await,
            Domain
        )
    }

    pub async fn get_domain_status(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
    ) -> RpcOutcome<DomainStatusReport> {
        expect_response!(
            self.call(ctx, CentralRequest::GetDomainStatus { domain_id })
                .await,
            DomainStatus
        )
    }

    // ----- Record sets -----

    pub async fn create_recordset(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset: NewRecordSet,
    ) -> RpcOutcome<RecordSet> {
        expect_response!(
            self.call(ctx, CentralRequest::CreateRecordSet { domain_id, recordset })
                .await,
            RecordSet
        )
    }

    pub async fn get_recordset(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
    ) -> RpcOutcome<RecordSet> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::GetRecordSet {
                    domain_id,
                    recordset_id
                }
            )
            .await,
            RecordSet
        )
    }

    pub async fn find_recordsets(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        filter: RecordSetFilter,
    ) -> RpcOutcome<Vec<RecordSet>> {
        expect_response!(
            self.call(ctx, CentralRequest::FindRecordSets { domain_id, filter })
                .await,
            RecordSets
        )
    }

    pub async fn update_recordset(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        update: RecordSetUpdate,
    ) -> RpcOutcome<RecordSet> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::UpdateRecordSet {
                    domain_id,
                    recordset_id,
                    update
                }
            )
            .await,
            RecordSet
        )
    }

    pub async fn delete_recordset(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
    ) -> RpcOutcome<RecordSet> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::DeleteRecordSet {
                    domain_id,
                    recordset_id
                }
            )
            .await,
            RecordSet
        )
    }

    // ----- Records -----

    pub async fn create_record(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        record: NewRecord,
    ) -> RpcOutcome<Record> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::CreateRecord {
                    domain_id,
                    recordset_id,
                    record
                }
            )
            .await,
            Record
        )
    }

    pub async fn get_record(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        record_id: Uuid,
    ) -> RpcOutcome<Record> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::GetRecord {
                    domain_id,
                    recordset_id,
                    record_id
                }
            )
            .await,
            Record
        )
    }

    pub async fn find_records(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        filter: RecordFilter,
    ) -> RpcOutcome<Vec<Record>> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::FindRecords {
                    domain_id,
                    recordset_id,
                    filter
                }
            )
            .await,
            Records
        )
    }

    pub async fn update_record(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        record_id: Uuid,
        update: RecordUpdate,
    ) -> RpcOutcome<Record> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::UpdateRecord {
                    domain_id,
                    recordset_id,
                    record_id,
                    update
                }
            )
            .await,
            Record
        )
    }

    pub async fn delete_record(
        &self,
        ctx: &RequestContext,
        domain_id: Uuid,
        recordset_id: Uuid,
        record_id: Uuid,
    ) -> RpcOutcome<Record> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::DeleteRecord {
                    domain_id,
                    recordset_id,
                    record_id
                }
            )
            .await,
            Record
        )
    }

    // ----- Blacklists -----

    pub async fn create_blacklist(
        &self,
        ctx: &RequestContext,
        blacklist: NewBlacklist,
    ) -> RpcOutcome<Blacklist> {
        expect_response!(
            self.call(ctx, CentralRequest::CreateBlacklist { blacklist })
                .await,
            Blacklist
        )
    }

    pub async fn get_blacklist(
        &self,
        ctx: &RequestContext,
        blacklist_id: Uuid,
    ) -> RpcOutcome<Blacklist> {
        expect_response!(
            self.call(ctx, CentralRequest::GetBlacklist { blacklist_id })
                .await,
            Blacklist
        )
    }

    pub async fn find_blacklists(&self, ctx: &RequestContext) -> RpcOutcome<Vec<Blacklist>> {
        expect_response!(
            self.call(ctx, CentralRequest::FindBlacklists).await,
            Blacklists
        )
    }

    pub async fn update_blacklist(
        &self,
        ctx: &RequestContext,
        blacklist_id: Uuid,
        update: BlacklistUpdate,
    ) -> RpcOutcome<Blacklist> {
        expect_response!(
            self.call(
                ctx,
                CentralRequest::UpdateBlacklist {
                    blacklist_id,
                    update
                }
            )
            .await,
            Blacklist
        )
    }

    pub async fn delete_blacklist(
        &self,
        ctx: &RequestContext,
        blacklist_id: Uuid,
    ) -> RpcOutcome<Blacklist> {
        expect_response!(
            self.call(ctx, CentralRequest::DeleteBlacklist { blacklist_id })
                .await,
            Blacklist
        )
    }
}
