use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tracing::{debug, info, warn};

use super::message::{Call, CentralRequest, CentralResponse, Envelope, Reply};
use crate::central::CentralService;
use crate::error::CentralError;
use crate::metrics::CentralMetrics;

/// Serves gateway calls against a [`CentralService`].
///
/// Every call runs in its own task. A caller giving up does not cancel the
/// work: the operation completes and its reply is discarded.
pub struct RpcServer {
    central: Arc<CentralService>,
    workers: Arc<Semaphore>,
    metrics: Option<Arc<CentralMetrics>>,
}

impl RpcServer {
    pub fn new(central: Arc<CentralService>, workers: usize) -> Self {
        Self {
            central,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<CentralMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Accept calls until shutdown or until every client is gone
    pub async fn run(
        self: Arc<Self>,
        mut calls: mpsc::Receiver<Call>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("Central RPC server started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Central RPC server received shutdown signal");
                    break;
                }

                call = calls.recv() => {
                    let Some(call) = call else {
                        info!("All central clients dropped, stopping RPC server");
                        break;
                    };

                    let permit = match self.workers.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };

                    let server = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let reply = server.handle(&call.payload).await;
                        if call.reply.send(reply).is_err() {
                            debug!("Caller went away before the reply was ready");
                        }
                    });
                }
            }
        }
    }

    /// Decode, dispatch and encode one call
    pub async fn handle(&self, payload: &str) -> String {
        if let Some(metrics) = &self.metrics {
            metrics.rpc_started();
        }

        let reply: Reply = match serde_json::from_str::<Envelope>(payload) {
            Ok(envelope) => {
                let method = envelope.request.method();
                debug!("{} ({}) from tenant {}", method, envelope.msg_id, envelope.context.tenant_id);
                let reply = self.dispatch(envelope).await;
                if let Err(e) = &reply {
                    debug!("{} failed: {}", method, e);
                }
                reply
            }
            Err(e) => {
                warn!("Undecodable central request: {}", e);
                Err(CentralError::Transport(format!("undecodable request: {}", e)))
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.rpc_finished();
        }

        serde_json::to_string(&reply).unwrap_or_else(|e| {
            warn!("Cannot encode reply: {}", e);
            String::new()
        })
    }

    async fn dispatch(&self, envelope: Envelope) -> Reply {
        let ctx = &envelope.context;
        let central = &self.central;

        let response = match envelope.request {
            CentralRequest::CreateDomain { domain } => {
                CentralResponse::Domain(central.create_domain(ctx, domain).await?)
            }
            CentralRequest::GetDomain { domain_id } => {
                CentralResponse::Domain(central.get_domain(ctx, domain_id).await?)
            }
            CentralRequest::FindDomains { filter } => {
                CentralResponse::Domains(central.find_domains(ctx, filter).await?)
            }
            CentralRequest::CountDomains => CentralResponse::Count(central.count_domains(ctx).await?),
            CentralRequest::UpdateDomain { domain_id, update } => {
                CentralResponse::Domain(central.update_domain(ctx, domain_id, update).await?)
            }
            CentralRequest::DeleteDomain { domain_id } => {
                CentralResponse::Domain(central.delete_domain(ctx, domain_id).await?)
            }
            CentralRequest::GetDomainStatus { domain_id } => {
                CentralResponse::DomainStatus(central.get_domain_status(ctx, domain_id).await?)
            }
            CentralRequest::CreateRecordSet {
                domain_id,
                recordset,
            } => CentralResponse::RecordSet(
                central.create_recordset(ctx, domain_id, recordset).await?,
            ),
            CentralRequest::GetRecordSet {
                domain_id,
                recordset_id,
            } => CentralResponse::RecordSet(
                central.get_recordset(ctx, domain_id, recordset_id).await?,
            ),
            CentralRequest::FindRecordSets { domain_id, filter } => CentralResponse::RecordSets(
                central.find_recordsets(ctx, domain_id, filter).await?,
            ),
            CentralRequest::UpdateRecordSet {
                domain_id,
                recordset_id,
                update,
            } => CentralResponse::RecordSet(
                central
                    .update_recordset(ctx, domain_id, recordset_id, update)
                    .await?,
            ),
            CentralRequest::DeleteRecordSet {
                domain_id,
                recordset_id,
            } => CentralResponse::RecordSet(
                central.delete_recordset(ctx, domain_id, recordset_id).await?,
            ),
            CentralRequest::CreateRecord {
                domain_id,
                recordset_id,
                record,
            } => CentralResponse::Record(
                central
                    .create_record(ctx, domain_id, recordset_id, record)
                    .await?,
            ),
            CentralRequest::GetRecord {
                domain_id,
                recordset_id,
                record_id,
            } => CentralResponse::Record(
                central
                    .get_record(ctx, domain_id, recordset_id, record_id)
                    .await?,
            ),
            CentralRequest::FindRecords {
                domain_id,
                recordset_id,
                filter,
            } => CentralResponse::Records(
                central
                    .find_records(ctx, domain_id, recordset_id, filter)
                    .await?,
            ),
            CentralRequest::UpdateRecord {
                domain_id,
                recordset_id,
                record_id,
                update,
            } => CentralResponse::Record(
                central
                    .update_record(ctx, domain_id, recordset_id, record_id, update)
                    .await?,
            ),
            CentralRequest::DeleteRecord {
                domain_id,
                recordset_id,
                record_id,
            } => CentralResponse::Record(
                central
                    .delete_record(ctx, domain_id, recordset_id, record_id)
                    .await?,
            ),
            CentralRequest::CreateBlacklist { blacklist } => {
                CentralResponse::Blacklist(central.create_blacklist(ctx, blacklist).await?)
            }
            CentralRequest::GetBlacklist { blacklist_id } => {
                CentralResponse::Blacklist(central.get_blacklist(ctx, blacklist_id).await?)
            }
            CentralRequest::FindBlacklists => {
                CentralResponse::Blacklists(central.find_blacklists(ctx).await?)
            }
            CentralRequest::UpdateBlacklist {
                blacklist_id,
                update,
            } => CentralResponse::Blacklist(
                central.update_blacklist(ctx, blacklist_id, update).await?,
            ),
            CentralRequest::DeleteBlacklist { blacklist_id } => {
                CentralResponse::Blacklist(central.delete_blacklist(ctx, blacklist_id).await?)
            }
        };

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::test_support;
    use crate::model::{NewDomain, RequestContext};
    use crate::rpc;
    use std::time::Duration;
    use uuid::Uuid;

    fn start() -> (rpc::CentralClient, broadcast::Sender<()>) {
        let (central, _propagation) = test_support::service();
        let (client, calls) = rpc::channel(16, Duration::from_secs(5));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = Arc::new(RpcServer::new(Arc::new(central), 4));
        tokio::spawn(server.run(calls, shutdown_rx));
        (client, shutdown_tx)
    }

    #[tokio::test]
    async fn test_call_reaches_service() {
        let (client, _shutdown) = start();
        let ctx = RequestContext::tenant("t1");

        let domain = client
            .create_domain(
                &ctx,
                NewDomain {
                    name: "example.org.".to_string(),
                    email: "admin@example.org".to_string(),
                    ttl: None,
                    description: None,
                },
            )
            .await
            .into_result()
            .unwrap();

        let fetched = client.get_domain(&ctx, domain.id).await.into_result().unwrap();
        assert_eq!(fetched, domain);
        assert_eq!(client.count_domains(&ctx).await, rpc::RpcOutcome::Ok(1));
    }

    #[tokio::test]
    async fn test_error_crosses_gateway() {
        let (client, _shutdown) = start();
        let ctx = RequestContext::tenant("t1");
        let id = Uuid::new_v4();

        assert_eq!(
            client.delete_domain(&ctx, id).await,
            rpc::RpcOutcome::Error(CentralError::DomainNotFound(id.to_string()))
        );
    }

    #[tokio::test]
    async fn test_garbage_payload_yields_transport_error() {
        let (central, _propagation) = test_support::service();
        let server = RpcServer::new(Arc::new(central), 1);
        let raw = server.handle("{not json").await;
        let reply: Reply = serde_json::from_str(&raw).unwrap();
        assert!(matches!(reply, Err(CentralError::Transport(_))));
    }

    #[tokio::test]
    async fn test_stopped_server_is_unavailable() {
        let (client, shutdown) = start();
        shutdown.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = client.count_domains(&RequestContext::tenant("t1")).await;
        assert_eq!(outcome, rpc::RpcOutcome::Error(CentralError::ShuttingDown));
        assert_eq!(CentralError::ShuttingDown.http_status(), 503);
    }
}
