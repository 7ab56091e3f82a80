use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::CentralError;
use crate::model::{
    Blacklist, BlacklistUpdate, Domain, DomainFilter, DomainStatusReport, DomainUpdate,
    NewBlacklist, NewDomain, NewRecord, NewRecordSet, Record, RecordFilter, RecordSet,
    RecordSetFilter, RecordSetUpdate, RecordUpdate, RequestContext,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum CentralRequest {
    CreateDomain {
        domain: NewDomain,
    },
    GetDomain {
        domain_id: Uuid,
    },
    FindDomains {
        filter: DomainFilter,
    },
    CountDomains,
    UpdateDomain {
        domain_id: Uuid,
        update: DomainUpdate,
    },
    DeleteDomain {
        domain_id: Uuid,
    },
    GetDomainStatus {
        domain_id: Uuid,
    },
    CreateRecordSet {
        domain_id: Uuid,
        recordset: NewRecordSet,
    },
    GetRecordSet {
        domain_id: Uuid,
        recordset_id: Uuid,
    },
    FindRecordSets {
        domain_id: Uuid,
        filter: RecordSetFilter,
    },
    UpdateRecordSet {
        domain_id: Uuid,
        recordset_id: Uuid,
        update: RecordSetUpdate,
    },
    DeleteRecordSet {
        domain_id: Uuid,
        recordset_id: Uuid,
    },
    CreateRecord {
        domain_id: Uuid,
        recordset_id: Uuid,
        record: NewRecord,
    },
    GetRecord {
        domain_id: Uuid,
        recordset_id: Uuid,
        record_id: Uuid,
    },
    FindRecords {
        domain_id: Uuid,
        recordset_id: Uuid,
        filter: RecordFilter,
    },
    UpdateRecord {
        domain_id: Uuid,
        recordset_id: Uuid,
        record_id: Uuid,
        update: RecordUpdate,
    },
    DeleteRecord {
        domain_id: Uuid,
        recordset_id: Uuid,
        record_id: Uuid,
    },
    CreateBlacklist {
        blacklist: NewBlacklist,
    },
    GetBlacklist {
        blacklist_id: Uuid,
    },
    FindBlacklists,
    UpdateBlacklist {
        blacklist_id: Uuid,
        update: BlacklistUpdate,
    },
    DeleteBlacklist {
        blacklist_id: Uuid,
    },
}

impl CentralRequest {
    /// Method name used in logs and metrics
    pub fn method(&self) -> &'static str {
        match self {
            CentralRequest::CreateDomain { .. } => "create_domain",
            CentralRequest::GetDomain { .. } => "get_domain",
            CentralRequest::FindDomains { .. } => "find_domains",
            CentralRequest::CountDomains => "count_domains",
            CentralRequest::UpdateDomain { .. } => "update_domain",
            CentralRequest::DeleteDomain { .. } => "delete_domain",
            CentralRequest::GetDomainStatus { .. } => "get_domain_status",
            CentralRequest::CreateRecordSet { .. } => "create_recordset",
            CentralRequest::GetRecordSet { .. } => "get_recordset",
            CentralRequest::FindRecordSets { .. } => "find_recordsets",
            CentralRequest::UpdateRecordSet { .. } => "update_recordset",
            CentralRequest::DeleteRecordSet { .. } => "delete_recordset",
            CentralRequest::CreateRecord { .. } => "create_record",
            CentralRequest::GetRecord { .. } => "get_record",
            CentralRequest::FindRecords { .. } => "find_records",
            CentralRequest::UpdateRecord { .. } => "update_record",
            CentralRequest::DeleteRecord { .. } => "delete_record",
            CentralRequest::CreateBlacklist { .. } => "create_blacklist",
            CentralRequest::GetBlacklist { .. } => "get_blacklist",
            CentralRequest::FindBlacklists => "find_blacklists",
            CentralRequest::UpdateBlacklist { .. } => "update_blacklist",
            CentralRequest::DeleteBlacklist { .. } => "delete_blacklist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CentralResponse {
    Domain(Domain),
    Domains(Vec<Domain>),
    Count(usize),
    DomainStatus(DomainStatusReport),
    RecordSet(RecordSet),
    RecordSets(Vec<RecordSet>),
    Record(Record),
    Records(Vec<Record>),
    Blacklist(Blacklist),
    Blacklists(Vec<Blacklist>),
}

/// Wire form of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_id: Uuid,
    pub context: RequestContext,
    pub request: CentralRequest,
}

/// Wire form of the answer: the exact server-side error or the response
pub type Reply = Result<CentralResponse, CentralError>;

/// An encoded envelope travelling to the server with its reply slot
pub struct Call {
    pub(crate) payload: String,
    pub(crate) reply: oneshot::Sender<String>,
}

/// Result of a gateway call.
///
/// `Timeout` means the outcome is unknown: the server may still complete
/// the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcOutcome<T> {
    Ok(T),
    Timeout,
    Error(CentralError),
}

impl<T> RpcOutcome<T> {
    pub fn into_result(self) -> Result<T, CentralError> {
        match self {
            RpcOutcome::Ok(value) => Ok(value),
            RpcOutcome::Timeout => Err(CentralError::Timeout),
            RpcOutcome::Error(e) => Err(e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RpcOutcome::Ok(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcOutcome::Timeout)
    }

    pub fn error(&self) -> Option<&CentralError> {
        match self {
            RpcOutcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RpcOutcome<U> {
        match self {
            RpcOutcome::Ok(value) => RpcOutcome::Ok(f(value)),
            RpcOutcome::Timeout => RpcOutcome::Timeout,
            RpcOutcome::Error(e) => RpcOutcome::Error(e),
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            RpcOutcome::Ok(_) => "ok",
            RpcOutcome::Timeout => "timeout",
            RpcOutcome::Error(_) => "error",
        }
    }
}

impl<T> From<Result<T, CentralError>> for RpcOutcome<T> {
    fn from(result: Result<T, CentralError>) -> Self {
        match result {
            Ok(value) => RpcOutcome::Ok(value),
            Err(CentralError::Timeout) => RpcOutcome::Timeout,
            Err(e) => RpcOutcome::Error(e),
        }
    }
}
