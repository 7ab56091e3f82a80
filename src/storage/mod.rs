//! Storage layer interface.
//!
//! All zone content mutations go through [`Storage::commit`], which applies
//! the record set or record change together with the new domain row (and so
//! the new serial) in a single transaction, guarded by the serial the caller
//! last read.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::error::CentralError;
use crate::model::{
    Blacklist, Domain, DomainFilter, DomainStatus, Record, RecordFilter, RecordSet,
    RecordSetFilter, TargetStatus,
};

pub mod memory;

pub use memory::MemoryStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Domain,
    RecordSet,
    Record,
    Blacklist,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Domain => write!(f, "domain"),
            Entity::RecordSet => write!(f, "recordset"),
            Entity::Record => write!(f, "record"),
            Entity::Blacklist => write!(f, "blacklist"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: Entity, key: String },
    #[error("stale serial for domain {domain_id}: expected {expected}, found {actual}")]
    StaleSerial {
        domain_id: Uuid,
        expected: u32,
        actual: u32,
    },
    #[error("tenant {tenant} reached the limit of {max} domains")]
    QuotaExceeded { tenant: String, max: usize },
    #[error("CNAME conflict at {0}")]
    CnameConflict(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for CentralError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, key } => match entity {
                Entity::Domain => CentralError::DomainNotFound(key),
                Entity::RecordSet => CentralError::RecordSetNotFound(key),
                Entity::Record => CentralError::RecordNotFound(key),
                Entity::Blacklist => CentralError::BlacklistNotFound(key),
            },
            StorageError::Duplicate { entity, key } => match entity {
                Entity::Domain => CentralError::DuplicateDomain(key),
                Entity::RecordSet => {
                    // key is "<name> <type>"
                    let (name, rtype) = key.split_once(' ').unwrap_or((key.as_str(), ""));
                    CentralError::DuplicateRecordSet {
                        name: name.to_string(),
                        rtype: rtype.to_string(),
                    }
                }
                Entity::Record => CentralError::DuplicateRecord(key),
                Entity::Blacklist => CentralError::DuplicateBlacklist(key),
            },
            StorageError::StaleSerial { domain_id, .. } => CentralError::Conflict(domain_id),
            StorageError::QuotaExceeded { tenant, max } => {
                CentralError::DomainQuotaExceeded { tenant, max }
            }
            StorageError::CnameConflict(name) => CentralError::CnameConflict(name),
            StorageError::Backend(msg) => CentralError::Storage(msg),
        }
    }
}

/// Zone content change applied together with a serial bump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneOp {
    /// Domain row only (attribute update or logical delete)
    None,
    CreateRecordSet(RecordSet),
    UpdateRecordSet(RecordSet),
    DeleteRecordSet(Uuid),
    CreateRecord(Record),
    UpdateRecord(Record),
    DeleteRecord(Uuid),
}

/// A compare-and-swap write of a domain row plus one content change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneChange {
    /// Serial the caller read; the write fails with `StaleSerial` otherwise
    pub expected_serial: u32,
    /// Replacement domain row carrying the new serial and status
    pub domain: Domain,
    pub op: ZoneOp,
}

#[async_trait]
pub trait Storage: Send + Sync {
    // Domains
    async fn create_domain(&self, domain: Domain, quota: Option<usize>) -> StorageResult<Domain>;
    async fn get_domain(&self, id: Uuid) -> StorageResult<Domain>;
    async fn find_domain_by_name(&self, name: &str) -> StorageResult<Option<Domain>>;
    async fn find_domains(&self, filter: &DomainFilter) -> StorageResult<Vec<Domain>>;
    async fn count_domains(&self, tenant_id: Option<&str>) -> StorageResult<usize>;
    async fn domain_counts_by_status(&self) -> StorageResult<HashMap<DomainStatus, usize>>;

    /// Apply `change` atomically. Returns the stored domain row.
    async fn commit(&self, change: ZoneChange) -> StorageResult<Domain>;

    /// Set status without touching the serial, only if the domain is still
    /// at `serial`. Returns whether a row was updated.
    async fn set_domain_status(
        &self,
        id: Uuid,
        serial: u32,
        status: DomainStatus,
    ) -> StorageResult<bool>;

    /// Physically remove a domain and everything it owns, only if it is
    /// still at `serial`. Returns whether a row was removed.
    async fn purge_domain(&self, id: Uuid, serial: u32) -> StorageResult<bool>;

    // Record sets and records
    async fn get_recordset(&self, id: Uuid) -> StorageResult<RecordSet>;
    async fn find_recordsets(
        &self,
        domain_id: Uuid,
        filter: &RecordSetFilter,
    ) -> StorageResult<Vec<RecordSet>>;
    async fn get_record(&self, id: Uuid) -> StorageResult<Record>;
    async fn find_records(
        &self,
        recordset_id: Uuid,
        filter: &RecordFilter,
    ) -> StorageResult<Vec<Record>>;

    // Blacklists
    async fn create_blacklist(&self, blacklist: Blacklist) -> StorageResult<Blacklist>;
    async fn get_blacklist(&self, id: Uuid) -> StorageResult<Blacklist>;
    async fn find_blacklists(&self) -> StorageResult<Vec<Blacklist>>;
    async fn update_blacklist(&self, blacklist: Blacklist) -> StorageResult<Blacklist>;
    async fn delete_blacklist(&self, id: Uuid) -> StorageResult<Blacklist>;

    // Per-target propagation status
    async fn upsert_target_status(&self, status: TargetStatus) -> StorageResult<()>;
    async fn get_target_statuses(&self, domain_id: Uuid) -> StorageResult<Vec<TargetStatus>>;
}
