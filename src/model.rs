//! Control-plane entities: domains, record sets, records, blacklists and
//! pool targets, plus the request context every call carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CentralError;

/// Identity and capabilities of the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: String,
    /// Administrative callers may manage blacklists and bypass them
    pub is_admin: bool,
    /// Admin-only: operate across every tenant
    pub all_tenants: bool,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            is_admin: false,
            all_tenants: false,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn admin(tenant_id: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::tenant(tenant_id)
        }
    }

    pub fn with_all_tenants(mut self) -> Self {
        self.all_tenants = true;
        self
    }

    /// True when this caller may see entities owned by `tenant_id`
    pub fn can_access(&self, tenant_id: &str) -> bool {
        self.tenant_id == tenant_id || (self.is_admin && self.all_tenants)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DomainStatus {
    Pending,
    Active,
    Error,
}

/// The propagation a domain's status refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DomainAction {
    None,
    Create,
    Update,
    Delete,
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainStatus::Pending => write!(f, "PENDING"),
            DomainStatus::Active => write!(f, "ACTIVE"),
            DomainStatus::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub email: String,
    pub ttl: u32,
    pub serial: u32,
    pub status: DomainStatus,
    pub action: DomainAction,
    pub description: Option<String>,
    pub pool_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Domain {
    /// Whether the domain has been logically deleted and awaits removal
    pub fn is_deleting(&self) -> bool {
        self.action == DomainAction::Delete
    }

    /// Whether `name` lies at or below this zone's apex
    pub fn contains(&self, name: &str) -> bool {
        name == self.name || name.ends_with(&format!(".{}", self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    MX,
    NS,
    PTR,
    SOA,
    SPF,
    SRV,
    SSHFP,
    TXT,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::PTR => "PTR",
            RecordType::SOA => "SOA",
            RecordType::SPF => "SPF",
            RecordType::SRV => "SRV",
            RecordType::SSHFP => "SSHFP",
            RecordType::TXT => "TXT",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RecordType {
    type Err = CentralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "PTR" => Ok(RecordType::PTR),
            "SOA" => Ok(RecordType::SOA),
            "SPF" => Ok(RecordType::SPF),
            "SRV" => Ok(RecordType::SRV),
            "SSHFP" => Ok(RecordType::SSHFP),
            "TXT" => Ok(RecordType::TXT),
            other => Err(CentralError::InvalidRecordData(format!(
                "unsupported record type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub id: Uuid,
    pub domain_id: Uuid,
    pub tenant_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: RecordType,
    /// Falls back to the domain TTL when unset
    pub ttl: Option<u32>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub domain_id: Uuid,
    pub recordset_id: Uuid,
    pub data: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blacklist {
    pub id: Uuid,
    pub pattern: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A backend name server that receives zone updates for a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTarget {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub name: String,
    /// `host:port` of the name server
    pub address: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetOutcomeState {
    Pending,
    Success,
    Error,
}

/// Propagation progress of one domain on one pool target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub domain_id: Uuid,
    pub target_id: Uuid,
    pub serial: u32,
    pub action: DomainAction,
    pub state: TargetOutcomeState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Domain status together with the per-target view of the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatusReport {
    pub domain_id: Uuid,
    pub serial: u32,
    pub status: DomainStatus,
    pub action: DomainAction,
    pub targets: Vec<TargetStatus>,
}

// ----- Request payloads -----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDomain {
    pub name: String,
    pub email: String,
    pub ttl: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainUpdate {
    pub email: Option<String>,
    pub ttl: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: RecordType,
    pub ttl: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSetUpdate {
    pub ttl: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub data: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub data: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlacklist {
    pub pattern: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistUpdate {
    pub pattern: Option<String>,
    pub description: Option<String>,
}

// ----- Query filters -----

/// Marker based paging: results strictly after `marker`, at most `limit`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub marker: Option<Uuid>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilter {
    /// Restrict to one tenant; `None` means every tenant
    pub tenant_id: Option<String>,
    pub name: Option<String>,
    pub status: Option<DomainStatus>,
    pub page: Page,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSetFilter {
    pub name: Option<String>,
    pub rtype: Option<RecordType>,
    pub page: Page,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub data: Option<String>,
    pub page: Page,
}
