use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification used by callers to decide how to react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Duplicate,
    Blacklisted,
    Forbidden,
    Invalid,
    Conflict,
    Timeout,
    Propagation,
    Internal,
}

/// Errors raised by the central service and carried across the RPC gateway.
///
/// Every variant is serializable so the exact kind survives the process
/// boundary instead of collapsing into a generic failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CentralError {
    // Missing entities
    #[error("Domain not found: {0}")]
    DomainNotFound(String),
    #[error("Record set not found: {0}")]
    RecordSetNotFound(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Blacklist not found: {0}")]
    BlacklistNotFound(String),

    // Uniqueness violations
    #[error("Duplicate domain: {0}")]
    DuplicateDomain(String),
    #[error("Duplicate record set: {name} {rtype}")]
    DuplicateRecordSet { name: String, rtype: String },
    #[error("Duplicate record: {0}")]
    DuplicateRecord(String),
    #[error("Duplicate blacklist: {0}")]
    DuplicateBlacklist(String),

    // Policy
    #[error("Domain name is blacklisted: {0}")]
    Blacklisted(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Validation
    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),
    #[error("Invalid record set name: {0}")]
    InvalidRecordSetName(String),
    #[error("Record set {name} is not within domain {domain}")]
    InvalidRecordSetLocation { name: String, domain: String },
    #[error("Invalid TTL value: {0}")]
    InvalidTtl(i64),
    #[error("Invalid email: {0}")]
    InvalidEmail(String),
    #[error("Invalid record data: {0}")]
    InvalidRecordData(String),
    #[error("Invalid blacklist pattern: {0}")]
    InvalidBlacklistPattern(String),
    #[error("CNAME conflict at {0}")]
    CnameConflict(String),
    #[error("Domain quota exceeded: tenant {tenant} may own at most {max} domains")]
    DomainQuotaExceeded { tenant: String, max: usize },

    // Concurrency and transport
    #[error("Concurrent modification of domain {0}, retries exhausted")]
    Conflict(Uuid),
    #[error("Operation timed out, outcome unknown")]
    Timeout,
    #[error("Propagation failed for {target}: {reason}")]
    Propagation { target: String, reason: String },

    // Internal failures
    #[error("Serial number space exhausted for domain {0}")]
    SerialExhausted(Uuid),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("RPC transport error: {0}")]
    Transport(String),
    #[error("Service is shutting down")]
    ShuttingDown,
}

impl CentralError {
    pub fn kind(&self) -> ErrorKind {
        use CentralError::*;
        match self {
            DomainNotFound(_) | RecordSetNotFound(_) | RecordNotFound(_) | BlacklistNotFound(_) => {
                ErrorKind::NotFound
            }
            DuplicateDomain(_)
            | DuplicateRecordSet { .. }
            | DuplicateRecord(_)
            | DuplicateBlacklist(_) => ErrorKind::Duplicate,
            Blacklisted(_) => ErrorKind::Blacklisted,
            Forbidden(_) => ErrorKind::Forbidden,
            InvalidDomainName(_)
            | InvalidRecordSetName(_)
            | InvalidRecordSetLocation { .. }
            | InvalidTtl(_)
            | InvalidEmail(_)
            | InvalidRecordData(_)
            | InvalidBlacklistPattern(_)
            | CnameConflict(_)
            | DomainQuotaExceeded { .. } => ErrorKind::Invalid,
            Conflict(_) => ErrorKind::Conflict,
            Timeout => ErrorKind::Timeout,
            Propagation { .. } => ErrorKind::Propagation,
            SerialExhausted(_) | Storage(_) | Transport(_) | ShuttingDown => ErrorKind::Internal,
        }
    }

    /// HTTP status an API front-end should answer with for this error
    pub fn http_status(&self) -> u16 {
        match self {
            CentralError::DomainQuotaExceeded { .. } => 413,
            CentralError::ShuttingDown => 503,
            _ => match self.kind() {
                ErrorKind::NotFound => 404,
                ErrorKind::Duplicate | ErrorKind::Conflict => 409,
                ErrorKind::Blacklisted | ErrorKind::Forbidden => 403,
                ErrorKind::Invalid => 400,
                ErrorKind::Timeout => 504,
                ErrorKind::Propagation | ErrorKind::Internal => 500,
            },
        }
    }

    /// Whether the error is a deterministic rejection that must not be retried
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::Duplicate
                | ErrorKind::Blacklisted
                | ErrorKind::Forbidden
                | ErrorKind::Invalid
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid HTTP bind address: {0}")]
    InvalidHttpBindAddress(String),
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("Invalid retry setting: {0}")]
    InvalidRetry(String),
    #[error("Invalid pool configuration: {0}")]
    InvalidPool(String),
    #[error("Invalid threshold percentage: {0}")]
    InvalidThreshold(String),
    #[error("Invalid serial scheme: {0}")]
    InvalidSerialScheme(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CentralError>;
