//! Name server backends the pool manager pushes zone changes to.

use async_trait::async_trait;

use crate::model::PoolTarget;

pub mod notify;
pub mod wire;

pub use notify::NotifyTransport;

/// Result of one exchange with a pool target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// The target serves the requested state
    Ack,
    /// The target answered but is not (yet) in the requested state
    Nack(String),
    /// No answer within the exchange deadline
    Timeout,
}

impl TargetOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, TargetOutcome::Ack)
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            TargetOutcome::Ack => "ack",
            TargetOutcome::Nack(_) => "nack",
            TargetOutcome::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOutcome::Ack => write!(f, "acknowledged"),
            TargetOutcome::Nack(reason) => write!(f, "rejected: {}", reason),
            TargetOutcome::Timeout => write!(f, "timed out"),
        }
    }
}

#[async_trait]
pub trait ZoneTransport: Send + Sync {
    /// Make `target` serve `zone` at `serial` or newer
    async fn update_zone(&self, target: &PoolTarget, zone: &str, serial: u32) -> TargetOutcome;

    /// Make `target` stop serving `zone`
    async fn remove_zone(&self, target: &PoolTarget, zone: &str) -> TargetOutcome;
}
