//! NOTIFY based backend.
//!
//! Zone updates are announced with an RFC 1996 NOTIFY; the target then pulls
//! the zone on its own. A target acknowledges once an SOA query shows it
//! serving the requested serial, and a removal once it no longer answers
//! authoritatively for the zone.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{UdpSocket, lookup_host};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use super::wire::{self, Response, WireError};
use super::{TargetOutcome, ZoneTransport};
use crate::model::PoolTarget;

const MAX_MESSAGE_SIZE: usize = 4096;

#[derive(Error, Debug)]
enum ExchangeError {
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Wire(#[from] WireError),
    #[error("no response")]
    Timeout,
}

impl From<ExchangeError> for TargetOutcome {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Timeout => TargetOutcome::Timeout,
            other => TargetOutcome::Nack(other.to_string()),
        }
    }
}

pub struct NotifyTransport {
    exchange_timeout: Duration,
}

impl NotifyTransport {
    pub fn new(exchange_timeout: Duration) -> Self {
        Self { exchange_timeout }
    }

    async fn resolve(address: &str) -> Result<SocketAddr, ExchangeError> {
        lookup_host(address)
            .await?
            .next()
            .ok_or_else(|| ExchangeError::Resolve(address.to_string()))
    }

    /// Send `message` and wait for the response carrying `id`
    async fn exchange(
        &self,
        server: SocketAddr,
        id: u16,
        message: Bytes,
    ) -> Result<Response, ExchangeError> {
        let bind = if server.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;
        socket.send(&message).await?;

        let deadline = Instant::now() + self.exchange_timeout;
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        loop {
            let len = timeout_at(deadline, socket.recv(&mut buf))
                .await
                .map_err(|_| ExchangeError::Timeout)??;

            let response = match wire::parse_response(&buf[..len]) {
                Ok(response) => response,
                Err(e) => {
                    debug!("Ignoring malformed message from {}: {}", server, e);
                    continue;
                }
            };
            if response.header.id == id && response.header.qr {
                return Ok(response);
            }
            debug!(
                "Ignoring unrelated response {} from {}",
                response.header.id, server
            );
        }
    }

    async fn send_notify(&self, server: SocketAddr, zone: &str) -> Result<Response, ExchangeError> {
        let id = rand::random::<u16>();
        let message = wire::notify_message(id, zone)?;
        self.exchange(server, id, message).await
    }

    async fn query_soa(&self, server: SocketAddr, zone: &str) -> Result<Response, ExchangeError> {
        let id = rand::random::<u16>();
        let message = wire::soa_query(id, zone)?;
        self.exchange(server, id, message).await
    }

    async fn try_update(
        &self,
        target: &PoolTarget,
        zone: &str,
        serial: u32,
    ) -> Result<TargetOutcome, ExchangeError> {
        let server = Self::resolve(&target.address).await?;

        let notify = self.send_notify(server, zone).await?;
        if notify.header.opcode != wire::OPCODE_NOTIFY || notify.header.rcode != wire::RCODE_NOERROR
        {
            return Ok(TargetOutcome::Nack(format!(
                "NOTIFY answered with opcode {} rcode {}",
                notify.header.opcode, notify.header.rcode
            )));
        }

        let soa = self.query_soa(server, zone).await?;
        match (soa.header.rcode, soa.header.aa, soa.soa_serial) {
            (wire::RCODE_NOERROR, true, Some(served)) if served >= serial => {
                debug!("{} serves {} at serial {}", target.name, zone, served);
                Ok(TargetOutcome::Ack)
            }
            (wire::RCODE_NOERROR, true, Some(served)) => Ok(TargetOutcome::Nack(format!(
                "serving serial {}, expected {}",
                served, serial
            ))),
            (rcode, _, _) => Ok(TargetOutcome::Nack(format!(
                "zone not served yet (rcode {})",
                rcode
            ))),
        }
    }

    async fn try_remove(&self, target: &PoolTarget, zone: &str) -> Result<TargetOutcome, ExchangeError> {
        let server = Self::resolve(&target.address).await?;

        let soa = self.query_soa(server, zone).await?;
        // REFUSED, NOTAUTH, NXDOMAIN or a non-authoritative answer all mean gone
        if soa.header.rcode != wire::RCODE_NOERROR || !soa.header.aa {
            return Ok(TargetOutcome::Ack);
        }

        // Nudge the target so it notices the zone is gone
        if let Err(e) = self.send_notify(server, zone).await {
            debug!("NOTIFY for removed zone {} to {} failed: {}", zone, target.name, e);
        }
        Ok(TargetOutcome::Nack("zone still served".to_string()))
    }
}

#[async_trait]
impl ZoneTransport for NotifyTransport {
    async fn update_zone(&self, target: &PoolTarget, zone: &str, serial: u32) -> TargetOutcome {
        self.try_update(target, zone, serial).await.unwrap_or_else(|e| {
            warn!("Update of {} on {} failed: {}", zone, target.name, e);
            e.into()
        })
    }

    async fn remove_zone(&self, target: &PoolTarget, zone: &str) -> TargetOutcome {
        self.try_remove(target, zone).await.unwrap_or_else(|e| {
            warn!("Removal of {} from {} failed: {}", zone, target.name, e);
            e.into()
        })
    }
}
