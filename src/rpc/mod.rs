//! Request/response gateway in front of the central service.
//!
//! Calls are JSON envelopes carried over an in-process queue; replies carry
//! either the response or the exact [`CentralError`](crate::error::CentralError)
//! raised by the service.

mod client;
mod message;
mod server;

pub use client::CentralClient;
pub use message::{Call, CentralRequest, CentralResponse, Envelope, Reply, RpcOutcome};
pub use server::RpcServer;

use std::time::Duration;
use tokio::sync::mpsc;

/// Create a client and the call queue an [`RpcServer`] consumes
pub fn channel(capacity: usize, timeout: Duration) -> (CentralClient, mpsc::Receiver<Call>) {
    let (sender, calls) = mpsc::channel(capacity.max(1));
    (CentralClient::new(sender, timeout), calls)
}
