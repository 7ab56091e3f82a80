pub mod backend;
pub mod central;
pub mod config;
pub mod error;
pub mod graceful_shutdown;
pub mod http_server;
pub mod metrics;
pub mod model;
pub mod pool_manager;
pub mod rpc;
pub mod serial;
pub mod storage;

pub use central::CentralService;
pub use error::{CentralError, Result};
pub use rpc::{CentralClient, RpcOutcome};
