use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Type alias for shutdown function result
pub type ShutdownResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type ShutdownFn = Box<dyn FnOnce() -> JoinHandle<ShutdownResult> + Send>;

/// A component that needs to be shut down gracefully
struct ShutdownComponent {
    name: String,
    shutdown_fn: ShutdownFn,
}

/// Graceful shutdown coordinator.
///
/// Long running tasks subscribe to the broadcast signal; registered
/// components are then awaited, each within `component_timeout`.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<()>,
    components: Arc<Mutex<Vec<ShutdownComponent>>>,
    component_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(component_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            components: Arc::new(Mutex::new(Vec::new())),
            component_timeout,
        }
    }

    /// Get a shutdown receiver for components to listen on
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Register a component for graceful shutdown
    pub async fn register_component<F, Fut>(&self, name: impl Into<String>, shutdown_fn: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ShutdownResult> + Send + 'static,
    {
        let component = ShutdownComponent {
            name: name.into(),
            shutdown_fn: Box::new(move || tokio::spawn(shutdown_fn())),
        };

        self.components.lock().await.push(component);
    }

    /// Register a spawned task that exits on its own once signalled
    pub async fn register_task(&self, name: impl Into<String>, task: JoinHandle<()>) {
        self.register_component(name, move || async move {
            task.await?;
            ShutdownResult::Ok(())
        })
        .await;
    }

    /// Signal every subscriber, then wait for registered components
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        let components = std::mem::take(&mut *self.components.lock().await);
        let mut handles = Vec::with_capacity(components.len());
        for component in components {
            info!("Shutting down component: {}", component.name);
            handles.push((component.name, (component.shutdown_fn)()));
        }

        for (name, handle) in handles {
            match timeout(self.component_timeout, handle).await {
                Ok(Ok(Ok(()))) => {
                    info!("Component '{}' shut down successfully", name);
                }
                Ok(Ok(Err(e))) => {
                    error!("Component '{}' shutdown failed: {}", name, e);
                }
                Ok(Err(e)) => {
                    error!("Component '{}' shutdown task panicked: {}", name, e);
                }
                Err(_) => {
                    warn!("Component '{}' shutdown timed out", name);
                }
            }
        }

        info!("Graceful shutdown completed");
    }
}
