//! Background-task supervisor
//!
//! Owns the long-running tasks a warehouse spawns (health monitor, audit
//! flusher, pressure monitor, backup scheduler). Shutdown joins them in
//! reverse start order, so consumers stop before the services they feed.

use std::future::Future;
use std::pin::Pin;
use tracing::debug;

type ShutdownFn = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Ordered collection of supervised background tasks.
#[derive(Default)]
pub struct Supervisor {
    tasks: Vec<(String, ShutdownFn)>,
}

impl Supervisor {
    /// Create an empty supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task in start order with its shutdown future.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, shutdown: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks
            .push((name.into(), Box::new(move || Box::pin(shutdown()))));
    }

    /// Names of registered tasks, in start order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Shut every task down, last started first.
    pub async fn shutdown(mut self) {
        while let Some((name, stop)) = self.tasks.pop() {
            debug!(task = name.as_str(), "stopping background task");
            stop().await;
        }
    }
}
