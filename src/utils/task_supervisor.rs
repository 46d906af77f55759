use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{Error, Result};

/// Supervises the coordination core's background loops (context cleanup,
/// coordination-deadline sweep) and reports tasks that terminated
/// unexpectedly. None of the loops are expected to exit on their own.
pub struct TaskSupervisor {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: HashMap::new(),
        }
    }

    /// Spawn a background task and register it for monitoring.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!("Spawned background task: {}", name);
        self.tasks.insert(name, tokio::spawn(future));
        self
    }

    /// Returns an error if any registered task has terminated.
    pub fn check_health(&mut self) -> Result<()> {
        let failed: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        if failed.is_empty() {
            return Ok(());
        }

        for name in &failed {
            self.tasks.remove(name);
        }
        let detail = format!("Tasks terminated unexpectedly: {:?}", failed);
        error!("{}", detail);
        Err(Error::ConfigError(detail))
    }

    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Abort all supervised tasks. Used on shutdown after the final
    /// coordination flush.
    pub fn shutdown_all(&mut self) {
        info!("Shutting down {} background tasks", self.tasks.len());
        for (name, handle) in self.tasks.drain() {
            handle.abort();
            info!("Aborted task: {}", name);
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
