//! ---
//! ptf_section: "01-core-functionality"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Runtime helpers supporting the orchestrator."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::scheduler::{panic_message, SchedulerError};

/// Unbounded dispatch onto the host runtime that keeps spawn order for the
/// join.
#[derive(Debug)]
pub struct HostExecutor<T> {
    tasks: Vec<JoinHandle<T>>,
}

impl<T> Default for HostExecutor<T> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<T: Send + 'static> HostExecutor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(fut));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Await every spawned task; results come back in spawn order.
    pub async fn join(self) -> Vec<Result<T, SchedulerError>> {
        join_all(self.tasks)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| {
                joined.map_err(|err| match err.try_into_panic() {
                    Ok(payload) => SchedulerError::HostPanicked {
                        index,
                        message: panic_message(payload.as_ref()),
                    },
                    Err(_) => SchedulerError::HostCancelled { index },
                })
            })
            .collect()
    }
}
