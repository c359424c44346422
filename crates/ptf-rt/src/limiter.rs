//! ---
//! ptf_section: "01-core-functionality"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Runtime helpers supporting the orchestrator."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use std::sync::Arc;

use ptf_common::Result;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::scheduler::{BoundedScheduler, SchedulerError};

/// Concurrency policy shared by every case of one scope key: a bounded
/// scheduler plus a permit pool of the same size.
#[derive(Debug, Clone)]
pub struct Limiter {
    degree: usize,
    scheduler: BoundedScheduler,
    permits: Arc<Semaphore>,
}

impl Limiter {
    pub fn new(degree: usize) -> Result<Self> {
        let scheduler = BoundedScheduler::new(degree)?;
        Ok(Self {
            degree,
            scheduler,
            permits: Arc::new(Semaphore::new(degree)),
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn scheduler(&self) -> &BoundedScheduler {
        &self.scheduler
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a permit. The permit is returned to the pool when dropped.
    pub async fn acquire(&self) -> std::result::Result<OwnedSemaphorePermit, SchedulerError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::Closed)
    }
}
