//! ---
//! ptf_section: "03-diagnostics-logging"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Structured logging adapters and diagnostic sinks."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
//! Free-text diagnostic channel shared between the orchestrator and its host.

use std::sync::Arc;

use parking_lot::Mutex;

/// Receiver of human-readable progress lines (`STARTED`, `WARNING`, ...).
pub trait DiagnosticSink: Send + Sync {
    /// Deliver a single message.
    fn emit(&self, message: &str);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Arc<S> {
    fn emit(&self, message: &str) {
        (**self).emit(message)
    }
}

/// Forwards diagnostics to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, message: &str) {
        tracing::info!(target: "ptf::diagnostics", "{message}");
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every message received so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Messages starting with `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|msg| msg.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Drop all collected messages.
    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, message: &str) {
        self.messages.lock().push(message.to_owned());
    }
}

/// Holds messages until [`BufferedSink::flush`] or drop, then forwards them
/// to the inner sink in arrival order.
pub struct BufferedSink {
    inner: Arc<dyn DiagnosticSink>,
    pending: Mutex<Vec<String>>,
}

impl BufferedSink {
    /// Buffer in front of `inner`.
    pub fn new(inner: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            inner,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Number of messages not yet forwarded.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Forward everything buffered so far.
    pub fn flush(&self) {
        let drained = std::mem::take(&mut *self.pending.lock());
        for message in drained {
            self.inner.emit(&message);
        }
    }
}

impl DiagnosticSink for BufferedSink {
    fn emit(&self, message: &str) {
        self.pending.lock().push(message.to_owned());
    }
}

impl Drop for BufferedSink {
    fn drop(&mut self) {
        self.flush();
    }
}

impl std::fmt::Debug for BufferedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSink")
            .field("pending", &self.pending())
            .finish()
    }
}
