//! ---
//! ptf_section: "01-core-functionality"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Shared primitives and utilities for the core runtime."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Error taxonomy shared by every crate of the framework.
///
/// Cancellation is deliberately absent: a cancelled case is dropped from the
/// aggregate instead of being reported as a failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameworkError {
    /// Invalid degree of parallelism, scope used before registration, or an
    /// unusable configuration file.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A caller supplied an argument outside of its accepted domain.
    #[error("invalid argument `{name}`: {reason}")]
    Argument { name: &'static str, reason: String },
    /// A finite resource pool has been exhausted.
    #[error("{0}")]
    Capacity(String),
    /// A case body failed or panicked.
    #[error("{case} failed: {message}")]
    Execution { case: String, message: String },
}

impl FrameworkError {
    pub fn configuration(message: impl Into<String>) -> Self {
        FrameworkError::Configuration(message.into())
    }

    pub fn argument(name: &'static str, reason: impl Into<String>) -> Self {
        FrameworkError::Argument {
            name,
            reason: reason.into(),
        }
    }

    pub fn execution(case: impl Into<String>, message: impl Into<String>) -> Self {
        FrameworkError::Execution {
            case: case.into(),
            message: message.into(),
        }
    }

    /// Whether the error should be recorded against a specific case.
    pub fn is_execution(&self) -> bool {
        matches!(self, FrameworkError::Execution { .. })
    }
}

impl From<anyhow::Error> for FrameworkError {
    fn from(err: anyhow::Error) -> Self {
        FrameworkError::Configuration(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_is_verbatim() {
        let err = FrameworkError::Capacity("Maximum number of ports are captured: 65535".into());
        assert_eq!(err.to_string(), "Maximum number of ports are captured: 65535");
    }

    #[test]
    fn anyhow_chain_becomes_configuration() {
        let err: FrameworkError = anyhow::anyhow!("inner")
            .context("failed to parse config file")
            .into();
        match err {
            FrameworkError::Configuration(message) => {
                assert!(message.contains("failed to parse config file"));
                assert!(message.contains("inner"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
