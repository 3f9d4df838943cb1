//! Installer error taxonomy.

use thiserror::Error;

/// Errors raised while resolving configuration or touching the host.
#[derive(Debug, Error)]
pub enum InstallerError {
    /// Caller lacks the rights needed to change system services.
    #[error("privilege error: {0}")]
    PrivilegeError(String),

    /// The resolved configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An artifact could not be rendered because a required field was empty.
    #[error("cannot render {artifact}: missing {field}")]
    TemplateError {
        artifact: &'static str,
        field: &'static str,
    },

    /// An external tool returned non-success. `detail` carries its stderr verbatim.
    #[error("{tool} failed: {detail}")]
    ExternalToolFailure { tool: String, detail: String },

    /// Uninstall target does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Local I/O failure.
    #[error("system error: {0}")]
    System(String),
}

impl InstallerError {
    pub(crate) fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// `true` for the uninstall-only "already gone" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
