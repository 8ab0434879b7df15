//! Error types for the provisioning pipeline.

use thiserror::Error;

/// Result type alias for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that can occur while provisioning a route.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Bad input, rejected before any side effect.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Missing or inconsistent adapter configuration (e.g. no issuer
    /// contact address). Distinct from runtime failures.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external tool (proxy reload, certbot, nsenter hop) failed.
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// The DNS provider returned a non-success response.
    #[error("dns provider error: {0}")]
    DnsApi(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProvisionError {
    /// Shorthand for a validation failure naming the offending field.
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an external-tool failure.
    pub fn tool(tool: &str, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}
