//! Error types for the PipeCD provider.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors that can occur while serving provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Dialing the PipeCD control plane failed.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A call to the PipeCD API failed.
    #[error("{summary}: {detail}")]
    Remote {
        /// The status code returned by the control plane.
        code: tonic::Code,
        /// A short summary naming the failed operation.
        summary: String,
        /// The detailed message, including the remote error.
        detail: String,
    },
}

impl ProviderError {
    /// Wrap a failed PipeCD API call.
    ///
    /// `action` is phrased as the thing that could not be done, e.g.
    /// `"Could not create application"`; the remote message is appended.
    ///
    /// # Examples
    ///
    /// ```
    /// use pipecd_provider::ProviderError;
    ///
    /// let err = ProviderError::remote(
    ///     "Error creating application",
    ///     "Could not create application",
    ///     tonic::Status::unavailable("connection reset"),
    /// );
    /// assert_eq!(
    ///     err.to_string(),
    ///     "Error creating application: Could not create application, unexpected error: connection reset"
    /// );
    /// ```
    pub fn remote(summary: &str, action: &str, status: tonic::Status) -> Self {
        Self::Remote {
            code: status.code(),
            summary: summary.to_string(),
            detail: format!("{}, unexpected error: {}", action, status.message()),
        }
    }

    /// Wrap a failed PipeCD API call made by a data source read, where the
    /// remote message is reported as-is.
    pub fn remote_read(summary: &str, status: tonic::Status) -> Self {
        Self::Remote {
            code: status.code(),
            summary: summary.to_string(),
            detail: status.message().to_string(),
        }
    }

    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Transport(_err) => "transport error (see Debug output)",
            Self::Remote { detail, .. } => detail,
        }
    }

    /// Convert the error into the error diagnostic reported to the host.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Remote {
                summary, detail, ..
            } => Diagnostic::error(summary.clone()).with_detail(detail.clone()),
            other => Diagnostic::error(other.to_string()),
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            }
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            }
            ProviderError::Remote {
                code,
                summary,
                detail,
            } => tonic::Status::new(code, format!("{}: {}", summary, detail)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    #[test]
    fn test_error_display() {
        let err = ProviderError::Configuration("provider is not configured".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: provider is not configured"
        );

        let err = ProviderError::UnknownResource("pipecd_project".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: pipecd_project");
    }

    #[test]
    fn test_remote_error_carries_status() {
        let err = ProviderError::remote(
            "Error updating piped",
            "Could not update piped",
            tonic::Status::permission_denied("api key is read-only"),
        );
        assert_eq!(
            err.message(),
            "Could not update piped, unexpected error: api key is read-only"
        );

        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert!(status.message().starts_with("Error updating piped: "));
    }

    #[test]
    fn test_remote_read_keeps_message() {
        let err = ProviderError::remote_read(
            "Unable to Read PipeCD piped",
            tonic::Status::not_found("piped not found"),
        );
        assert_eq!(err.message(), "piped not found");
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::UnknownResource("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Validation("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::Configuration("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn test_to_diagnostic() {
        let diag = ProviderError::remote(
            "Error creating piped",
            "Could not create piped",
            tonic::Status::internal("boom"),
        )
        .to_diagnostic();
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.summary, "Error creating piped");
        assert_eq!(
            diag.detail.as_deref(),
            Some("Could not create piped, unexpected error: boom")
        );

        let diag = ProviderError::Validation("bad kind".to_string()).to_diagnostic();
        assert_eq!(diag.summary, "Validation error: bad kind");
        assert!(diag.detail.is_none());
    }
}
