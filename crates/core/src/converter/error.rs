//! Error types for the converter module.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during conversion.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// Converter binary not found.
    #[error("Converter not found at path: {path}")]
    BinaryNotFound { path: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// The converter ran and exited unsuccessfully.
    #[error("Conversion failed with exit code {exit_code:?}")]
    ConversionFailed {
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    /// The converter reported success but the expected file is absent.
    #[error("Converter produced no output at {path}")]
    OutputMissing { path: PathBuf },

    /// Conversion timed out. The process has been killed.
    #[error("Conversion timed out after {:.1} seconds", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    /// The converter process could not be started.
    #[error("Failed to launch converter: {0}")]
    Launch(std::io::Error),

    /// I/O error around the conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConverterError {
    /// Whether the converter rejected the document itself, as opposed to
    /// the environment failing around it.
    pub fn is_document_rejected(&self) -> bool {
        matches!(
            self,
            Self::ConversionFailed { .. } | Self::OutputMissing { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = ConverterError::Timeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Conversion timed out after 1.5 seconds");
        assert!(err.is_timeout());
        assert!(!err.is_document_rejected());
    }

    #[test]
    fn test_document_rejected() {
        let failed = ConverterError::ConversionFailed {
            exit_code: Some(1),
            stderr: None,
        };
        assert!(failed.is_document_rejected());

        let launch = ConverterError::Launch(std::io::Error::other("boom"));
        assert!(!launch.is_document_rejected());
        assert_eq!(launch.to_string(), "Failed to launch converter: boom");
    }
}
