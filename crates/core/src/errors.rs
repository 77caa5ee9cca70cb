//! Error types and handling
//!
//! Domain-specific error enums for each subsystem (mappings catalog,
//! mapping providers, catalog updater) wrapped in the main `RefitError`
//! enum for unified error handling. Parsing Dockerfiles never fails, so
//! there is no parse-error domain: unrecognized input passes through
//! verbatim.

use thiserror::Error;

/// Mappings-catalog errors (document parsing and on-disk access)
#[derive(Error, Debug)]
pub enum MappingsError {
    /// The mappings document is not valid YAML for the expected schema
    #[error("Failed to parse mappings document: {message}")]
    Parsing { message: String },

    /// A user-supplied mappings file does not exist
    #[error("Mappings file not found: {path}")]
    NotFound { path: String },

    /// Mappings file I/O error
    #[error("Failed to read mappings file")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a mapping provider backend
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A catalog backend failed to answer a lookup
    #[error("Mapping lookup failed: {message}")]
    Lookup { message: String },
}

/// Catalog-updater errors
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Transport-level failure fetching the mappings document
    #[error("Failed to fetch mappings: {message}")]
    Fetch { message: String },

    /// The server answered with a non-success status
    #[error("Unexpected status code: {status}")]
    Status { status: u16 },

    /// Cache-layout I/O error
    #[error("Failed to write catalog cache")]
    Io(#[from] std::io::Error),

    /// The cache index could not be encoded or decoded
    #[error("Failed to encode cache index")]
    Index(#[from] serde_json::Error),
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum RefitError {
    /// Mappings-catalog errors
    #[error("Mappings error: {0}")]
    Mappings(#[from] MappingsError),

    /// Mapping-provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Catalog-updater errors
    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    /// Internal/generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with RefitError
pub type Result<T> = std::result::Result<T, RefitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mappings_error_display() {
        let error = MappingsError::Parsing {
            message: "bad indentation".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Failed to parse mappings document: bad indentation"
        );

        let error = MappingsError::NotFound {
            path: "/path/to/mappings.yaml".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Mappings file not found: /path/to/mappings.yaml"
        );
    }

    #[test]
    fn test_update_error_display() {
        let error = UpdateError::Status { status: 503 };
        assert_eq!(format!("{}", error), "Unexpected status code: 503");
    }

    #[test]
    fn test_refit_error_from_domain_errors() {
        let mappings_error = MappingsError::NotFound {
            path: "x".to_string(),
        };
        let refit_error: RefitError = mappings_error.into();
        assert!(matches!(refit_error, RefitError::Mappings(_)));

        let provider_error = ProviderError::Lookup {
            message: "backend down".to_string(),
        };
        let refit_error: RefitError = provider_error.into();
        assert!(matches!(refit_error, RefitError::Provider(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let mappings_error: MappingsError = io_error.into();
        assert!(matches!(mappings_error, MappingsError::Io(_)));
    }

    #[test]
    fn test_anyhow_conversions() {
        let error = RefitError::Internal("stage index mismatch".to_string());
        let anyhow_error = anyhow::Error::from(error);
        assert!(anyhow_error.to_string().contains("Internal error"));
    }
}
