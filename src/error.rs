//! Error types for onion service lifecycle operations.
//!
//! Validation errors are raised before any command reaches Tor. Transport
//! errors come from the control connection itself. Key-file read errors are
//! not represented here at all: a missing key is reported as `None`.

use thiserror::Error;

/// Core error type for onion service operations.
#[derive(Error, Debug)]
pub enum OnionError {
    /// A port mapping string failed validation.
    #[error("invalid ports: {0}")]
    InvalidPorts(String),

    /// A caller-supplied key blob contained whitespace or newlines.
    #[error("invalid key blob: {0}")]
    InvalidKeyBlob(String),

    /// The key blob's algorithm prefix does not match the requested version.
    #[error("key algorithm mismatch: expected {expected}, got {found}")]
    KeyAlgorithmMismatch { expected: String, found: String },

    /// A client name contained whitespace.
    #[error("invalid client name: {0:?}")]
    InvalidClientName(String),

    /// Incompatible combination of variant, auth and options.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested auth type cannot be used with this service variant.
    #[error("unsupported auth type: {0}")]
    UnsupportedAuthType(String),

    /// The requested onion service version is not supported.
    #[error("unsupported onion service version: {0}")]
    UnsupportedVersion(String),

    /// Tor answered with something we could not interpret.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// DEL_ONION did not answer `OK`.
    #[error("removal failed: {0}")]
    RemovalFailed(String),

    /// No descriptor replica accepted the upload.
    #[error("failed to upload descriptor for '{service_id}' to: {}", format_failures(.failures))]
    UploadFailure {
        service_id: String,
        /// Failed directory ids with the reason Tor reported, if any.
        failures: Vec<(String, Option<String>)>,
    },

    /// No client with this name exists in the persisted hostname file.
    #[error("no client named '{0}'")]
    ClientNotFound(String),

    /// A client declared in the auth configuration is absent on disk.
    #[error("declared client '{0}' is missing from the persisted hostname file")]
    ExpectedClientMissing(String),

    /// A structured key file could not be parsed.
    #[error("parse error at line {line}: {message}")]
    KeyParseError { line: usize, message: String },

    /// Operation not allowed in the service's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Control connection error (dropped connection, error status).
    #[error("control connection error: {0}")]
    Control(String),

    /// Filesystem error outside of key loading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`OnionError`].
pub type Result<T> = std::result::Result<T, OnionError>;

impl OnionError {
    /// Synchronous input validation failures, never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OnionError::InvalidPorts(_)
                | OnionError::InvalidKeyBlob(_)
                | OnionError::KeyAlgorithmMismatch { .. }
                | OnionError::InvalidClientName(_)
                | OnionError::Validation(_)
        )
    }

    /// Missing capability rather than a defect.
    pub fn is_feature_gap(&self) -> bool {
        matches!(
            self,
            OnionError::UnsupportedVersion(_) | OnionError::UnsupportedAuthType(_)
        )
    }
}

fn format_failures(failures: &[(String, Option<String>)]) -> String {
    failures
        .iter()
        .map(|(dir, reason)| match reason {
            Some(reason) => format!("{} ({})", dir, reason),
            None => dir.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
