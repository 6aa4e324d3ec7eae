//! Onion service private key material
//!
//! Keys are treated as opaque blobs tagged with the algorithm Tor reports.
//! Ephemeral keys arrive as `ALGORITHM:blob` strings on the control port;
//! filesystem keys are whatever bytes Tor wrote to the service directory.

use crate::error::{OnionError, Result};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// v3 secret key file inside a hidden service directory
pub const V3_SECRET_KEY_FILE: &str = "hs_ed25519_secret_key";
/// Legacy (v2) RSA key file
pub const LEGACY_KEY_FILE: &str = "private_key";

const RSA1024_PREFIX: &str = "RSA1024";
const ED25519_V3_PREFIX: &str = "ED25519-V3";

/// Key algorithm as named by the control protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa1024,
    Ed25519V3,
    Unknown,
}

impl KeyAlgorithm {
    /// Control-protocol prefix, if the algorithm has one
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            KeyAlgorithm::Rsa1024 => Some(RSA1024_PREFIX),
            KeyAlgorithm::Ed25519V3 => Some(ED25519_V3_PREFIX),
            KeyAlgorithm::Unknown => None,
        }
    }

    fn from_prefix(prefix: &str) -> Self {
        match prefix {
            RSA1024_PREFIX => KeyAlgorithm::Rsa1024,
            ED25519_V3_PREFIX => KeyAlgorithm::Ed25519V3,
            _ => KeyAlgorithm::Unknown,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().unwrap_or("UNKNOWN"))
    }
}

/// A private key: algorithm tag plus opaque bytes.
///
/// `bytes` is `None` when the key was discarded or could not be read.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub algorithm: KeyAlgorithm,
    pub bytes: Option<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(algorithm: KeyAlgorithm, bytes: Vec<u8>) -> Self {
        Self {
            algorithm,
            bytes: Some(bytes),
        }
    }

    /// Key material that is known not to be available
    pub fn absent(algorithm: KeyAlgorithm) -> Self {
        Self {
            algorithm,
            bytes: None,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.bytes.is_none()
    }

    /// Parse a `PrivateKey=` value such as `ED25519-V3:base64...`
    pub fn from_key_blob(blob: &str) -> Self {
        match blob.split_once(':') {
            Some((prefix, rest)) if KeyAlgorithm::from_prefix(prefix) != KeyAlgorithm::Unknown => {
                Self::new(KeyAlgorithm::from_prefix(prefix), rest.as_bytes().to_vec())
            },
            _ => Self::new(KeyAlgorithm::Unknown, blob.as_bytes().to_vec()),
        }
    }

    /// Render back to the `ALGORITHM:blob` control-port form
    pub fn to_key_blob(&self) -> Option<String> {
        let bytes = self.bytes.as_ref()?;
        let body = String::from_utf8_lossy(bytes);
        Some(match self.algorithm.prefix() {
            Some(prefix) => format!("{}:{}", prefix, body),
            None => body.into_owned(),
        })
    }
}

// Never print key bytes
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("algorithm", &self.algorithm)
            .field(
                "bytes",
                &self.bytes.as_ref().map(|b| format!("<{} bytes>", b.len())),
            )
            .finish()
    }
}

/// Load a filesystem service key.
///
/// Read failures produce absent key material; an unsupported version is an
/// error.
pub fn load_filesystem_key(dir: &Path, version: Option<u8>) -> Result<KeyMaterial> {
    let (file, algorithm) = match version {
        Some(3) => (V3_SECRET_KEY_FILE, KeyAlgorithm::Ed25519V3),
        None | Some(2) => (LEGACY_KEY_FILE, KeyAlgorithm::Rsa1024),
        Some(other) => {
            return Err(OnionError::UnsupportedVersion(format!(
                "cannot load keys for onion service version {}",
                other
            )))
        },
    };

    let path = dir.join(file);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(KeyMaterial::new(algorithm, bytes)),
        Err(e) => {
            debug!("No key available at {:?}: {}", path, e);
            Ok(KeyMaterial::absent(algorithm))
        },
    }
}

/// Key loaded on first access and cached until reset
#[derive(Debug, Default)]
pub struct LazyKey {
    cached: OnceLock<KeyMaterial>,
}

impl LazyKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached key, loading it from `dir` on first use.
    /// Errors are not cached.
    pub fn get(&self, dir: &Path, version: Option<u8>) -> Result<&KeyMaterial> {
        if let Some(key) = self.cached.get() {
            return Ok(key);
        }
        let key = load_filesystem_key(dir, version)?;
        Ok(self.cached.get_or_init(|| key))
    }

    /// Forget the cached key so the next access reloads it
    pub fn reset(&mut self) {
        self.cached = OnceLock::new();
    }
}

/// What key an ephemeral service should be created with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyRequest {
    /// Let Tor generate a key and return it
    #[default]
    Generate,
    /// Let Tor generate a key and throw it away
    Discard,
    /// Use this caller-supplied blob
    Blob(String),
}

impl KeyRequest {
    pub fn is_discard(&self) -> bool {
        matches!(self, KeyRequest::Discard)
    }

    /// Build the `ADD_ONION` key-spec argument
    pub fn key_spec(&self, version: Option<u8>) -> Result<String> {
        match self {
            KeyRequest::Generate | KeyRequest::Discard => match version {
                Some(3) => Ok(format!("NEW:{}", ED25519_V3_PREFIX)),
                None | Some(2) => Ok("NEW:BEST".to_string()),
                Some(other) => Err(OnionError::UnsupportedVersion(format!(
                    "ephemeral onion services support versions 2 and 3, not {}",
                    other
                ))),
            },
            KeyRequest::Blob(blob) => validate_key_blob(blob, version),
        }
    }
}

/// Check a caller-supplied key blob and return it with its algorithm prefix
pub fn validate_key_blob(blob: &str, version: Option<u8>) -> Result<String> {
    if blob.is_empty() {
        return Err(OnionError::InvalidKeyBlob("key blob is empty".to_string()));
    }
    if blob.contains('\n') || blob.contains('\r') {
        return Err(OnionError::InvalidKeyBlob(
            "no newline or return characters allowed in key".to_string(),
        ));
    }
    if blob.trim() != blob {
        return Err(OnionError::InvalidKeyBlob(
            "key has leading or trailing whitespace".to_string(),
        ));
    }

    let algorithm = blob
        .split_once(':')
        .map(|(prefix, _)| KeyAlgorithm::from_prefix(prefix))
        .unwrap_or(KeyAlgorithm::Unknown);

    match (version, algorithm) {
        (Some(3), KeyAlgorithm::Ed25519V3) => Ok(blob.to_string()),
        (Some(3), found) => Err(OnionError::KeyAlgorithmMismatch {
            expected: ED25519_V3_PREFIX.to_string(),
            found: found.to_string(),
        }),
        (Some(2), KeyAlgorithm::Ed25519V3) => Err(OnionError::KeyAlgorithmMismatch {
            expected: RSA1024_PREFIX.to_string(),
            found: ED25519_V3_PREFIX.to_string(),
        }),
        (None | Some(2), KeyAlgorithm::Unknown) => Ok(format!("{}:{}", RSA1024_PREFIX, blob)),
        (None | Some(2), _) => Ok(blob.to_string()),
        (Some(other), _) => Err(OnionError::UnsupportedVersion(format!(
            "ephemeral onion services support versions 2 and 3, not {}",
            other
        ))),
    }
}
