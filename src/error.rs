//! Error types for the issuance engine.
//!
//! Each component reports its own error enum. They all fold into
//! [`IssuerError`], which is what the orchestrator and the CLI surface.
//! None of these types ever carry CA private key material.

use const_oid::ObjectIdentifier;
use std::time::Duration;
use thiserror::Error;

/// A CSR could not be turned into a [`SigningRequest`](crate::cert::csr::SigningRequest).
///
/// Always caused by the requester.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Bad PEM, wrong PEM block type or invalid PKCS#10 structure
    #[error("malformed-csr: {0}")]
    MalformedCsr(String),

    /// Subject has no Common Name attribute
    #[error("missing-common-name")]
    MissingCommonName,

    /// The CSR self-signature does not verify against its own public key
    #[error("invalid-signature")]
    InvalidSignature,

    /// Signature or key algorithm this engine cannot verify
    #[error("unsupported-algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl DecodeError {
    /// Stable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::MalformedCsr(_) => "malformed-csr",
            DecodeError::MissingCommonName => "missing-common-name",
            DecodeError::InvalidSignature => "invalid-signature",
            DecodeError::UnsupportedAlgorithm(_) => "unsupported-algorithm",
        }
    }
}

/// Certificate construction or signing failed for one request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    /// A critical extension outside the allow-list was requested
    #[error("unsupported-critical-extension: {0}")]
    UnsupportedCriticalExtension(ObjectIdentifier),

    /// The same extension OID appears more than once in the request
    #[error("duplicate-extension: {0}")]
    DuplicateExtension(ObjectIdentifier),

    /// DER encoding of the certificate failed
    #[error("encoding: {0}")]
    Encoding(String),

    /// The signature primitive failed
    #[error("signature: {0}")]
    Crypto(String),
}

impl SignError {
    /// Stable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            SignError::UnsupportedCriticalExtension(_) => "unsupported-critical-extension",
            SignError::DuplicateExtension(_) => "duplicate-extension",
            SignError::Encoding(_) => "encoding",
            SignError::Crypto(_) => "signature",
        }
    }

    /// Extension policy violations are the requester's fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SignError::UnsupportedCriticalExtension(_) | SignError::DuplicateExtension(_)
        )
    }
}

/// Ledger or artifact store failure.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Serial number already recorded
    #[error("serial number {0:#x} already recorded")]
    SerialConflict(u64),

    /// Record identifier already recorded
    #[error("record '{0}' already exists")]
    DuplicateId(String),

    /// No record with this key
    #[error("record '{0}' not found")]
    NotFound(String),

    /// Commit did not finish in time
    #[error("ledger commit timed out after {0:?}")]
    Timeout(Duration),

    /// Filesystem I/O error
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ledger document could not be (de)serialized
    #[error("ledger encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend reported itself unavailable
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::SerialConflict(_))
    }
}

/// The main error type for issuance operations.
#[derive(Error, Debug)]
pub enum IssuerError {
    /// CSR rejected while decoding
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Certificate could not be built or signed
    #[error("signing error: {0}")]
    Sign(#[from] SignError),

    /// Serial allocation failed or the retry budget ran out
    #[error("allocation error: {0}")]
    Allocation(String),

    /// Ledger or artifact store failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Missing or invalid CA material or settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The transport declared something that is not a CSR upload
    #[error("rejected upload: {0}")]
    RejectedUpload(String),
}

impl IssuerError {
    /// The orchestrator stage that failed, used as the `Failed(reason)` label.
    pub fn stage(&self) -> &'static str {
        match self {
            IssuerError::Decode(_) | IssuerError::RejectedUpload(_) => "decode",
            IssuerError::Allocation(_) => "allocation",
            IssuerError::Sign(_) => "signing",
            IssuerError::Storage(_) => "storage",
            IssuerError::Configuration(_) => "configuration",
        }
    }

    /// Whether the caller can fix the request and try again (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        match self {
            IssuerError::Decode(_) | IssuerError::RejectedUpload(_) => true,
            IssuerError::Sign(e) => e.is_client_error(),
            IssuerError::Storage(StorageError::NotFound(_)) => true,
            _ => false,
        }
    }
}

/// A specialized Result type for issuance operations.
pub type Result<T> = std::result::Result<T, IssuerError>;
