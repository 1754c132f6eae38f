//! Error types for tokenkey
//!
//! Every operation on a [`TokenKey`](crate::TokenKey) has its own error enum
//! so callers can match on exactly the failures that operation can produce.
//! [`TokenKeyError`] unifies them for callers that just want `?`.
//!
//! Provider status codes never reach the caller bare: a [`DeviceError`] only
//! appears as the `source` of a definitive, typed failure.

use thiserror::Error;

use crate::model::{AlgorithmError, HashAlgorithm, KeyAlgorithm, LocatorError};

/// Result type alias for tokenkey operations
pub type TokenKeyResult<T> = Result<T, TokenKeyError>;

/// Top-level error type for all tokenkey operations
#[derive(Error, Debug)]
pub enum TokenKeyError {
    #[error("Key import failed: {0}")]
    Import(#[from] ImportError),

    #[error("Signing failed: {0}")]
    Sign(#[from] SignError),

    #[error("Decryption failed: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("Locator export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Token device error: {0}")]
    Device(#[from] DeviceError),
}

/// Status reported by the token driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The session was closed underneath us, usually by token removal
    #[error("Session handle is no longer valid")]
    SessionHandleInvalid,

    /// The token was removed from its slot
    #[error("Token device was removed")]
    DeviceRemoved,

    #[error("No object matches the locator")]
    ObjectNotFound,

    #[error("Mechanism {mechanism:#x} is not supported for this key")]
    MechanismInvalid { mechanism: u64 },

    #[error("Output buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },

    #[error("Operation was not initialized")]
    OperationNotInitialized,

    #[error("User is not logged in")]
    UserNotLoggedIn,

    #[error("Token operation failed: {reason}")]
    Failed { reason: String },
}

impl DeviceError {
    /// Whether the status means the token went away but may come back
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::SessionHandleInvalid | DeviceError::DeviceRemoved
        )
    }
}

/// Hash engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("Hash algorithm not supported by the digest engine: {algorithm}")]
    Unsupported { algorithm: HashAlgorithm },

    #[error("Digest computation failed: {reason}")]
    Failed { reason: String },
}

/// Errors from importing a key by locator
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Malformed key locator: {0}")]
    MalformedLocator(#[source] LocatorError),

    #[error("Key locator does not name an object id")]
    MissingObjectId,

    #[error("No matching private key object on any token: {source}")]
    ObjectNotFound {
        #[source]
        source: DeviceError,
    },

    #[error("Key handle is already bound to a token object")]
    AlreadyBound,
}

/// Errors from signing with a token key
#[derive(Error, Debug)]
pub enum SignError {
    #[error("Key handle is not bound to a token object")]
    UnboundKey,

    #[error("Key algorithm not supported for signing: {algorithm}")]
    UnsupportedAlgorithm { algorithm: KeyAlgorithm },

    #[error("Digest preparation failed: {0}")]
    Digest(#[from] DigestError),

    #[error("Token refused to sign: {source}")]
    SignFailed {
        #[source]
        source: DeviceError,
    },

    #[error("Token '{label}' was removed and recovery was declined")]
    RecoveryDeclined {
        label: String,
        #[source]
        source: DeviceError,
    },

    #[error("Token '{label}' could not be recovered after {attempts} attempt(s)")]
    RecoveryExhausted {
        label: String,
        attempts: u32,
        #[source]
        source: DeviceError,
    },
}

impl From<AlgorithmError> for SignError {
    fn from(err: AlgorithmError) -> Self {
        match err {
            AlgorithmError::Unsupported { algorithm } => {
                SignError::UnsupportedAlgorithm { algorithm }
            }
        }
    }
}

/// Errors from decrypting with a token key
#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("Key handle is not bound to a token object")]
    UnboundKey,

    #[error("Key algorithm not supported for decryption: {algorithm}")]
    UnsupportedAlgorithm { algorithm: KeyAlgorithm },

    #[error("Token refused to decrypt: {source}")]
    DecryptFailed {
        #[source]
        source: DeviceError,
    },

    #[error("Token '{label}' was removed and recovery was declined")]
    RecoveryDeclined {
        label: String,
        #[source]
        source: DeviceError,
    },

    #[error("Token '{label}' could not be recovered after {attempts} attempt(s)")]
    RecoveryExhausted {
        label: String,
        attempts: u32,
        #[source]
        source: DeviceError,
    },
}

impl From<AlgorithmError> for DecryptError {
    fn from(err: AlgorithmError) -> Self {
        match err {
            AlgorithmError::Unsupported { algorithm } => {
                DecryptError::UnsupportedAlgorithm { algorithm }
            }
        }
    }
}

/// Errors from formatting a key's locator back to text
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Key locator is incomplete")]
    IncompleteLocator,
}
