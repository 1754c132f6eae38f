//! Domain types for token key operations
//!
//! These wrap provider primitives (session ids, object handles, mechanism
//! numbers) so they cannot be mixed up, and carry the algorithm table the
//! sign and decrypt paths share.

mod algorithm;
mod hash;
mod locator;
mod session;

pub use algorithm::{
    AlgorithmError, AlgorithmProfile, DigestPolicy, KeyAlgorithm, Mechanism, PROFILES,
};
pub use hash::{HashAlgorithm, HashAlgorithmError};
pub use locator::{InfoKind, LocatorError, LocatorInfo, ObjectKind};
pub use session::{ImportFlags, KeyOptions, LoginMode, ObjectHandle, SessionId};
