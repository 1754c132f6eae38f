//! Key algorithms and the operation profile each one maps to
//!
//! Signing, decryption and digest preparation all read the same
//! [`PROFILES`] table, so the mechanism handed to the token and the digest
//! encoding fed to it can never disagree.

use std::fmt;

use thiserror::Error;

use super::HashAlgorithm;

/// Public key algorithm of a private key object, as reported by the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// RSA (PKCS#1 v1.5)
    Rsa,
    /// DSA
    Dsa,
    /// Elliptic curve key; present on many tokens but not operable here
    Ec,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Dsa => "DSA",
            KeyAlgorithm::Ec => "EC",
        };
        f.write_str(name)
    }
}

/// Provider-level mechanism selected for a sign or decrypt call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// CKM_RSA_PKCS: raw PKCS#1 v1.5 padding over caller-encoded input
    RsaPkcs,
    /// CKM_DSA: DSA over a caller-computed digest
    Dsa,
}

impl Mechanism {
    /// The PKCS#11 mechanism type value
    pub fn ck_type(self) -> u64 {
        match self {
            Mechanism::RsaPkcs => 0x0000_0001,
            Mechanism::Dsa => 0x0000_0011,
        }
    }
}

/// How the input to a signature is prepared before it reaches the token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestPolicy {
    /// Hash with the caller's algorithm, then wrap in a DER DigestInfo
    DigestInfo,
    /// Always hash with this algorithm; the caller's choice is ignored
    Fixed(HashAlgorithm),
}

/// Mechanism and digest policy for one key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmProfile {
    pub mechanism: Mechanism,
    pub digest: DigestPolicy,
}

/// The single algorithm lookup table
pub const PROFILES: &[(KeyAlgorithm, AlgorithmProfile)] = &[
    (
        KeyAlgorithm::Rsa,
        AlgorithmProfile {
            mechanism: Mechanism::RsaPkcs,
            digest: DigestPolicy::DigestInfo,
        },
    ),
    (
        KeyAlgorithm::Dsa,
        AlgorithmProfile {
            mechanism: Mechanism::Dsa,
            digest: DigestPolicy::Fixed(HashAlgorithm::Sha1),
        },
    ),
];

impl KeyAlgorithm {
    /// Look up the operation profile for this algorithm
    ///
    /// # Errors
    ///
    /// Returns `AlgorithmError::Unsupported` for algorithms with no profile
    pub fn profile(self) -> Result<AlgorithmProfile, AlgorithmError> {
        PROFILES
            .iter()
            .find(|(algorithm, _)| *algorithm == self)
            .map(|(_, profile)| *profile)
            .ok_or(AlgorithmError::Unsupported { algorithm: self })
    }

    /// Shorthand for `profile()?.mechanism`
    pub fn mechanism(self) -> Result<Mechanism, AlgorithmError> {
        self.profile().map(|profile| profile.mechanism)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmError {
    #[error("Key algorithm not supported for private key operations: {algorithm}")]
    Unsupported { algorithm: KeyAlgorithm },
}
