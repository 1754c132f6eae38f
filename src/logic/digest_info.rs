//! Digest preparation for token signatures
//!
//! The token's RSA mechanism pads whatever it is given, so the DER
//! DigestInfo wrapping a PKCS#1 v1.5 signature must be built here. DSA
//! signs a bare digest and always uses SHA-1.

use rsa::Pkcs1v15Sign;
use tracing::warn;

use crate::error::SignError;
use crate::model::{DigestPolicy, HashAlgorithm, KeyAlgorithm};
use crate::ports::DigestEngine;

/// PKCS#1 v1.5 signature scheme carrying the DigestInfo prefix for `algorithm`
fn signature_scheme(algorithm: HashAlgorithm) -> Pkcs1v15Sign {
    match algorithm {
        HashAlgorithm::Md5 => Pkcs1v15Sign::new::<md5::Md5>(),
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        HashAlgorithm::Sha224 => Pkcs1v15Sign::new::<sha2::Sha224>(),
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
    }
}

/// DER prefix of a DigestInfo for `algorithm`, up to the digest octets
pub fn digest_info_prefix(algorithm: HashAlgorithm) -> Box<[u8]> {
    signature_scheme(algorithm).prefix
}

/// Wrap a digest in a DER DigestInfo
pub fn encode_digest_info(algorithm: HashAlgorithm, digest: &[u8]) -> Vec<u8> {
    let prefix = digest_info_prefix(algorithm);
    let mut encoded = Vec::with_capacity(prefix.len() + digest.len());
    encoded.extend_from_slice(&prefix);
    encoded.extend_from_slice(digest);
    encoded
}

/// Produce the bytes handed to the token for signing `data`
///
/// For RSA keys, `data` is hashed with `requested` and wrapped in a
/// DigestInfo. For DSA keys, `data` is hashed with SHA-1 and `requested` is
/// ignored.
///
/// # Errors
///
/// Returns `SignError::UnsupportedAlgorithm` for keys with no signing
/// profile and `SignError::Digest` if the engine cannot hash.
pub fn prepare_digest<E>(
    engine: &E,
    key_algorithm: KeyAlgorithm,
    requested: HashAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>, SignError>
where
    E: DigestEngine + ?Sized,
{
    let profile = key_algorithm.profile()?;

    match profile.digest {
        DigestPolicy::DigestInfo => {
            let digest = engine.hash(requested, data)?;
            Ok(encode_digest_info(requested, &digest))
        }
        DigestPolicy::Fixed(fixed) => {
            if requested != fixed {
                warn!(
                    "{} keys always sign {} digests; requested {} is ignored",
                    key_algorithm, fixed, requested
                );
            }
            Ok(engine.hash(fixed, data)?)
        }
    }
}
