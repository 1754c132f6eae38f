//! Hash engine backed by the RustCrypto digest crates

use sha2::Digest;

use crate::error::DigestError;
use crate::model::HashAlgorithm;
use crate::ports::DigestEngine;

/// Software digest engine covering every [`HashAlgorithm`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCryptoDigest;

impl DigestEngine for RustCryptoDigest {
    fn hash(&self, algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, DigestError> {
        let digest = match algorithm {
            HashAlgorithm::Md5 => md5::Md5::digest(data).to_vec(),
            HashAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha224 => sha2::Sha224::digest(data).to_vec(),
            HashAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        };
        Ok(digest)
    }
}
