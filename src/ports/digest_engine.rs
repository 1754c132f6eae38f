use crate::error::DigestError;
use crate::model::HashAlgorithm;

/// Capability to compute message digests
pub trait DigestEngine {
    fn hash(&self, algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, DigestError>;
}
