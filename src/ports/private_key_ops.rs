//! PrivateKeyOps trait - two-phase sign and decrypt calls

use crate::error::DeviceError;
use crate::model::{Mechanism, ObjectHandle, SessionId};

/// Capability to run private key operations inside a session
///
/// Sign and decrypt follow the provider's two-phase convention: after
/// `*_init`, a call with `output == None` reports the required output size
/// and keeps the operation active; a call with a buffer of at least that
/// size performs the operation, finishes it, and returns the number of
/// bytes written.
pub trait PrivateKeyOps {
    fn sign_init(
        &self,
        session: SessionId,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), DeviceError>;

    /// Sign `input`, or report the signature size when `output` is `None`
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::BufferTooSmall` if `output` cannot hold the
    /// signature, in which case the operation stays active.
    fn sign(
        &self,
        session: SessionId,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> Result<usize, DeviceError>;

    fn decrypt_init(
        &self,
        session: SessionId,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), DeviceError>;

    /// Decrypt `input`, or report the plaintext size when `output` is `None`
    fn decrypt(
        &self,
        session: SessionId,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> Result<usize, DeviceError>;
}
