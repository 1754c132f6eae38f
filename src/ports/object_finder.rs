//! ObjectFinder trait - capability to locate key objects on tokens

use crate::error::DeviceError;
use crate::model::{KeyAlgorithm, LocatorInfo, LoginMode, ObjectHandle, SessionId};

/// A private key object found on a token, inside a freshly opened session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovered {
    /// Session opened for the search; the caller now owns it
    pub session: SessionId,
    /// Handle of the matching object, valid only inside `session`
    pub object: ObjectHandle,
    /// Key algorithm recorded on the token for this object
    pub algorithm: KeyAlgorithm,
}

/// Capability to open sessions and find private key objects
pub trait ObjectFinder {
    /// Open a session on the token matching `locator` and find its object
    ///
    /// On success the returned session is open and must eventually be passed
    /// to [`close_session`](ObjectFinder::close_session).
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::ObjectNotFound` if no present token holds a
    /// matching private key object, or the provider's status otherwise.
    /// No session is left open on error.
    fn open_and_find_object(
        &self,
        locator: &LocatorInfo,
        login: LoginMode,
    ) -> Result<Discovered, DeviceError>;

    /// Close a session previously returned by `open_and_find_object`
    fn close_session(&self, session: SessionId) -> Result<(), DeviceError>;
}
