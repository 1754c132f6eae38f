//! Session and object handle owned as one resource

use std::sync::Arc;

use tracing::debug;

use crate::error::DeviceError;
use crate::model::{KeyAlgorithm, LocatorInfo, LoginMode, ObjectHandle, SessionId};
use crate::ports::ObjectFinder;

/// An open session together with the key object found inside it
///
/// The object handle is only meaningful while the session is open, so the
/// two are created together by [`discover`](BoundObject::discover) and the
/// session is closed when the binding is dropped.
pub(crate) struct BoundObject<D: ObjectFinder + ?Sized> {
    device: Arc<D>,
    session: SessionId,
    object: ObjectHandle,
}

impl<D: ObjectFinder + ?Sized> BoundObject<D> {
    /// Open a session and find the object named by `locator`
    pub(crate) fn discover(
        device: &Arc<D>,
        locator: &LocatorInfo,
        login: LoginMode,
    ) -> Result<(Self, KeyAlgorithm), DeviceError> {
        let found = device.open_and_find_object(locator, login)?;
        debug!(
            "Bound {} in {} ({})",
            found.object, found.session, found.algorithm
        );

        let binding = Self {
            device: Arc::clone(device),
            session: found.session,
            object: found.object,
        };
        Ok((binding, found.algorithm))
    }

    pub(crate) fn session(&self) -> SessionId {
        self.session
    }

    pub(crate) fn object(&self) -> ObjectHandle {
        self.object
    }
}

impl<D: ObjectFinder + ?Sized> Drop for BoundObject<D> {
    fn drop(&mut self) {
        // The session may already be gone with its token
        if let Err(e) = self.device.close_session(self.session) {
            debug!("Closing {} failed: {}", self.session, e);
        } else {
            debug!("Closed {}", self.session);
        }
    }
}

impl<D: ObjectFinder + ?Sized> std::fmt::Debug for BoundObject<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundObject")
            .field("session", &self.session)
            .field("object", &self.object)
            .finish()
    }
}
