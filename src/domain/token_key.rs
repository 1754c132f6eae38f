//! Private key handle backed by a token object
//!
//! A [`TokenKey`] is created empty, bound to a token object by
//! [`import_url`](TokenKey::import_url), and then used for signing and
//! decryption. The key material never leaves the token; the handle only
//! owns the session the object was found in.
//!
//! If the token disappears while an operation is running, the handle asks
//! its notifier whether to wait for it. When the notifier agrees, the slots
//! are rescanned, the object is found again from the stored locator, and the
//! operation restarts from the beginning.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::binding::BoundObject;
use crate::error::{DecryptError, DeviceError, ExportError, ImportError, SignError};
use crate::logic::{prepare_digest, RecoveryFailure, RecoveryHost, RecoveryProtocol};
use crate::model::{
    HashAlgorithm, ImportFlags, InfoKind, KeyAlgorithm, KeyOptions, LocatorInfo, Mechanism,
};
use crate::ports::{DigestEngine, LocatorService, TokenDevice, TokenNotifier};

/// Lifecycle state of a [`TokenKey`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Nothing imported yet, or disposed
    Empty,
    /// Session open and object handle valid
    Bound,
    /// A transient fault closed the session; recovery is in progress
    SessionBroken,
    /// Recovery was declined or exhausted; only a new import helps
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Sign,
    Decrypt,
}

enum OperationFailure {
    Device(DeviceError),
    Recovery(RecoveryFailure),
}

impl OperationFailure {
    fn into_sign_error(self) -> SignError {
        match self {
            OperationFailure::Device(source)
            | OperationFailure::Recovery(RecoveryFailure::NoNotifier { source }) => {
                SignError::SignFailed { source }
            }
            OperationFailure::Recovery(RecoveryFailure::Declined { label, source }) => {
                SignError::RecoveryDeclined { label, source }
            }
            OperationFailure::Recovery(RecoveryFailure::Exhausted {
                label,
                attempts,
                source,
            }) => SignError::RecoveryExhausted {
                label,
                attempts,
                source,
            },
        }
    }

    fn into_decrypt_error(self) -> DecryptError {
        match self {
            OperationFailure::Device(source)
            | OperationFailure::Recovery(RecoveryFailure::NoNotifier { source }) => {
                DecryptError::DecryptFailed { source }
            }
            OperationFailure::Recovery(RecoveryFailure::Declined { label, source }) => {
                DecryptError::RecoveryDeclined { label, source }
            }
            OperationFailure::Recovery(RecoveryFailure::Exhausted {
                label,
                attempts,
                source,
            }) => DecryptError::RecoveryExhausted {
                label,
                attempts,
                source,
            },
        }
    }
}

/// A private key living on a token
///
/// Mutating operations take `&mut self`, so one handle is used by one
/// caller at a time. Several handles may share a device.
///
/// Dropping the handle closes its session.
pub struct TokenKey<D: TokenDevice + ?Sized> {
    device: Arc<D>,
    locators: Arc<dyn LocatorService + Send + Sync>,
    digests: Arc<dyn DigestEngine + Send + Sync>,
    notifier: Option<Arc<dyn TokenNotifier>>,
    binding: Option<BoundObject<D>>,
    algorithm: Option<KeyAlgorithm>,
    locator: Option<LocatorInfo>,
    options: KeyOptions,
    state: KeyState,
}

impl<D: TokenDevice + ?Sized> TokenKey<D> {
    /// Create an empty handle; no device call is made
    pub fn new(
        device: Arc<D>,
        locators: Arc<dyn LocatorService + Send + Sync>,
        digests: Arc<dyn DigestEngine + Send + Sync>,
    ) -> Self {
        Self {
            device,
            locators,
            digests,
            notifier: None,
            binding: None,
            algorithm: None,
            locator: None,
            options: KeyOptions::default(),
            state: KeyState::Empty,
        }
    }

    /// Consult `notifier` when the token goes away mid-operation
    ///
    /// Without a notifier a removed token fails the operation immediately.
    pub fn with_notifier(mut self, notifier: Arc<dyn TokenNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Bind this handle to the private key object named by `url`
    ///
    /// Discovery logs in to the token as its user.
    ///
    /// # Errors
    ///
    /// - `ImportError::AlreadyBound` if the handle already holds a session;
    ///   the existing binding is left untouched
    /// - `ImportError::MalformedLocator` if `url` cannot be parsed
    /// - `ImportError::MissingObjectId` if `url` names no object id
    /// - `ImportError::ObjectNotFound` if no present token holds the object
    pub fn import_url(&mut self, url: &str, flags: ImportFlags) -> Result<(), ImportError> {
        self.import_url_with_options(
            url,
            KeyOptions {
                flags,
                ..KeyOptions::default()
            },
        )
    }

    /// [`import_url`](TokenKey::import_url) with an explicit session policy
    pub fn import_url_with_options(
        &mut self,
        url: &str,
        options: KeyOptions,
    ) -> Result<(), ImportError> {
        if self.binding.is_some() {
            warn!("Refusing to re-import into a bound key handle");
            return Err(ImportError::AlreadyBound);
        }
        // Identity is only ever set by a successful import
        self.forget();

        let locator = self
            .locators
            .parse(url)
            .map_err(ImportError::MalformedLocator)?;
        if !locator.has_object_id() {
            return Err(ImportError::MissingObjectId);
        }

        debug!("Looking up key {} ({:?})", locator.id_hex(), options.login);
        let (binding, algorithm) = BoundObject::discover(&self.device, &locator, options.login)
            .map_err(|source| ImportError::ObjectNotFound { source })?;

        info!(
            "Imported {} key '{}'",
            algorithm,
            locator.display_label()
        );
        self.binding = Some(binding);
        self.algorithm = Some(algorithm);
        self.locator = Some(locator);
        self.options = options;
        self.state = KeyState::Bound;
        Ok(())
    }

    /// Sign input already prepared for the key's mechanism
    ///
    /// For RSA keys `digest` must be a DER DigestInfo; for DSA keys a bare
    /// digest. See [`sign_data`](TokenKey::sign_data) to have it prepared.
    pub fn sign_hash(&mut self, digest: &[u8]) -> Result<Vec<u8>, SignError> {
        let algorithm = self.bound_algorithm().ok_or(SignError::UnboundKey)?;
        let mechanism = algorithm.mechanism()?;

        debug!(
            "Signing {} bytes with key '{}' ({:?})",
            digest.len(),
            self.label(),
            mechanism
        );
        let signature = self
            .run_with_recovery(Operation::Sign, mechanism, digest)
            .map_err(OperationFailure::into_sign_error)?;

        info!("Signature created with key '{}'", self.label());
        Ok(signature)
    }

    /// Hash `data` as the key's algorithm requires, then sign the result
    ///
    /// RSA keys hash with `hash` and sign a DigestInfo. DSA keys always hash
    /// with SHA-1 and `hash` is ignored.
    pub fn sign_data(&mut self, data: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, SignError> {
        let algorithm = self.bound_algorithm().ok_or(SignError::UnboundKey)?;
        let input = prepare_digest(&*self.digests, algorithm, hash, data)?;
        self.sign_hash(&input)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let algorithm = self.bound_algorithm().ok_or(DecryptError::UnboundKey)?;
        let mechanism = algorithm.mechanism()?;

        debug!(
            "Decrypting {} bytes with key '{}'",
            ciphertext.len(),
            self.label()
        );
        let plaintext = self
            .run_with_recovery(Operation::Decrypt, mechanism, ciphertext)
            .map_err(OperationFailure::into_decrypt_error)?;

        info!("Decrypted with key '{}'", self.label());
        Ok(plaintext)
    }

    /// Locator text naming this key
    pub fn export_url(&self) -> Result<String, ExportError> {
        let locator = self.locator.as_ref().ok_or(ExportError::IncompleteLocator)?;
        self.locators
            .format(locator)
            .map_err(|_| ExportError::IncompleteLocator)
    }

    /// Algorithm reported by the token, once imported
    pub fn algorithm(&self) -> Option<KeyAlgorithm> {
        self.algorithm
    }

    pub fn info(&self, kind: InfoKind) -> Option<String> {
        self.locator.as_ref().and_then(|l| l.info(kind))
    }

    /// Raw object id, once imported
    pub fn id(&self) -> Option<&[u8]> {
        self.locator.as_ref().map(|l| l.id.as_slice())
    }

    pub fn locator(&self) -> Option<&LocatorInfo> {
        self.locator.as_ref()
    }

    pub fn flags(&self) -> ImportFlags {
        self.options.flags
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    /// Close the session if one is open and forget the imported key
    ///
    /// Safe to call repeatedly and on handles that were never bound.
    pub fn dispose(&mut self) {
        if let Some(binding) = self.binding.take() {
            debug!("Disposing key '{}'", self.label());
            drop(binding);
        }
        self.forget();
        if self.state != KeyState::Failed {
            self.state = KeyState::Empty;
        }
    }

    /// Drop everything learned from the last import
    fn forget(&mut self) {
        self.algorithm = None;
        self.locator = None;
        self.options = KeyOptions::default();
    }

    fn bound_algorithm(&self) -> Option<KeyAlgorithm> {
        self.binding.as_ref().and(self.algorithm)
    }

    fn label(&self) -> String {
        self.locator
            .as_ref()
            .map(LocatorInfo::display_label)
            .unwrap_or_default()
    }

    fn run_with_recovery(
        &mut self,
        operation: Operation,
        mechanism: Mechanism,
        input: &[u8],
    ) -> Result<Vec<u8>, OperationFailure> {
        let notifier = self.notifier.clone();
        let mut recovery = RecoveryProtocol::new(notifier.as_deref());

        loop {
            match self.run_once(operation, mechanism, input) {
                Ok(output) => return Ok(output),
                Err(status) if status.is_transient() => {
                    self.state = KeyState::SessionBroken;
                    let recovered = recovery.handle_fault(&mut Rebind(&mut *self), status);
                    if let Err(failure) = recovered {
                        self.state = KeyState::Failed;
                        return Err(OperationFailure::Recovery(failure));
                    }
                    debug!("Restarting {:?} after recovery", operation);
                }
                Err(status) => return Err(OperationFailure::Device(status)),
            }
        }
    }

    /// One pass of init, size query and execute
    fn run_once(
        &self,
        operation: Operation,
        mechanism: Mechanism,
        input: &[u8],
    ) -> Result<Vec<u8>, DeviceError> {
        let binding = self
            .binding
            .as_ref()
            .ok_or(DeviceError::SessionHandleInvalid)?;
        let session = binding.session();
        let device = self.device.as_ref();

        let mut output = match operation {
            Operation::Sign => {
                device.sign_init(session, mechanism, binding.object())?;
                vec![0u8; device.sign(session, input, None)?]
            }
            Operation::Decrypt => {
                device.decrypt_init(session, mechanism, binding.object())?;
                vec![0u8; device.decrypt(session, input, None)?]
            }
        };

        let written = match operation {
            Operation::Sign => device.sign(session, input, Some(&mut output))?,
            Operation::Decrypt => device.decrypt(session, input, Some(&mut output))?,
        };
        output.truncate(written);
        Ok(output)
    }
}

/// Recovery side effects applied to a key handle
struct Rebind<'k, D: TokenDevice + ?Sized>(&'k mut TokenKey<D>);

impl<D: TokenDevice + ?Sized> RecoveryHost for Rebind<'_, D> {
    fn key_label(&self) -> String {
        self.0.label()
    }

    fn drop_session(&mut self) {
        self.0.binding = None;
    }

    fn rescan(&mut self) -> Result<(), DeviceError> {
        self.0.device.rescan_slots()
    }

    fn rediscover(&mut self) -> Result<(), DeviceError> {
        let key = &mut *self.0;
        let locator = key.locator.as_ref().ok_or(DeviceError::ObjectNotFound)?;
        let (binding, algorithm) = BoundObject::discover(&key.device, locator, key.options.login)?;

        if key.algorithm != Some(algorithm) {
            warn!(
                "Rediscovered key '{}' reports {}, refusing to use it",
                locator.display_label(),
                algorithm
            );
            return Err(DeviceError::Failed {
                reason: format!("rediscovered object reports {} key", algorithm),
            });
        }

        key.binding = Some(binding);
        key.state = KeyState::Bound;
        Ok(())
    }
}

impl<D: TokenDevice + ?Sized> fmt::Debug for TokenKey<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKey")
            .field("state", &self.state)
            .field("algorithm", &self.algorithm)
            .field("locator", &self.locator)
            .field("binding", &self.binding)
            .field("flags", &self.options.flags)
            .finish()
    }
}
