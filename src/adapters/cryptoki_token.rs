//! PKCS#11 module driver built on cryptoki
//!
//! `CryptokiToken` loads a provider library (SoftHSM, OpenSC, a vendor HSM
//! module) and exposes its tokens through the driver ports. Every session
//! opened by [`open_and_find_object`](ObjectFinder::open_and_find_object) is
//! a real provider session and is closed when the caller closes it.
//!
//! cryptoki sizes sign and decrypt output itself, so the size query runs the
//! whole operation and keeps the result until the execute call collects it.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::mechanism::Mechanism as CkMechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::{Slot, TokenInfo};
use cryptoki::types::AuthPin;
use tracing::{debug, info};

use super::TokenProfile;
use crate::error::DeviceError;
use crate::model::{
    KeyAlgorithm, LocatorInfo, LoginMode, Mechanism, ObjectHandle, ObjectKind, SessionId,
};
use crate::ports::{Discovered, ObjectFinder, PrivateKeyOps, SlotScanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Sign,
    Decrypt,
}

struct ActiveOperation {
    kind: OperationKind,
    mechanism: Mechanism,
    key: cryptoki::object::ObjectHandle,
    /// Result of the last computation and the input it was computed for
    cached: Option<(Vec<u8>, Vec<u8>)>,
}

struct OpenSession {
    session: Session,
    /// Objects found in this session; `ObjectHandle(n)` is entry `n - 1`
    objects: Vec<cryptoki::object::ObjectHandle>,
    active: Option<ActiveOperation>,
}

type SharedSession = Arc<Mutex<OpenSession>>;

/// Token driver backed by a PKCS#11 provider library
pub struct CryptokiToken {
    module: PathBuf,
    pkcs11: Pkcs11,
    pin: Option<AuthPin>,
    /// Slot list as of the last rescan
    slots: Mutex<Vec<Slot>>,
    sessions: Mutex<HashMap<u64, SharedSession>>,
    next_session: AtomicU64,
}

impl CryptokiToken {
    /// Load and initialize the provider at `module`
    ///
    /// `pin` is used to log in as the token user when a key is looked up
    /// with [`LoginMode::User`]. Without a pin the login relies on the
    /// provider's protected authentication path.
    pub fn open(module: impl AsRef<Path>, pin: Option<&str>) -> Result<Self, DeviceError> {
        let module = module.as_ref();
        let pkcs11 = Pkcs11::new(module).map_err(|e| DeviceError::Failed {
            reason: format!("Failed to load PKCS#11 module {}: {}", module.display(), e),
        })?;
        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .map_err(device_error)?;

        let token = Self {
            module: module.to_path_buf(),
            pkcs11,
            pin: pin.map(|p| AuthPin::new(p.into())),
            slots: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        };
        token.rescan_slots()?;
        info!("Loaded PKCS#11 module {}", module.display());
        Ok(token)
    }

    /// Number of sessions currently open through this driver
    pub fn open_sessions(&self) -> Result<usize, DeviceError> {
        Ok(lock(&self.sessions)?.len())
    }

    fn session(&self, session: SessionId) -> Result<SharedSession, DeviceError> {
        lock(&self.sessions)?
            .get(&session.0)
            .cloned()
            .ok_or(DeviceError::SessionHandleInvalid)
    }

    fn login(&self, session: &Session) -> Result<(), DeviceError> {
        match session.login(UserType::User, self.pin.as_ref()) {
            Ok(()) => Ok(()),
            // Login state is shared by every session of the application
            Err(CryptokiError::Pkcs11(RvError::UserAlreadyLoggedIn, ..)) => Ok(()),
            Err(e) => Err(device_error(e)),
        }
    }

    fn init_operation(
        &self,
        kind: OperationKind,
        session: SessionId,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), DeviceError> {
        let shared = self.session(session)?;
        let mut open = lock(&shared)?;

        // Surfaces a pulled token before any key material is touched
        open.session.get_session_info().map_err(device_error)?;

        if open.active.is_some() {
            return Err(DeviceError::Failed {
                reason: "Another operation is active in this session".to_string(),
            });
        }
        let key = usize::try_from(key.0)
            .ok()
            .and_then(|h| h.checked_sub(1))
            .and_then(|i| open.objects.get(i).copied())
            .ok_or(DeviceError::ObjectNotFound)?;

        open.active = Some(ActiveOperation {
            kind,
            mechanism,
            key,
            cached: None,
        });
        Ok(())
    }

    fn run_operation(
        &self,
        kind: OperationKind,
        session: SessionId,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> Result<usize, DeviceError> {
        let shared = self.session(session)?;
        let mut guard = lock(&shared)?;
        let open = &mut *guard;
        let active = open
            .active
            .as_mut()
            .filter(|op| op.kind == kind)
            .ok_or(DeviceError::OperationNotInitialized)?;

        let cached_for_input = matches!(&active.cached, Some((cached_input, _)) if cached_input == input);
        if !cached_for_input {
            let mechanism = active.mechanism;
            let computed = match kind {
                OperationKind::Sign => open.session.sign(&ck_mechanism(mechanism), active.key, input),
                OperationKind::Decrypt => {
                    open.session.decrypt(&ck_mechanism(mechanism), active.key, input)
                }
            };
            match computed {
                Ok(result) => active.cached = Some((input.to_vec(), result)),
                Err(e) => {
                    // A failed operation is finished
                    open.active = None;
                    return Err(operation_error(e, mechanism));
                }
            }
        }

        let required = active.cached.as_ref().map_or(0, |(_, result)| result.len());
        let Some(buffer) = output else {
            return Ok(required);
        };
        if buffer.len() < required {
            return Err(DeviceError::BufferTooSmall { required });
        }

        if let Some((_, result)) = open.active.take().and_then(|op| op.cached) {
            buffer[..result.len()].copy_from_slice(&result);
        }
        Ok(required)
    }
}

impl fmt::Debug for CryptokiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock().map(|s| s.len()).ok();
        let sessions = self.sessions.lock().map(|s| s.len()).ok();
        f.debug_struct("CryptokiToken")
            .field("module", &self.module)
            .field("pin", &self.pin.as_ref().map(|_| "[REDACTED]"))
            .field("slots", &slots)
            .field("sessions", &sessions)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, DeviceError> {
    mutex.lock().map_err(|_| DeviceError::Failed {
        reason: "PKCS#11 driver state poisoned".to_string(),
    })
}

/// Map a provider return value onto the driver status taxonomy
fn device_status(rv: RvError) -> DeviceError {
    match rv {
        RvError::SessionHandleInvalid | RvError::SessionClosed => {
            DeviceError::SessionHandleInvalid
        }
        RvError::DeviceRemoved | RvError::TokenNotPresent => DeviceError::DeviceRemoved,
        RvError::ObjectHandleInvalid | RvError::KeyHandleInvalid => DeviceError::ObjectNotFound,
        RvError::OperationNotInitialized => DeviceError::OperationNotInitialized,
        RvError::UserNotLoggedIn => DeviceError::UserNotLoggedIn,
        other => DeviceError::Failed {
            reason: other.to_string(),
        },
    }
}

fn device_error(err: CryptokiError) -> DeviceError {
    match err {
        CryptokiError::Pkcs11(rv, ..) => device_status(rv),
        other => DeviceError::Failed {
            reason: other.to_string(),
        },
    }
}

fn operation_error(err: CryptokiError, mechanism: Mechanism) -> DeviceError {
    match err {
        CryptokiError::Pkcs11(rv, ..) => operation_status(rv, mechanism),
        other => device_error(other),
    }
}

/// Like [`device_status`], but a rejected mechanism names the one requested
fn operation_status(rv: RvError, mechanism: Mechanism) -> DeviceError {
    match rv {
        RvError::MechanismInvalid | RvError::KeyTypeInconsistent => {
            DeviceError::MechanismInvalid {
                mechanism: mechanism.ck_type(),
            }
        }
        other => device_status(other),
    }
}

fn ck_mechanism(mechanism: Mechanism) -> CkMechanism<'static> {
    match mechanism {
        Mechanism::RsaPkcs => CkMechanism::RsaPkcs,
        Mechanism::Dsa => CkMechanism::Dsa,
    }
}

fn algorithm_for(key_type: KeyType) -> Result<KeyAlgorithm, DeviceError> {
    if key_type == KeyType::RSA {
        Ok(KeyAlgorithm::Rsa)
    } else if key_type == KeyType::DSA {
        Ok(KeyAlgorithm::Dsa)
    } else if key_type == KeyType::EC {
        Ok(KeyAlgorithm::Ec)
    } else {
        Err(DeviceError::Failed {
            reason: format!("Unsupported key type {}", key_type),
        })
    }
}

fn key_algorithm(
    session: &Session,
    object: cryptoki::object::ObjectHandle,
) -> Result<KeyAlgorithm, DeviceError> {
    session
        .get_attributes(object, &[AttributeType::KeyType])
        .map_err(device_error)?
        .into_iter()
        .find_map(|attribute| match attribute {
            Attribute::KeyType(key_type) => Some(key_type),
            _ => None,
        })
        .ok_or_else(|| DeviceError::Failed {
            reason: "Key object does not report its key type".to_string(),
        })
        .and_then(algorithm_for)
}

/// Search template for the private key object named by `locator`
fn object_template(locator: &LocatorInfo) -> Vec<Attribute> {
    let mut template = vec![
        Attribute::Class(ObjectClass::PRIVATE_KEY),
        Attribute::Id(locator.id.clone()),
    ];
    if let Some(label) = &locator.object {
        template.push(Attribute::Label(label.as_bytes().to_vec()));
    }
    template
}

fn token_profile(info: &TokenInfo) -> TokenProfile {
    TokenProfile {
        label: info.label().trim_end().to_string(),
        manufacturer: info.manufacturer_id().trim_end().to_string(),
        model: info.model().trim_end().to_string(),
        serial: info.serial_number().trim_end().to_string(),
    }
}

impl SlotScanner for CryptokiToken {
    fn rescan_slots(&self) -> Result<(), DeviceError> {
        let slots = self.pkcs11.get_slots_with_token().map_err(device_error)?;
        debug!("{} PKCS#11 slot(s) hold a token", slots.len());
        *lock(&self.slots)? = slots;
        Ok(())
    }
}

impl ObjectFinder for CryptokiToken {
    fn open_and_find_object(
        &self,
        locator: &LocatorInfo,
        login: LoginMode,
    ) -> Result<Discovered, DeviceError> {
        if matches!(locator.kind, Some(kind) if kind != ObjectKind::PrivateKey) {
            return Err(DeviceError::ObjectNotFound);
        }
        let slots = lock(&self.slots)?.clone();

        for slot in slots {
            let profile = match self.pkcs11.get_token_info(slot) {
                Ok(info) => token_profile(&info),
                Err(e) => {
                    debug!("Skipping slot {}: {}", slot.id(), e);
                    continue;
                }
            };
            if !profile.matches(locator) {
                continue;
            }

            let session = self.pkcs11.open_ro_session(slot).map_err(device_error)?;
            if login == LoginMode::User {
                self.login(&session)?;
            }
            let found = session
                .find_objects(&object_template(locator))
                .map_err(device_error)?;
            let Some(object) = found.into_iter().next() else {
                debug!("No matching object on token '{}'", profile.label);
                continue;
            };
            let algorithm = key_algorithm(&session, object)?;

            let id = self.next_session.fetch_add(1, Ordering::Relaxed);
            lock(&self.sessions)?.insert(
                id,
                Arc::new(Mutex::new(OpenSession {
                    session,
                    objects: vec![object],
                    active: None,
                })),
            );
            debug!("Opened PKCS#11 session {} on token '{}'", id, profile.label);

            return Ok(Discovered {
                session: SessionId(id),
                object: ObjectHandle(1),
                algorithm,
            });
        }

        Err(DeviceError::ObjectNotFound)
    }

    fn close_session(&self, session: SessionId) -> Result<(), DeviceError> {
        // Dropping the cryptoki session closes it with the provider
        if lock(&self.sessions)?.remove(&session.0).is_none() {
            return Err(DeviceError::SessionHandleInvalid);
        }
        debug!("Closed PKCS#11 {}", session);
        Ok(())
    }
}

impl PrivateKeyOps for CryptokiToken {
    fn sign_init(
        &self,
        session: SessionId,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), DeviceError> {
        self.init_operation(OperationKind::Sign, session, mechanism, key)
    }

    fn sign(
        &self,
        session: SessionId,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> Result<usize, DeviceError> {
        self.run_operation(OperationKind::Sign, session, input, output)
    }

    fn decrypt_init(
        &self,
        session: SessionId,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), DeviceError> {
        self.init_operation(OperationKind::Decrypt, session, mechanism, key)
    }

    fn decrypt(
        &self,
        session: SessionId,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> Result<usize, DeviceError> {
        self.run_operation(OperationKind::Decrypt, session, input, output)
    }
}
