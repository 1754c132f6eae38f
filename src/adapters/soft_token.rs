//! In-memory software token
//!
//! `SoftToken` behaves like a PKCS#11 provider with a handful of slots, each
//! holding at most one token with RSA private keys. Private key material is
//! kept inside the driver; callers only ever see session ids and object
//! handles, exactly as with a hardware token.
//!
//! Tokens can be pulled out and put back. Pulling a token invalidates every
//! session opened on it. A token that is put back stays invisible to object
//! searches until [`rescan_slots`](SlotScanner::rescan_slots) is called, which
//! mirrors providers that cache their slot list.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};

use crate::error::DeviceError;
use crate::model::{
    KeyAlgorithm, LocatorInfo, LoginMode, Mechanism, ObjectHandle, ObjectKind, SessionId,
};
use crate::ports::{Discovered, ObjectFinder, PrivateKeyOps, SlotScanner};

use super::TokenProfile;

/// RSA private key object stored on a soft token
pub struct SoftKey {
    pub label: String,
    pub id: Vec<u8>,
    /// Private objects are only visible to logged-in sessions
    pub private: bool,
    key: RsaPrivateKey,
}

impl std::fmt::Debug for SoftKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftKey")
            .field("label", &self.label)
            .field("id", &hex::encode(&self.id))
            .field("private", &self.private)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SoftKey {
    pub fn rsa(label: impl Into<String>, id: impl Into<Vec<u8>>, key: RsaPrivateKey) -> Self {
        Self {
            label: label.into(),
            id: id.into(),
            private: true,
            key,
        }
    }

    /// Load an RSA key from a PKCS#8 PEM document
    pub fn from_pkcs8_pem(
        label: impl Into<String>,
        id: impl Into<Vec<u8>>,
        pem: &str,
    ) -> Result<Self, DeviceError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| DeviceError::Failed {
            reason: format!("Failed to load PKCS#8 key: {}", e),
        })?;
        Ok(Self::rsa(label, id, key))
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    /// Modulus length in bytes
    pub fn size(&self) -> usize {
        self.key.size()
    }
}

#[derive(Debug)]
struct Slot {
    profile: TokenProfile,
    keys: Vec<SoftKey>,
    present: bool,
    /// Presence as of the last slot rescan
    listed: bool,
}

impl Slot {
    fn searchable(&self) -> bool {
        self.present && self.listed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Sign,
    Decrypt,
}

#[derive(Debug)]
struct ActiveOperation {
    kind: OperationKind,
    key_index: usize,
    /// Result of the last computation and the input it was computed for
    cached: Option<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug)]
struct Session {
    slot: usize,
    logged_in: bool,
    active: Option<ActiveOperation>,
}

#[derive(Debug, Default)]
struct State {
    slots: Vec<Slot>,
    sessions: HashMap<u64, Session>,
    next_session: u64,
}

/// Software PKCS#11-style token driver
#[derive(Debug, Default)]
pub struct SoftToken {
    state: Mutex<State>,
}

impl SoftToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DeviceError> {
        self.state.lock().map_err(|_| DeviceError::Failed {
            reason: "Soft token state poisoned".to_string(),
        })
    }

    /// Insert a new token into a fresh slot; it is listed immediately
    pub fn add_token(&self, profile: TokenProfile) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        if state.slots.iter().any(|s| s.profile.label == profile.label) {
            return Err(DeviceError::Failed {
                reason: format!("Token '{}' already exists", profile.label),
            });
        }
        debug!("Soft token '{}' added", profile.label);
        state.slots.push(Slot {
            profile,
            keys: Vec::new(),
            present: true,
            listed: true,
        });
        Ok(())
    }

    /// Store a key on the token labelled `token_label`
    pub fn add_key(&self, token_label: &str, key: SoftKey) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let slot = find_slot(&mut state, token_label)?;
        if slot.keys.iter().any(|k| k.id == key.id) {
            return Err(DeviceError::Failed {
                reason: format!("Object id {} already in use", hex::encode(&key.id)),
            });
        }
        debug!(
            "Stored key '{}' (id {}) on token '{}'",
            key.label,
            hex::encode(&key.id),
            token_label
        );
        slot.keys.push(key);
        Ok(())
    }

    /// Pull a token out of its slot, invalidating its sessions
    pub fn remove_token(&self, token_label: &str) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let index = slot_index(&state, token_label)?;
        state.slots[index].present = false;
        state.sessions.retain(|_, session| session.slot != index);
        info!("Soft token '{}' removed", token_label);
        Ok(())
    }

    /// Put a pulled token back; it is searchable after the next rescan
    pub fn insert_token(&self, token_label: &str) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let slot = find_slot(&mut state, token_label)?;
        slot.present = true;
        info!("Soft token '{}' inserted", token_label);
        Ok(())
    }

    /// Locator naming a stored key, filled from the token's profile
    pub fn locator(&self, token_label: &str, id: &[u8]) -> Result<LocatorInfo, DeviceError> {
        let mut state = self.lock()?;
        let slot = find_slot(&mut state, token_label)?;
        let key = slot
            .keys
            .iter()
            .find(|k| k.id == id)
            .ok_or(DeviceError::ObjectNotFound)?;

        Ok(LocatorInfo {
            token: Some(slot.profile.label.clone()),
            manufacturer: Some(slot.profile.manufacturer.clone()),
            model: Some(slot.profile.model.clone()),
            serial: Some(slot.profile.serial.clone()),
            object: Some(key.label.clone()),
            kind: Some(ObjectKind::PrivateKey),
            id: key.id.clone(),
        })
    }

    /// Number of sessions currently open across all slots
    pub fn open_sessions(&self) -> Result<usize, DeviceError> {
        Ok(self.lock()?.sessions.len())
    }
}

fn slot_index(state: &State, token_label: &str) -> Result<usize, DeviceError> {
    state
        .slots
        .iter()
        .position(|s| s.profile.label == token_label)
        .ok_or_else(|| DeviceError::Failed {
            reason: format!("No token labelled '{}'", token_label),
        })
}

fn find_slot<'a>(state: &'a mut State, token_label: &str) -> Result<&'a mut Slot, DeviceError> {
    let index = slot_index(state, token_label)?;
    Ok(&mut state.slots[index])
}

impl SlotScanner for SoftToken {
    fn rescan_slots(&self) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        for slot in &mut state.slots {
            slot.listed = slot.present;
        }
        debug!("Rescanned {} soft token slot(s)", state.slots.len());
        Ok(())
    }
}

impl ObjectFinder for SoftToken {
    fn open_and_find_object(
        &self,
        locator: &LocatorInfo,
        login: LoginMode,
    ) -> Result<Discovered, DeviceError> {
        if matches!(locator.kind, Some(kind) if kind != ObjectKind::PrivateKey) {
            return Err(DeviceError::ObjectNotFound);
        }
        let logged_in = login == LoginMode::User;

        let mut state = self.lock()?;
        let found = state.slots.iter().enumerate().find_map(|(slot_index, slot)| {
            if !slot.searchable() || !slot.profile.matches(locator) {
                return None;
            }
            slot.keys
                .iter()
                .position(|key| {
                    key.id == locator.id
                        && (logged_in || !key.private)
                        && locator.object.as_ref().map_or(true, |l| *l == key.label)
                })
                .map(|key_index| (slot_index, key_index))
        });

        let (slot, key_index) = found.ok_or(DeviceError::ObjectNotFound)?;

        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(
            id,
            Session {
                slot,
                logged_in,
                active: None,
            },
        );
        debug!("Opened soft token session {} on slot {}", id, slot);

        Ok(Discovered {
            session: SessionId(id),
            object: ObjectHandle(key_index as u64 + 1),
            algorithm: KeyAlgorithm::Rsa,
        })
    }

    fn close_session(&self, session: SessionId) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        if state.sessions.remove(&session.0).is_none() {
            return Err(DeviceError::SessionHandleInvalid);
        }
        debug!("Closed soft token {}", session);
        Ok(())
    }
}

impl SoftToken {
    fn init_operation(
        &self,
        kind: OperationKind,
        session: SessionId,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let State {
            slots, sessions, ..
        } = &mut *state;
        let session = sessions
            .get_mut(&session.0)
            .ok_or(DeviceError::SessionHandleInvalid)?;

        if session.active.is_some() {
            return Err(DeviceError::Failed {
                reason: "Another operation is active in this session".to_string(),
            });
        }
        if mechanism != Mechanism::RsaPkcs {
            return Err(DeviceError::MechanismInvalid {
                mechanism: mechanism.ck_type(),
            });
        }

        let key_index = usize::try_from(key.0)
            .ok()
            .and_then(|h| h.checked_sub(1))
            .filter(|&i| i < slots[session.slot].keys.len())
            .ok_or(DeviceError::ObjectNotFound)?;
        if slots[session.slot].keys[key_index].private && !session.logged_in {
            return Err(DeviceError::UserNotLoggedIn);
        }

        session.active = Some(ActiveOperation {
            kind,
            key_index,
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
        let mut state = self.lock()?;
        let State {
            slots, sessions, ..
        } = &mut *state;
        let session = sessions
            .get_mut(&session.0)
            .ok_or(DeviceError::SessionHandleInvalid)?;
        let active = session
            .active
            .as_mut()
            .filter(|op| op.kind == kind)
            .ok_or(DeviceError::OperationNotInitialized)?;

        let cached_for_input = matches!(&active.cached, Some((cached_input, _)) if cached_input == input);
        if !cached_for_input {
            let key = &slots[session.slot].keys[active.key_index].key;
            let computed = match kind {
                OperationKind::Sign => key.sign(Pkcs1v15Sign::new_unprefixed(), input),
                OperationKind::Decrypt => key.decrypt(Pkcs1v15Encrypt, input),
            };
            match computed {
                Ok(result) => active.cached = Some((input.to_vec(), result)),
                Err(e) => {
                    // A failed operation is finished
                    session.active = None;
                    return Err(DeviceError::Failed {
                        reason: e.to_string(),
                    });
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

        if let Some((_, result)) = session.active.take().and_then(|op| op.cached) {
            buffer[..result.len()].copy_from_slice(&result);
        }
        Ok(required)
    }
}

impl PrivateKeyOps for SoftToken {
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
