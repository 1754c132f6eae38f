//! Scripted token driver for tests
//!
//! `MockTokenDevice` keeps objects and sessions in memory, counts every call
//! it receives, and can be told to fail a specific upcoming call. Tokens can
//! be pulled and reinserted from a notifier to drive recovery scenarios.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::DeviceError;
use crate::model::{KeyAlgorithm, LocatorInfo, LoginMode, Mechanism, ObjectHandle, SessionId};
use crate::ports::{Discovered, ObjectFinder, PrivateKeyOps, SlotScanner};

pub(crate) use crate::ports::contract_tests::token_device_contract::{
    KEY_ID as RSA_ID, KEY_LABEL as RSA_LABEL, TOKEN_LABEL,
};

pub const DSA_LABEL: &str = "dsa key";
pub const DSA_ID: &[u8] = &[0x0d, 0x01];
pub const EC_LABEL: &str = "ec key";
pub const EC_ID: &[u8] = &[0x0e, 0x01];

/// Signature length reported by the mock for every key
pub const SIGNATURE_LEN: usize = 64;

/// Extra bytes the decrypt size query over-reports
pub const DECRYPT_SLACK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Rescan,
    Find,
    Close,
    SignInit,
    SignSize,
    SignFinal,
    DecryptInit,
    DecryptSize,
    DecryptFinal,
}

#[derive(Debug, Clone)]
pub struct MockObject {
    pub label: String,
    pub id: Vec<u8>,
    pub algorithm: KeyAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Sign(ObjectHandle),
    Decrypt,
}

#[derive(Debug, Default)]
struct MockState {
    objects: Vec<MockObject>,
    present: bool,
    sessions: HashMap<u64, Option<Active>>,
    next_session: u64,
    faults: Vec<(MockCall, DeviceError)>,
    calls: HashMap<MockCall, u32>,
    last_mechanism: Option<Mechanism>,
    last_sign_input: Option<Vec<u8>>,
    last_login: Option<LoginMode>,
}

#[derive(Debug)]
pub struct MockTokenDevice {
    state: Mutex<MockState>,
}

impl Default for MockTokenDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTokenDevice {
    /// A present token holding an RSA, a DSA and an EC key
    pub fn new() -> Self {
        let objects = vec![
            MockObject {
                label: RSA_LABEL.to_string(),
                id: RSA_ID.to_vec(),
                algorithm: KeyAlgorithm::Rsa,
            },
            MockObject {
                label: DSA_LABEL.to_string(),
                id: DSA_ID.to_vec(),
                algorithm: KeyAlgorithm::Dsa,
            },
            MockObject {
                label: EC_LABEL.to_string(),
                id: EC_ID.to_vec(),
                algorithm: KeyAlgorithm::Ec,
            },
        ];
        Self {
            state: Mutex::new(MockState {
                objects,
                present: true,
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Fail the next `call` with `error`; queued faults fire in order
    pub fn fail_next(&self, call: MockCall, error: DeviceError) {
        self.state().faults.push((call, error));
    }

    /// Simulate pulling the token: sessions vanish and searches find nothing
    pub fn remove_token(&self) {
        let mut state = self.state();
        state.present = false;
        state.sessions.clear();
    }

    pub fn insert_token(&self) {
        self.state().present = true;
    }

    /// Change the algorithm the token reports for an object
    pub fn set_algorithm(&self, id: &[u8], algorithm: KeyAlgorithm) {
        let mut state = self.state();
        if let Some(object) = state.objects.iter_mut().find(|o| o.id == id) {
            object.algorithm = algorithm;
        }
    }

    pub fn calls(&self, call: MockCall) -> u32 {
        self.state().calls.get(&call).copied().unwrap_or(0)
    }

    /// Total number of calls of any kind
    pub fn total_calls(&self) -> u32 {
        self.state().calls.values().sum()
    }

    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn last_mechanism(&self) -> Option<Mechanism> {
        self.state().last_mechanism
    }

    pub fn last_login(&self) -> Option<LoginMode> {
        self.state().last_login
    }

    pub fn last_sign_input(&self) -> Option<Vec<u8>> {
        self.state().last_sign_input.clone()
    }

    /// Signature the mock produces for `input`
    pub fn expected_signature(input: &[u8]) -> Vec<u8> {
        (0..SIGNATURE_LEN)
            .map(|i| input.get(i % input.len().max(1)).copied().unwrap_or(0) ^ 0xff)
            .collect()
    }

    /// Plaintext the mock produces for `ciphertext`
    pub fn expected_plaintext(ciphertext: &[u8]) -> Vec<u8> {
        ciphertext.iter().rev().copied().collect()
    }
}

impl MockState {
    /// Count the call and return the scripted fault for it, if any
    fn enter(&mut self, call: MockCall) -> Result<(), DeviceError> {
        *self.calls.entry(call).or_insert(0) += 1;
        match self.faults.iter().position(|(c, _)| *c == call) {
            Some(index) => Err(self.faults.remove(index).1),
            None => Ok(()),
        }
    }

    fn session(&mut self, session: SessionId) -> Result<&mut Option<Active>, DeviceError> {
        self.sessions
            .get_mut(&session.0)
            .ok_or(DeviceError::SessionHandleInvalid)
    }
}

impl SlotScanner for MockTokenDevice {
    fn rescan_slots(&self) -> Result<(), DeviceError> {
        self.state().enter(MockCall::Rescan)
    }
}

impl ObjectFinder for MockTokenDevice {
    fn open_and_find_object(
        &self,
        locator: &LocatorInfo,
        login: LoginMode,
    ) -> Result<Discovered, DeviceError> {
        let mut state = self.state();
        state.enter(MockCall::Find)?;

        if !state.present || locator.token.as_deref().is_some_and(|t| t != TOKEN_LABEL) {
            return Err(DeviceError::ObjectNotFound);
        }
        let (index, object) = state
            .objects
            .iter()
            .enumerate()
            .find(|(_, o)| {
                o.id == locator.id && locator.object.as_ref().map_or(true, |l| *l == o.label)
            })
            .ok_or(DeviceError::ObjectNotFound)?;
        let algorithm = object.algorithm;

        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(id, None);
        state.last_login = Some(login);

        Ok(Discovered {
            session: SessionId(id),
            object: ObjectHandle(index as u64 + 1),
            algorithm,
        })
    }

    fn close_session(&self, session: SessionId) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.enter(MockCall::Close)?;
        state
            .sessions
            .remove(&session.0)
            .map(|_| ())
            .ok_or(DeviceError::SessionHandleInvalid)
    }
}

impl PrivateKeyOps for MockTokenDevice {
    fn sign_init(
        &self,
        session: SessionId,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.enter(MockCall::SignInit)?;
        state.last_mechanism = Some(mechanism);
        *state.session(session)? = Some(Active::Sign(key));
        Ok(())
    }

    fn sign(
        &self,
        session: SessionId,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> Result<usize, DeviceError> {
        let mut state = self.state();
        let call = if output.is_some() {
            MockCall::SignFinal
        } else {
            MockCall::SignSize
        };
        state.enter(call)?;

        let active = state.session(session)?;
        if !matches!(active, Some(Active::Sign(_))) {
            return Err(DeviceError::OperationNotInitialized);
        }
        let Some(buffer) = output else {
            return Ok(SIGNATURE_LEN);
        };
        if buffer.len() < SIGNATURE_LEN {
            return Err(DeviceError::BufferTooSmall {
                required: SIGNATURE_LEN,
            });
        }

        *active = None;
        buffer[..SIGNATURE_LEN].copy_from_slice(&Self::expected_signature(input));
        state.last_sign_input = Some(input.to_vec());
        Ok(SIGNATURE_LEN)
    }

    fn decrypt_init(
        &self,
        session: SessionId,
        mechanism: Mechanism,
        _key: ObjectHandle,
    ) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.enter(MockCall::DecryptInit)?;
        state.last_mechanism = Some(mechanism);
        *state.session(session)? = Some(Active::Decrypt);
        Ok(())
    }

    fn decrypt(
        &self,
        session: SessionId,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> Result<usize, DeviceError> {
        let mut state = self.state();
        let call = if output.is_some() {
            MockCall::DecryptFinal
        } else {
            MockCall::DecryptSize
        };
        state.enter(call)?;

        let active = state.session(session)?;
        if *active != Some(Active::Decrypt) {
            return Err(DeviceError::OperationNotInitialized);
        }
        let Some(buffer) = output else {
            return Ok(input.len() + DECRYPT_SLACK);
        };
        if buffer.len() < input.len() {
            return Err(DeviceError::BufferTooSmall {
                required: input.len() + DECRYPT_SLACK,
            });
        }

        *active = None;
        buffer[..input.len()].copy_from_slice(&Self::expected_plaintext(input));
        Ok(input.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_tests_for;
    use crate::ports::contract_tests::token_device_contract;

    contract_tests_for!(
        mock_token_contract,
        make = MockTokenDevice::new,
        tests = {
            test_find_and_close => token_device_contract::test_find_and_close,
            test_missing_object_not_found => token_device_contract::test_missing_object_not_found,
            test_two_phase_sign => token_device_contract::test_two_phase_sign,
            test_sign_buffer_too_small_keeps_operation => token_device_contract::test_sign_buffer_too_small_keeps_operation,
            test_sign_without_init => token_device_contract::test_sign_without_init,
            test_closed_session_is_invalid => token_device_contract::test_closed_session_is_invalid,
        }
    );

    fn rsa_locator() -> LocatorInfo {
        LocatorInfo {
            id: RSA_ID.to_vec(),
            ..LocatorInfo::default()
        }
    }

    #[test]
    fn test_scripted_fault_fires_once() {
        let device = MockTokenDevice::new();
        device.fail_next(MockCall::Find, DeviceError::DeviceRemoved);

        assert_eq!(
            device
                .open_and_find_object(&rsa_locator(), LoginMode::User)
                .unwrap_err(),
            DeviceError::DeviceRemoved
        );
        assert!(device
            .open_and_find_object(&rsa_locator(), LoginMode::User)
            .is_ok());
        assert_eq!(device.calls(MockCall::Find), 2);
    }

    #[test]
    fn test_removed_token_drops_sessions() {
        let device = MockTokenDevice::new();
        let found = device
            .open_and_find_object(&rsa_locator(), LoginMode::User)
            .unwrap();

        device.remove_token();

        assert_eq!(device.open_sessions(), 0);
        assert_eq!(
            device
                .sign_init(found.session, Mechanism::RsaPkcs, found.object)
                .unwrap_err(),
            DeviceError::SessionHandleInvalid
        );
        assert_eq!(
            device
                .open_and_find_object(&rsa_locator(), LoginMode::User)
                .unwrap_err(),
            DeviceError::ObjectNotFound
        );

        device.insert_token();
        assert!(device
            .open_and_find_object(&rsa_locator(), LoginMode::User)
            .is_ok());
    }

    #[test]
    fn test_reports_object_algorithm() {
        let device = MockTokenDevice::new();
        let locator = LocatorInfo {
            id: DSA_ID.to_vec(),
            ..LocatorInfo::default()
        };
        let found = device
            .open_and_find_object(&locator, LoginMode::User)
            .unwrap();
        assert_eq!(found.algorithm, KeyAlgorithm::Dsa);

        device.set_algorithm(DSA_ID, KeyAlgorithm::Ec);
        let found = device
            .open_and_find_object(&locator, LoginMode::User)
            .unwrap();
        assert_eq!(found.algorithm, KeyAlgorithm::Ec);
    }

    #[test]
    fn test_decrypt_size_query_over_reports() {
        let device = MockTokenDevice::new();
        let found = device
            .open_and_find_object(&rsa_locator(), LoginMode::User)
            .unwrap();
        device
            .decrypt_init(found.session, Mechanism::RsaPkcs, found.object)
            .unwrap();

        let required = device.decrypt(found.session, b"abc", None).unwrap();
        let mut buffer = vec![0u8; required];
        let written = device
            .decrypt(found.session, b"abc", Some(&mut buffer))
            .unwrap();

        assert_eq!(required, 3 + DECRYPT_SLACK);
        assert_eq!(&buffer[..written], b"cba");
    }
}
