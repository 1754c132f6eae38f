//! One-shot operations: open a key, use it once, release it

use std::sync::Arc;

use tracing::debug;

use super::open_key::{open_key, KeyServices};
use crate::error::TokenKeyResult;
use crate::model::{HashAlgorithm, KeyOptions};
use crate::ports::TokenDevice;

/// Sign `data` with the key named by `url`
///
/// The session opened for the key is closed before returning, whether or
/// not signing succeeded.
pub fn sign_once<D>(
    device: Arc<D>,
    services: &KeyServices,
    url: &str,
    data: &[u8],
    hash: HashAlgorithm,
) -> TokenKeyResult<Vec<u8>>
where
    D: TokenDevice + ?Sized,
{
    let mut key = open_key(device, services, url, KeyOptions::default())?;
    let signature = key.sign_data(data, hash);
    key.dispose();
    debug!("One-shot signature finished for {}", url);
    Ok(signature?)
}

/// Decrypt `ciphertext` with the key named by `url`
pub fn decrypt_once<D>(
    device: Arc<D>,
    services: &KeyServices,
    url: &str,
    ciphertext: &[u8],
) -> TokenKeyResult<Vec<u8>>
where
    D: TokenDevice + ?Sized,
{
    let mut key = open_key(device, services, url, KeyOptions::default())?;
    let plaintext = key.decrypt(ciphertext);
    key.dispose();
    Ok(plaintext?)
}
