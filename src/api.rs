use std::sync::Arc;

use crate::adapters::{Pkcs11UriService, RustCryptoDigest};
use crate::domain::TokenKey;
use crate::error::TokenKeyResult;
use crate::ports::{TokenDevice, TokenNotifier};
use crate::use_cases::{
    decrypt_once as decrypt_once_use_case, open_key as open_key_use_case,
    sign_once as sign_once_use_case, KeyServices,
};

pub use crate::model::*;

/// PKCS#11 URI parsing and RustCrypto hashing, with no notifier
pub fn default_services() -> KeyServices {
    KeyServices {
        locators: Arc::new(Pkcs11UriService),
        digests: Arc::new(RustCryptoDigest),
        notifier: None,
    }
}

/// An empty key handle on `device` using the default collaborators
pub fn new_key<D: TokenDevice + ?Sized>(device: Arc<D>) -> TokenKey<D> {
    let services = default_services();
    TokenKey::new(device, services.locators, services.digests)
}

pub fn open_key<D: TokenDevice + ?Sized>(device: Arc<D>, url: &str) -> TokenKeyResult<TokenKey<D>> {
    open_key_use_case(device, &default_services(), url, KeyOptions::default())
}

pub fn open_key_with_notifier<D: TokenDevice + ?Sized>(
    device: Arc<D>,
    url: &str,
    notifier: Arc<dyn TokenNotifier>,
    options: KeyOptions,
) -> TokenKeyResult<TokenKey<D>> {
    let services = KeyServices {
        notifier: Some(notifier),
        ..default_services()
    };
    open_key_use_case(device, &services, url, options)
}

pub fn sign_once<D: TokenDevice + ?Sized>(
    device: Arc<D>,
    url: &str,
    data: &[u8],
    hash: HashAlgorithm,
) -> TokenKeyResult<Vec<u8>> {
    sign_once_use_case(device, &default_services(), url, data, hash)
}

pub fn decrypt_once<D: TokenDevice + ?Sized>(
    device: Arc<D>,
    url: &str,
    ciphertext: &[u8],
) -> TokenKeyResult<Vec<u8>> {
    decrypt_once_use_case(device, &default_services(), url, ciphertext)
}
