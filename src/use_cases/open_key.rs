//! Open key use case
//!
//! Builds a [`TokenKey`] with its collaborators and binds it to the object
//! named by a locator.

use std::sync::Arc;

use crate::domain::TokenKey;
use crate::error::TokenKeyResult;
use crate::model::KeyOptions;
use crate::ports::{DigestEngine, LocatorService, TokenDevice, TokenNotifier};

/// Collaborators shared by every key opened through the use cases
#[derive(Clone)]
pub struct KeyServices {
    pub locators: Arc<dyn LocatorService + Send + Sync>,
    pub digests: Arc<dyn DigestEngine + Send + Sync>,
    pub notifier: Option<Arc<dyn TokenNotifier>>,
}

/// Create a key handle on `device` and import `url` into it
///
/// # Errors
///
/// Returns `TokenKeyError::Import` if the locator is malformed, names no
/// object id, or matches no private key object.
pub fn open_key<D>(
    device: Arc<D>,
    services: &KeyServices,
    url: &str,
    options: KeyOptions,
) -> TokenKeyResult<TokenKey<D>>
where
    D: TokenDevice + ?Sized,
{
    let mut key = TokenKey::new(
        device,
        Arc::clone(&services.locators),
        Arc::clone(&services.digests),
    );
    if let Some(notifier) = &services.notifier {
        key = key.with_notifier(Arc::clone(notifier));
    }

    key.import_url_with_options(url, options)?;
    Ok(key)
}
