//! Adapters - concrete implementations of ports (traits)

mod cryptoki_token;
mod pkcs11_uri;
mod rustcrypto_digest;
mod soft_token;
mod token_profile;

#[cfg(test)]
pub(crate) mod mock_token;

// Re-export for convenience
pub use cryptoki_token::CryptokiToken;
pub use pkcs11_uri::Pkcs11UriService;
pub use rustcrypto_digest::RustCryptoDigest;
pub use soft_token::{SoftKey, SoftToken};
pub use token_profile::TokenProfile;
