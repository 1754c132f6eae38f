//! Private key operations on PKCS#11 tokens
//!
//! A [`TokenKey`] names a private key object on a token, signs and decrypts
//! with it, and recovers from the token being pulled out mid-operation by
//! asking a [`TokenNotifier`](ports::TokenNotifier) whether to wait for it.
//!
//! The crate follows a ports-and-adapters layout: `ports` holds the traits
//! the core is written against, `adapters` the concrete drivers and codecs.

pub mod adapters;
pub mod api;
pub mod domain;
pub mod error;
pub mod logic;
pub mod model;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use domain::{KeyState, TokenKey};
pub use error::*;

// Re-export public API
pub use api::{decrypt_once, new_key, open_key, open_key_with_notifier, sign_once};
