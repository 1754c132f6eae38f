//! Use cases (orchestration)
//!
//! Workflows built from a token device and the default collaborators.

mod one_shot;
mod open_key;

pub use one_shot::{decrypt_once, sign_once};
pub use open_key::{open_key, KeyServices};
