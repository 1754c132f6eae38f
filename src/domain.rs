//! Token key handle and the resources it owns

mod binding;
mod token_key;

pub use token_key::{KeyState, TokenKey};
