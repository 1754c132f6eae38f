//! Ports (traits) for the collaborators a token key depends on
//!
//! The key handle and the recovery protocol are written against these
//! abstractions only. Concrete drivers, locator codecs and hash engines live
//! in `adapters`.

mod digest_engine;
mod locator_service;
mod notifier;
mod object_finder;
mod private_key_ops;
mod slot_scanner;

pub use digest_engine::DigestEngine;
pub use locator_service::LocatorService;
pub use notifier::{RetryDecision, RetryUpTo, TokenNotifier};
pub use object_finder::{Discovered, ObjectFinder};
pub use private_key_ops::PrivateKeyOps;
pub use slot_scanner::SlotScanner;

/// Combined capability of a token driver
///
/// A driver that can rescan slots, find objects and run private key
/// operations is everything a [`TokenKey`](crate::TokenKey) needs.
pub trait TokenDevice: SlotScanner + ObjectFinder + PrivateKeyOps {}

impl<T> TokenDevice for T where T: SlotScanner + ObjectFinder + PrivateKeyOps {}
