//! LocatorService trait - conversion between locator text and records

use crate::model::{LocatorError, LocatorInfo};

/// Capability to parse and format key locators
///
/// The text form is opaque to the rest of the crate; only implementations
/// of this trait look inside it.
pub trait LocatorService {
    /// Parse locator text into a structured record
    ///
    /// # Errors
    ///
    /// Returns a `LocatorError` describing the first malformed component
    fn parse(&self, text: &str) -> Result<LocatorInfo, LocatorError>;

    /// Format a structured record back into locator text
    ///
    /// # Errors
    ///
    /// Returns `LocatorError::Incomplete` if the record names no object id
    fn format(&self, locator: &LocatorInfo) -> Result<String, LocatorError>;
}
