//! Token identity used to match locators against present tokens

use crate::model::LocatorInfo;

/// Token identity as reported in the provider's token info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenProfile {
    pub label: String,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
}

impl TokenProfile {
    /// Profile of a software token with the given label and serial
    pub fn new(label: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            manufacturer: "tokenkey".to_string(),
            model: "SoftToken".to_string(),
            serial: serial.into(),
        }
    }

    /// Whether every token attribute the locator names equals this token's
    pub fn matches(&self, locator: &LocatorInfo) -> bool {
        [
            (&locator.token, &self.label),
            (&locator.manufacturer, &self.manufacturer),
            (&locator.model, &self.model),
            (&locator.serial, &self.serial),
        ]
        .into_iter()
        .all(|(wanted, actual)| wanted.as_ref().map_or(true, |w| w == actual))
    }
}
