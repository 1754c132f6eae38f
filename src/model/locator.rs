//! Structured key locator
//!
//! A locator names one object on one token. It is produced from text by a
//! [`LocatorService`](crate::ports::LocatorService) and is the only thing
//! needed to find the object again after the token has been reinserted.

use std::fmt;

use thiserror::Error;

/// Object class named by a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    PrivateKey,
    PublicKey,
    Certificate,
    SecretKey,
    Data,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::PrivateKey => "private",
            ObjectKind::PublicKey => "public",
            ObjectKind::Certificate => "cert",
            ObjectKind::SecretKey => "secret-key",
            ObjectKind::Data => "data",
        }
    }

    pub fn from_attribute(value: &str) -> Result<Self, LocatorError> {
        match value {
            "private" => Ok(ObjectKind::PrivateKey),
            "public" => Ok(ObjectKind::PublicKey),
            "cert" => Ok(ObjectKind::Certificate),
            "secret-key" => Ok(ObjectKind::SecretKey),
            "data" => Ok(ObjectKind::Data),
            other => Err(LocatorError::InvalidValue {
                attribute: "type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token and object attributes identifying one key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorInfo {
    /// Token label
    pub token: Option<String>,
    /// Token manufacturer id
    pub manufacturer: Option<String>,
    /// Token model
    pub model: Option<String>,
    /// Token serial number
    pub serial: Option<String>,
    /// Object label
    pub object: Option<String>,
    /// Object class
    pub kind: Option<ObjectKind>,
    /// Object id (CKA_ID); empty when the locator names no id
    pub id: Vec<u8>,
}

impl LocatorInfo {
    pub fn has_object_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }

    /// Label shown to a person when the token has to be reinserted
    ///
    /// Falls back from the object label to the token label to the hex id.
    pub fn display_label(&self) -> String {
        self.object
            .clone()
            .or_else(|| self.token.clone())
            .unwrap_or_else(|| self.id_hex())
    }

    /// Read one piece of information about the located object
    pub fn info(&self, kind: InfoKind) -> Option<String> {
        match kind {
            InfoKind::Label => self.object.clone(),
            InfoKind::IdHex => self.has_object_id().then(|| self.id_hex()),
            InfoKind::TokenLabel => self.token.clone(),
            InfoKind::TokenSerial => self.serial.clone(),
            InfoKind::TokenManufacturer => self.manufacturer.clone(),
            InfoKind::TokenModel => self.model.clone(),
        }
    }
}

/// Information that can be read from a key handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKind {
    Label,
    IdHex,
    TokenLabel,
    TokenSerial,
    TokenManufacturer,
    TokenModel,
}

/// Errors produced while converting locators to or from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Locator must start with '{expected}'")]
    MissingScheme { expected: &'static str },

    #[error("Locator attribute is not of the form name=value: {component}")]
    InvalidComponent { component: String },

    #[error("Locator attribute '{attribute}' appears more than once")]
    DuplicateAttribute { attribute: String },

    #[error("Invalid value for locator attribute '{attribute}': {value}")]
    InvalidValue { attribute: String, value: String },

    #[error("Invalid percent-encoding in locator attribute '{attribute}'")]
    InvalidEncoding { attribute: String },

    #[error("Locator does not name an object id")]
    Incomplete,
}
