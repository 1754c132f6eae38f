//! PKCS#11 URI locator service (RFC 7512)
//!
//! Only the path attributes that identify a token and an object are
//! understood. Unknown path attributes and the whole query component are
//! ignored, so URIs carrying `pin-source` or library attributes still parse.

use std::collections::HashSet;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use crate::model::{LocatorError, LocatorInfo, ObjectKind};
use crate::ports::LocatorService;

const SCHEME: &str = "pkcs11:";

/// Characters left unescaped in attribute values (RFC 3986 unreserved)
const VALUE_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Converts between `pkcs11:` URIs and [`LocatorInfo`] records
#[derive(Debug, Clone, Copy, Default)]
pub struct Pkcs11UriService;

impl LocatorService for Pkcs11UriService {
    fn parse(&self, text: &str) -> Result<LocatorInfo, LocatorError> {
        let rest = text
            .strip_prefix(SCHEME)
            .ok_or(LocatorError::MissingScheme { expected: SCHEME })?;
        let path = rest.split_once('?').map_or(rest, |(path, _query)| path);

        let mut locator = LocatorInfo::default();
        let mut seen = HashSet::new();

        for component in path.split(';').filter(|c| !c.is_empty()) {
            let (name, value) =
                component
                    .split_once('=')
                    .ok_or_else(|| LocatorError::InvalidComponent {
                        component: component.to_string(),
                    })?;

            // "objecttype" predates RFC 7512
            let name = if name == "objecttype" { "type" } else { name };

            if !seen.insert(name) {
                return Err(LocatorError::DuplicateAttribute {
                    attribute: name.to_string(),
                });
            }

            match name {
                "token" => locator.token = Some(decode_text(name, value)?),
                "manufacturer" => locator.manufacturer = Some(decode_text(name, value)?),
                "serial" => locator.serial = Some(decode_text(name, value)?),
                "model" => locator.model = Some(decode_text(name, value)?),
                "object" => locator.object = Some(decode_text(name, value)?),
                "type" => {
                    locator.kind = Some(ObjectKind::from_attribute(&decode_text(name, value)?)?)
                }
                "id" => locator.id = decode_bytes(name, value)?,
                other => debug!("Ignoring PKCS#11 URI attribute '{}'", other),
            }
        }

        Ok(locator)
    }

    fn format(&self, locator: &LocatorInfo) -> Result<String, LocatorError> {
        if !locator.has_object_id() {
            return Err(LocatorError::Incomplete);
        }

        let text_attributes = [
            ("token", locator.token.as_deref()),
            ("manufacturer", locator.manufacturer.as_deref()),
            ("serial", locator.serial.as_deref()),
            ("model", locator.model.as_deref()),
            ("object", locator.object.as_deref()),
            ("type", locator.kind.map(ObjectKind::as_str)),
        ];

        let mut attributes: Vec<String> = text_attributes
            .into_iter()
            .filter_map(|(name, value)| {
                value.map(|v| format!("{}={}", name, utf8_percent_encode(v, VALUE_ESCAPE)))
            })
            .collect();

        let id: String = locator.id.iter().map(|b| format!("%{:02x}", b)).collect();
        attributes.push(format!("id={}", id));

        Ok(format!("{}{}", SCHEME, attributes.join(";")))
    }
}

/// Reject '%' not followed by two hex digits; the decoder passes those through
fn check_escapes(attribute: &str, value: &str) -> Result<(), LocatorError> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(LocatorError::InvalidEncoding {
                    attribute: attribute.to_string(),
                });
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

fn decode_bytes(attribute: &str, value: &str) -> Result<Vec<u8>, LocatorError> {
    check_escapes(attribute, value)?;
    Ok(percent_decode_str(value).collect())
}

fn decode_text(attribute: &str, value: &str) -> Result<String, LocatorError> {
    check_escapes(attribute, value)?;
    percent_decode_str(value)
        .decode_utf8()
        .map(|text| text.into_owned())
        .map_err(|_| LocatorError::InvalidEncoding {
            attribute: attribute.to_string(),
        })
}
