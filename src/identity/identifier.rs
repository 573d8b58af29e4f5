use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use super::IdentityError;

lazy_static! {
    /// Kenyan mobile numbers: 07XXXXXXXX, 01XXXXXXXX, 2547XXXXXXXX, +2547XXXXXXXX
    static ref PHONE_REGEX: Regex = Regex::new(r"^(?:\+?254|0)?(?:7|1)\d{8}$").unwrap();
}

const ADMISSION_PREFIX: &str = "ADM";

/// A raw login identifier classified by its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// Student admission number, uppercased (e.g. `ADM-2024-001`)
    AdmissionNumber(String),
    /// Phone number normalized to `254XXXXXXXXX`
    Phone(String),
    /// Staff number, email or name fragment, trimmed
    Staff(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    AdmissionNumber,
    Phone,
    Staff,
}

impl Identifier {
    pub fn classify(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::EmptyIdentifier);
        }

        let upper = trimmed.to_uppercase();
        if upper.starts_with(ADMISSION_PREFIX) {
            return Ok(Identifier::AdmissionNumber(upper));
        }

        if let Some(phone) = normalize_phone(trimmed) {
            return Ok(Identifier::Phone(phone));
        }

        Ok(Identifier::Staff(trimmed.to_string()))
    }

    pub fn kind(&self) -> IdentifierKind {
        match self {
            Identifier::AdmissionNumber(_) => IdentifierKind::AdmissionNumber,
            Identifier::Phone(_) => IdentifierKind::Phone,
            Identifier::Staff(_) => IdentifierKind::Staff,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Identifier::AdmissionNumber(v) | Identifier::Phone(v) | Identifier::Staff(v) => v,
        }
    }
}

/// Normalize a phone number to the `254XXXXXXXXX` form, or `None` if the
/// input is not phone-shaped.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    if !PHONE_REGEX.is_match(&compact) {
        return None;
    }

    let digits = compact.trim_start_matches('+');
    let local = if let Some(rest) = digits.strip_prefix("254") {
        rest
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest
    } else {
        digits
    };

    Some(format!("254{}", local))
}
