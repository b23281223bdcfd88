//! Recipient records as they appear in a campaign list.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// One addressee and everything known about them.
///
/// Fields beyond the well known ones are kept in `attributes` and end up in
/// the template context next to the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub email: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub newsletter: String,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub confirmed: bool,

    #[serde(default)]
    pub unsubscribed: bool,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl RecipientRecord {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Parse a JSON array of recipient records.
///
/// # Errors
///
/// Returns an error if the document isn't an array of records, or if any
/// record has an empty email address.
pub fn parse_recipients(json: &str) -> Result<Vec<RecipientRecord>, ConfigError> {
    let recipients: Vec<RecipientRecord> =
        serde_json::from_str(json).map_err(ConfigError::RecipientList)?;

    if let Some(position) = recipients
        .iter()
        .position(|recipient| recipient.email.trim().is_empty())
    {
        return Err(ConfigError::InvalidRecipient {
            position,
            reason: "email address is empty".to_string(),
        });
    }

    tracing::info!(count = recipients.len(), "Parsed recipient list");

    Ok(recipients)
}
