//! Per-recipient template context.
//!
//! Every serialized field of the recipient is available at the top level
//! and again under `Recepient`. Campaign parameters live under `Params`,
//! which recipient data can never replace.

use serde::ser::Error as _;
use serde_json::{Map, Value};

use crate::recipient::RecipientRecord;

/// Key holding the campaign parameters.
pub const PARAMS_KEY: &str = "Params";

/// Key holding the recipient's own fields.
pub const RECIPIENT_KEY: &str = "Recepient";

/// Build the context for one recipient.
///
/// # Errors
///
/// Returns an error if the recipient can't be represented as a JSON object.
pub fn build_context(
    recipient: &RecipientRecord,
    params: &Map<String, Value>,
) -> Result<Map<String, Value>, serde_json::Error> {
    let Value::Object(fields) = serde_json::to_value(recipient)? else {
        return Err(serde_json::Error::custom(
            "recipient did not serialize to an object",
        ));
    };

    let mut context = Map::with_capacity(fields.len() + 2);
    for (key, value) in &fields {
        if key == PARAMS_KEY || key == RECIPIENT_KEY {
            tracing::warn!(
                recipient = %recipient.email,
                attribute = %key,
                "Recipient attribute shadows a reserved context key, it is only available under {RECIPIENT_KEY}"
            );
            continue;
        }
        context.insert(key.clone(), value.clone());
    }

    context.insert(RECIPIENT_KEY.to_string(), Value::Object(fields));
    context.insert(PARAMS_KEY.to_string(), Value::Object(params.clone()));

    Ok(context)
}
