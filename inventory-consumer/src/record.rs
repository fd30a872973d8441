//! Turning queue message bodies into store records.
use std::str::FromStr;

use inventory_common::message::StoreRecord;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::MessageError;

/// Namespace of the name-based ids assigned by [`IdStrategy::Content`].
pub const CONTENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_3a9e_52d4_4b7f_9a0e_3d2c_8b41_77e5);

/// How a store record id is chosen for a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdStrategy {
    /// A new random id for every write. Redelivered messages are stored again under a new id.
    #[default]
    Random,
    /// An id derived from the message body, so redelivered messages replace their earlier write.
    /// Distinct rows with identical content also share an id, and only the last one is kept.
    Content,
}

impl IdStrategy {
    pub fn id_for(&self, body: &str) -> Uuid {
        match self {
            IdStrategy::Random => Uuid::new_v4(),
            IdStrategy::Content => Uuid::new_v5(&CONTENT_ID_NAMESPACE, body.as_bytes()),
        }
    }
}

impl FromStr for IdStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(IdStrategy::Random),
            "content" => Ok(IdStrategy::Content),
            other => Err(format!("unknown id strategy {other}, expected random or content")),
        }
    }
}

/// The fields of an inventory update, as carried by a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryUpdate {
    pub product_id: String,
    pub location: String,
    pub quantity: i64,
    pub update_date: String,
}

impl InventoryUpdate {
    /// Parse a message body. Keys may be snake_case or camelCase; a `null` value counts as
    /// missing. `quantity` may be a JSON integer or a string holding one.
    pub fn from_body(body: &str) -> Result<Self, MessageError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| MessageError::Malformed(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(MessageError::Malformed(format!(
                "expected a JSON object, got {}",
                kind(&value)
            )));
        };

        Ok(Self {
            product_id: text_field(&fields, "product_id", &["product_id", "productId"])?,
            location: text_field(&fields, "location", &["location"])?,
            quantity: quantity_field(&fields)?,
            update_date: text_field(&fields, "update_date", &["update_date", "updateDate"])?,
        })
    }

    pub fn into_record(self, id: Uuid) -> StoreRecord {
        StoreRecord {
            id,
            product_id: self.product_id,
            location: self.location,
            quantity: self.quantity,
            update_date: self.update_date,
        }
    }
}

fn lookup<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !value.is_null())
}

fn text_field(
    fields: &Map<String, Value>,
    name: &'static str,
    keys: &[&str],
) -> Result<String, MessageError> {
    match lookup(fields, keys) {
        None => Err(MessageError::MissingField(name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(other) => Err(MessageError::Malformed(format!(
            "{name} must be a scalar, got {}",
            kind(other)
        ))),
    }
}

fn quantity_field(fields: &Map<String, Value>) -> Result<i64, MessageError> {
    let invalid = |shown: &dyn std::fmt::Display| {
        MessageError::Malformed(format!("quantity {shown} is not an integer"))
    };

    match lookup(fields, &["quantity"]) {
        None => Err(MessageError::MissingField("quantity")),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| invalid(n)),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid(&format!("{s:?}"))),
        Some(other) => Err(invalid(other)),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
