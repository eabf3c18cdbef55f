//! Command types, per-command payload and response shapes, and the
//! envelope serialization helpers.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::error::CodecError;

/// The command tag carried in the envelope's `type` field.
///
/// Tags outside the known set deserialize to [`CommandType::Unknown`]; the
/// handler answers those with a structured error response instead of the
/// transport rejecting the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    AddItem,
    DeleteItem,
    GetItem,
    GetAllItems,
    Unknown,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::AddItem => "addItem",
            CommandType::DeleteItem => "deleteItem",
            CommandType::GetItem => "getItem",
            CommandType::GetAllItems => "getAllItems",
            CommandType::Unknown => "unknown",
        }
    }

    fn from_tag(tag: &str) -> Self {
        match tag {
            "addItem" => CommandType::AddItem,
            "deleteItem" => CommandType::DeleteItem,
            "getItem" => CommandType::GetItem,
            "getAllItems" => CommandType::GetAllItems,
            _ => CommandType::Unknown,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CommandType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommandType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(CommandType::from_tag(&tag))
    }
}

/// Wire envelope: `{"type": ..., "payload": ...}`.
///
/// The payload stays raw JSON until the receiver has dispatched on the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub payload: Box<RawValue>,
}

impl CommandEnvelope {
    /// Builds an envelope from a typed payload.
    pub fn new<T: Serialize>(
        command_type: CommandType,
        payload: &T,
    ) -> Result<Self, CodecError> {
        let payload = serde_json::value::to_raw_value(payload)?;
        Ok(Self {
            command_type,
            payload,
        })
    }

    /// Serializes the envelope to its wire form.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes the raw payload into a typed request.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(serde_json::from_str(self.payload.get())?)
    }
}

// Request payloads.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItemRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteItemRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetItemRequest {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllItemsRequest {}

// Response shapes.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItemResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteItemResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetItemResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllItemsResponse {
    pub success: bool,
    #[serde(default)]
    pub items: Vec<KeyValuePair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Envelope returned for requests the handler cannot interpret (malformed
/// payloads, unknown tags).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Serializes a typed payload into the full envelope wire form.
pub fn serialize_command<T: Serialize>(
    command_type: CommandType,
    payload: &T,
) -> Result<String, CodecError> {
    CommandEnvelope::new(command_type, payload)?.to_json()
}

/// Parses an envelope, leaving the payload raw.
pub fn deserialize_envelope(raw: &str) -> Result<CommandEnvelope, CodecError> {
    Ok(serde_json::from_str(raw)?)
}

/// Parses an envelope and decodes its payload into `T`, returning the tag.
pub fn deserialize_command<T: DeserializeOwned>(
    raw: &str,
) -> Result<(CommandType, T), CodecError> {
    let envelope = deserialize_envelope(raw)?;
    let payload = envelope.decode_payload()?;
    Ok((envelope.command_type, payload))
}

pub fn serialize_response<T: Serialize>(response: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(response)?)
}

pub fn deserialize_response<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(raw)?)
}
