//! JSON control payloads carried in the first segment of every frame.
//!
//! The `type` field selects the variant. Unknown fields are ignored so
//! newer senders can add keys without breaking older receivers; a
//! missing or unrecognized `type` is a [`FrameError::Validation`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::constants::MessageType;
use crate::error::FrameError;

/// Closed set of control payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Payload {
    SendImage(SendImagePayload),
    GetImage(GetImagePayload),
    DocumentSync(DocumentSyncPayload),
}

/// Pushes generated images into a document layer.
///
/// Pairs with one PNG attachment per image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendImagePayload {
    #[serde(rename = "krita_document")]
    pub document_id: String,
    /// `/`-delimited layer path.
    #[serde(rename = "krita_layer")]
    pub layer: String,
    #[serde(rename = "run_uuid")]
    pub run_id: String,
    /// Join the document's most recent run instead of opening `run_id`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub append_to_previous_run: bool,
}

/// Asks for (or, with one PNG attached, answers with) a layer's pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetImagePayload {
    #[serde(rename = "krita_document")]
    pub document_id: String,
    #[serde(rename = "krita_layer")]
    pub layer: String,
    /// Correlates the reply (or the temp file) with the request.
    pub filename_prefix: String,
}

/// Full document set currently open on the sending side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSyncPayload {
    #[serde(alias = "document_map")]
    pub document_list: Vec<DocumentRef>,
}

/// `(document id, display name)` pair, serialized as a two-element array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef(pub String, pub String);

impl DocumentRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self(id.into(), name.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn name(&self) -> &str {
        &self.1
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl SendImagePayload {
    pub fn new(
        document_id: impl Into<String>,
        layer: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            layer: layer.into(),
            run_id: run_id.into(),
            append_to_previous_run: false,
        }
    }

    /// Marks the images as a continuation of the previous run.
    pub fn appending(mut self) -> Self {
        self.append_to_previous_run = true;
        self
    }
}

impl GetImagePayload {
    pub fn new(
        document_id: impl Into<String>,
        layer: impl Into<String>,
        filename_prefix: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            layer: layer.into(),
            filename_prefix: filename_prefix.into(),
        }
    }
}

impl DocumentSyncPayload {
    pub fn new(document_list: Vec<DocumentRef>) -> Self {
        Self { document_list }
    }
}

impl From<SendImagePayload> for Payload {
    fn from(p: SendImagePayload) -> Self {
        Payload::SendImage(p)
    }
}

impl From<GetImagePayload> for Payload {
    fn from(p: GetImagePayload) -> Self {
        Payload::GetImage(p)
    }
}

impl From<DocumentSyncPayload> for Payload {
    fn from(p: DocumentSyncPayload) -> Self {
        Payload::DocumentSync(p)
    }
}

impl Payload {
    /// Returns the discriminant of this payload.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::SendImage(_) => MessageType::SendImage,
            Payload::GetImage(_) => MessageType::GetImage,
            Payload::DocumentSync(_) => MessageType::DocumentSync,
        }
    }

    /// Serializes to compact JSON with the `type` tag set.
    pub fn to_json(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses JSON text into the matching variant.
    pub fn from_json(json: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Dispatches on the `type` field of an already-parsed JSON value.
    ///
    /// The tag may be the variant name or the integer code written by
    /// the first encoder revision.
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let tag = value
            .get("type")
            .ok_or_else(|| FrameError::validation("missing 'type' field"))?;

        let msg_type = match tag {
            Value::String(s) => MessageType::from_tag(s),
            Value::Number(n) => n.as_u64().and_then(MessageType::from_legacy_code),
            _ => None,
        }
        .ok_or_else(|| FrameError::validation(format!("unsupported 'type' value: {tag}")))?;

        let payload = match msg_type {
            MessageType::SendImage => Payload::SendImage(serde_json::from_value(value)?),
            MessageType::GetImage => Payload::GetImage(serde_json::from_value(value)?),
            MessageType::DocumentSync => Payload::DocumentSync(serde_json::from_value(value)?),
        };
        Ok(payload)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Payload::from_value(value).map_err(serde::de::Error::custom)
    }
}
