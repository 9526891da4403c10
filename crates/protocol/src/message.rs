//! The WRP message model.
//!
//! Field names and the `msg_type` discriminants follow the WRP wire schema.
//! The message type is encoded as its integer discriminant on binary formats
//! and as its canonical name on JSON, which serde distinguishes via
//! [`is_human_readable`](serde::Serializer::is_human_readable).

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Status value carried by an authorization message for an accepted device.
pub const AUTH_STATUS_AUTHORIZED: i64 = 200;

/// Status value carried by an authorization message for a rejected device.
pub const AUTH_STATUS_UNAUTHORIZED: i64 = 401;

/// WRP message types with their wire discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum MessageType {
    Auth = 2,
    SimpleRequestResponse = 3,
    SimpleEvent = 4,
    Create = 5,
    Retrieve = 6,
    Update = 7,
    Delete = 8,
    ServiceRegistration = 9,
    ServiceAlive = 10,
}

impl MessageType {
    /// The canonical name used on JSON and in the `X-Midt-Msg-Type` header.
    pub const fn name(self) -> &'static str {
        match self {
            MessageType::Auth => "Auth",
            MessageType::SimpleRequestResponse => "SimpleRequestResponse",
            MessageType::SimpleEvent => "SimpleEvent",
            MessageType::Create => "Create",
            MessageType::Retrieve => "Retrieve",
            MessageType::Update => "Update",
            MessageType::Delete => "Delete",
            MessageType::ServiceRegistration => "ServiceRegistration",
            MessageType::ServiceAlive => "ServiceAlive",
        }
    }

    /// Looks up a type by its canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Auth" => MessageType::Auth,
            "SimpleRequestResponse" => MessageType::SimpleRequestResponse,
            "SimpleEvent" => MessageType::SimpleEvent,
            "Create" => MessageType::Create,
            "Retrieve" => MessageType::Retrieve,
            "Update" => MessageType::Update,
            "Delete" => MessageType::Delete,
            "ServiceRegistration" => MessageType::ServiceRegistration,
            "ServiceAlive" => MessageType::ServiceAlive,
            _ => return None,
        })
    }

    /// Looks up a type by its wire discriminant.
    pub fn from_wire(value: i64) -> Option<Self> {
        Some(match value {
            2 => MessageType::Auth,
            3 => MessageType::SimpleRequestResponse,
            4 => MessageType::SimpleEvent,
            5 => MessageType::Create,
            6 => MessageType::Retrieve,
            7 => MessageType::Update,
            8 => MessageType::Delete,
            9 => MessageType::ServiceRegistration,
            10 => MessageType::ServiceAlive,
            _ => return None,
        })
    }

    /// The integer discriminant used on binary wire formats.
    pub const fn wire_value(self) -> i64 {
        self as i64
    }

    /// Create, Retrieve, Update, or Delete.
    pub const fn is_crud(self) -> bool {
        matches!(
            self,
            MessageType::Create | MessageType::Retrieve | MessageType::Update | MessageType::Delete
        )
    }

    /// Types that may carry a transaction UUID and participate in
    /// request/response correlation.
    pub const fn supports_transaction(self) -> bool {
        matches!(self, MessageType::SimpleRequestResponse) || self.is_crud()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(self.name())
        } else {
            serializer.serialize_i64(self.wire_value())
        }
    }
}

struct MessageTypeVisitor;

impl Visitor<'_> for MessageTypeVisitor {
    type Value = MessageType;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a WRP message type discriminant or name")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        MessageType::from_wire(value)
            .ok_or_else(|| E::custom(format!("unknown message type {value}")))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        i64::try_from(value)
            .ok()
            .and_then(MessageType::from_wire)
            .ok_or_else(|| E::custom(format!("unknown message type {value}")))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        MessageType::from_name(value)
            .ok_or_else(|| E::custom(format!("unknown message type {value:?}")))
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // deserialize_any so JSON accepts both the canonical name and a
        // bare discriminant.
        deserializer.deserialize_any(MessageTypeVisitor)
    }
}

/// A mandatory field missing for the message's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidMessage {
    #[error("message type {0} requires a source")]
    MissingSource(MessageType),

    #[error("message type {0} requires a transaction UUID")]
    MissingTransactionUuid(MessageType),

    #[error("message type {0} requires a path")]
    MissingPath(MessageType),

    #[error("authorization messages require a status")]
    MissingStatus,
}

/// A WRP message.
///
/// Optional fields are omitted on the wire when unset and default when
/// absent, so a message round-trips unchanged through any [`Format`]
/// (`crate::Format`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    #[serde(rename = "dest", default, skip_serializing_if = "String::is_empty")]
    pub destination: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transaction_uuid: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub accept: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,

    #[serde(rename = "rdr", default, skip_serializing_if = "Option::is_none")]
    pub request_delivery_response: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_spans: Option<bool>,

    /// Span triples of `{name, start, duration}`. Header parsing may leave a
    /// trailing triple partially filled; it is carried as-is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// An empty message of the given type.
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            source: String::new(),
            destination: String::new(),
            transaction_uuid: String::new(),
            content_type: String::new(),
            accept: String::new(),
            status: None,
            request_delivery_response: None,
            include_spans: None,
            spans: Vec::new(),
            headers: Vec::new(),
            path: String::new(),
            payload: Vec::new(),
        }
    }

    /// The authorization status message sent to a device after admission.
    pub fn authorization_status(status: i64) -> Self {
        Self {
            status: Some(status),
            ..Self::new(MessageType::Auth)
        }
    }

    /// Whether this message takes part in request/response correlation:
    /// a transaction-capable type carrying a non-empty transaction UUID.
    pub fn is_transaction_part(&self) -> bool {
        self.msg_type.supports_transaction() && !self.transaction_uuid.is_empty()
    }

    /// The correlation key, when this message is a transaction part.
    pub fn transaction_key(&self) -> Option<&str> {
        if self.is_transaction_part() {
            Some(&self.transaction_uuid)
        } else {
            None
        }
    }

    /// Checks the mandatory-field rules for this message's type.
    pub fn validate(&self) -> Result<(), InvalidMessage> {
        let t = self.msg_type;
        let needs_source =
            matches!(t, MessageType::SimpleRequestResponse | MessageType::SimpleEvent)
                || t.is_crud();
        if needs_source && self.source.is_empty() {
            return Err(InvalidMessage::MissingSource(t));
        }

        if self.transaction_uuid.is_empty() && t.supports_transaction() {
            return Err(InvalidMessage::MissingTransactionUuid(t));
        }

        if self.path.is_empty() && t.is_crud() {
            return Err(InvalidMessage::MissingPath(t));
        }

        if self.status.is_none() && t == MessageType::Auth {
            return Err(InvalidMessage::MissingStatus);
        }

        Ok(())
    }
}
