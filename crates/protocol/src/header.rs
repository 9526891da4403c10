//! Translation between HTTP headers and WRP messages.
//!
//! The `X-Midt-*` names below are the authoritative HTTP representation of
//! a WRP message (matching is case-insensitive, as always for headers).
//! `X-Midt-Request-Delivery-Reponse` is misspelled on the wire and peers
//! depend on it; it must never be corrected.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::message::{InvalidMessage, Message, MessageType};

pub const MSG_TYPE_HEADER: HeaderName = HeaderName::from_static("x-midt-msg-type");
pub const CONTENT_TYPE_HEADER: HeaderName = HeaderName::from_static("x-midt-content-type");
pub const ACCEPT_HEADER: HeaderName = HeaderName::from_static("x-midt-accept");
pub const TRANSACTION_UUID_HEADER: HeaderName = HeaderName::from_static("x-midt-transaction-uuid");
pub const STATUS_HEADER: HeaderName = HeaderName::from_static("x-midt-status");
// Intentional misspelling, preserved for compatibility.
pub const RDR_HEADER: HeaderName = HeaderName::from_static("x-midt-request-delivery-reponse");
pub const HEADERS_ARR_HEADER: HeaderName = HeaderName::from_static("x-midt-headers");
pub const INCLUDE_SPANS_HEADER: HeaderName = HeaderName::from_static("x-midt-include-spans");
pub const SPANS_HEADER: HeaderName = HeaderName::from_static("x-midt-spans");
pub const PATH_HEADER: HeaderName = HeaderName::from_static("x-midt-path");
pub const SOURCE_HEADER: HeaderName = HeaderName::from_static("x-midt-source");

/// Failures translating between headers and messages.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("invalid or missing message type header")]
    InvalidMessageType,

    #[error("header value for {0} is not valid UTF-8")]
    InvalidEncoding(HeaderName),

    #[error("invalid numeric value for {name}: {source}")]
    InvalidNumber {
        name: HeaderName,
        source: std::num::ParseIntError,
    },

    #[error("{0}")]
    Invalid(#[from] InvalidMessage),

    #[error("message field does not fit in a header: {0}")]
    InvalidValue(#[from] http::header::InvalidHeaderValue),
}

fn get_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Option<&'a str>, HeaderError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| if s.is_empty() { None } else { Some(s) })
            .map_err(|_| HeaderError::InvalidEncoding(name.clone())),
    }
}

fn get_i64(headers: &HeaderMap, name: &HeaderName) -> Result<Option<i64>, HeaderError> {
    match get_str(headers, name)? {
        None => Ok(None),
        Some(text) => text.parse::<i64>().map(Some).map_err(|source| {
            HeaderError::InvalidNumber {
                name: name.clone(),
                source,
            }
        }),
    }
}

/// The lenient boolean forms accepted by `X-Midt-Include-Spans`.
fn parse_lenient_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn append(headers: &mut HeaderMap, name: &HeaderName, value: &str) -> Result<(), HeaderError> {
    headers.append(name.clone(), HeaderValue::from_str(value)?);
    Ok(())
}

/// Builds a WRP message from its HTTP header representation.
///
/// The message type is mandatory; the remaining mandatory-per-type rules of
/// [`Message::validate`] are enforced after all fields are read, so the
/// error names the first missing field.
pub fn from_headers(headers: &HeaderMap) -> Result<Message, HeaderError> {
    let msg_type = get_str(headers, &MSG_TYPE_HEADER)?
        .and_then(MessageType::from_name)
        .ok_or(HeaderError::InvalidMessageType)?;

    let mut msg = Message::new(msg_type);

    if let Some(source) = get_str(headers, &SOURCE_HEADER)? {
        msg.source = source.to_owned();
    }
    if let Some(uuid) = get_str(headers, &TRANSACTION_UUID_HEADER)? {
        msg.transaction_uuid = uuid.to_owned();
    }
    if let Some(content_type) = get_str(headers, &CONTENT_TYPE_HEADER)? {
        msg.content_type = content_type.to_owned();
    }
    if let Some(accept) = get_str(headers, &ACCEPT_HEADER)? {
        msg.accept = accept.to_owned();
    }
    if let Some(path) = get_str(headers, &PATH_HEADER)? {
        msg.path = path.to_owned();
    }

    msg.status = get_i64(headers, &STATUS_HEADER)?;
    msg.request_delivery_response = get_i64(headers, &RDR_HEADER)?;

    // Unparseable include-spans values are skipped, not rejected.
    if let Some(text) = get_str(headers, &INCLUDE_SPANS_HEADER)? {
        msg.include_spans = parse_lenient_bool(text);
    }

    // Each occurrence contributes one element, in arrival order.
    for value in headers.get_all(&HEADERS_ARR_HEADER) {
        let text = value
            .to_str()
            .map_err(|_| HeaderError::InvalidEncoding(HEADERS_ARR_HEADER))?;
        msg.headers.push(text.to_owned());
    }

    // Spans arrive flattened; consecutive values regroup into triples. A
    // trailing partial triple is carried as-is.
    let mut span_values = Vec::new();
    for value in headers.get_all(&SPANS_HEADER) {
        let text = value
            .to_str()
            .map_err(|_| HeaderError::InvalidEncoding(SPANS_HEADER))?;
        span_values.push(text.to_owned());
    }
    if !span_values.is_empty() {
        msg.spans = span_values.chunks(3).map(<[String]>::to_vec).collect();
    }

    msg.validate()?;
    Ok(msg)
}

/// Renders a WRP message as its HTTP header representation.
///
/// `X-Midt-Headers` and `X-Midt-Spans` appear once per element in field
/// order; everything else appears at most once.
pub fn to_headers(msg: &Message) -> Result<HeaderMap, HeaderError> {
    let mut headers = HeaderMap::new();

    append(&mut headers, &MSG_TYPE_HEADER, msg.msg_type.name())?;

    if !msg.source.is_empty() {
        append(&mut headers, &SOURCE_HEADER, &msg.source)?;
    }
    if !msg.transaction_uuid.is_empty() {
        append(&mut headers, &TRANSACTION_UUID_HEADER, &msg.transaction_uuid)?;
    }
    if !msg.content_type.is_empty() {
        append(&mut headers, &CONTENT_TYPE_HEADER, &msg.content_type)?;
    }
    if !msg.accept.is_empty() {
        append(&mut headers, &ACCEPT_HEADER, &msg.accept)?;
    }
    if !msg.path.is_empty() {
        append(&mut headers, &PATH_HEADER, &msg.path)?;
    }
    if let Some(status) = msg.status {
        append(&mut headers, &STATUS_HEADER, &status.to_string())?;
    }
    if let Some(rdr) = msg.request_delivery_response {
        append(&mut headers, &RDR_HEADER, &rdr.to_string())?;
    }
    if let Some(include_spans) = msg.include_spans {
        let text = if include_spans { "true" } else { "false" };
        append(&mut headers, &INCLUDE_SPANS_HEADER, text)?;
    }
    for item in &msg.headers {
        append(&mut headers, &HEADERS_ARR_HEADER, item)?;
    }
    for span in &msg.spans {
        for item in span {
            append(&mut headers, &SPANS_HEADER, item)?;
        }
    }

    Ok(headers)
}
