//! Format-parametrized WRP encoders and decoders.
//!
//! Both coders retain their internal scratch buffers across uses so a
//! long-lived instance (a pump's coder, a pooled coder) settles into a
//! steady state with no per-message allocation. Each supports a byte-slice
//! mode and a streaming mode.

use std::fmt;
use std::io::{Read, Write};

use serde::Serialize;

use crate::message::Message;

/// Wire framing for WRP messages. Msgpack is the wire default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Msgpack,
    Json,
    PlainJson,
}

impl Format {
    /// The MIME type describing this framing.
    pub const fn content_type(self) -> &'static str {
        match self {
            Format::Msgpack => "application/msgpack",
            Format::Json => "application/json",
            Format::PlainJson => "text/plain",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Msgpack => "msgpack",
            Format::Json => "json",
            Format::PlainJson => "plain-json",
        })
    }
}

/// Codec failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes WRP messages in one [`Format`].
pub struct Encoder {
    format: Format,
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            buf: Vec::new(),
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Encodes into the internal buffer and returns the encoded bytes.
    ///
    /// The buffer is cleared but its capacity is kept, so repeated calls on
    /// the same instance do not reallocate once warm.
    pub fn encode(&mut self, message: &Message) -> Result<&[u8], CodecError> {
        self.buf.clear();
        write_message(self.format, &mut self.buf, message)?;
        Ok(&self.buf)
    }

    /// Encodes directly to a stream.
    pub fn encode_to<W: Write>(&mut self, destination: W, message: &Message) -> Result<(), CodecError> {
        write_message(self.format, destination, message)
    }
}

/// Decodes WRP messages in one [`Format`].
pub struct Decoder {
    format: Format,
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            buf: Vec::new(),
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Decodes a message from a byte slice.
    pub fn decode(&mut self, source: &[u8]) -> Result<Message, CodecError> {
        read_message(self.format, source)
    }

    /// Decodes a message from a stream, buffering it through the retained
    /// internal buffer.
    pub fn decode_from<R: Read>(&mut self, mut source: R) -> Result<Message, CodecError> {
        self.buf.clear();
        source.read_to_end(&mut self.buf)?;
        read_message(self.format, &self.buf)
    }
}

fn write_message<W: Write>(format: Format, mut destination: W, message: &Message) -> Result<(), CodecError> {
    match format {
        Format::Msgpack => {
            // Struct-map mode keeps field names on the wire, so decoding is
            // tolerant of field order and absent optionals.
            let mut ser = rmp_serde::Serializer::new(&mut destination).with_struct_map();
            message.serialize(&mut ser)?;
        }
        Format::Json | Format::PlainJson => serde_json::to_writer(&mut destination, message)?,
    }
    Ok(())
}

fn read_message(format: Format, source: &[u8]) -> Result<Message, CodecError> {
    match format {
        Format::Msgpack => Ok(rmp_serde::from_slice(source)?),
        Format::Json | Format::PlainJson => Ok(serde_json::from_slice(source)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn sample() -> Message {
        let mut msg = Message::new(MessageType::SimpleRequestResponse);
        msg.source = "dns:talker.example.com".into();
        msg.destination = "mac:112233445566/service".into();
        msg.transaction_uuid = "546514d4-9cb6-41c9-88ca-ccd4c130c525".into();
        msg.content_type = "application/json".into();
        msg.headers = vec!["key1=value1".into(), "key2=value2".into()];
        msg.include_spans = Some(true);
        msg.spans = vec![vec!["hop".into(), "1234".into(), "120".into()]];
        msg.payload = b"{\"command\":\"GET\"}".to_vec();
        msg
    }

    #[test]
    fn round_trip_all_formats() {
        for format in [Format::Msgpack, Format::Json, Format::PlainJson] {
            let mut encoder = Encoder::new(format);
            let mut decoder = Decoder::new(format);

            let original = sample();
            let encoded = encoder.encode(&original).unwrap().to_vec();
            let decoded = decoder.decode(&encoded).unwrap();
            assert_eq!(decoded, original, "round trip failed for {format}");
        }
    }

    #[test]
    fn round_trip_minimal_messages() {
        let minimal = [
            Message::authorization_status(crate::message::AUTH_STATUS_AUTHORIZED),
            {
                let mut m = Message::new(MessageType::SimpleEvent);
                m.source = "s".into();
                m
            },
            {
                let mut m = Message::new(MessageType::Delete);
                m.source = "s".into();
                m.transaction_uuid = "u".into();
                m.path = "/p".into();
                m
            },
        ];

        for original in minimal {
            assert_eq!(original.validate(), Ok(()));
            for format in [Format::Msgpack, Format::Json] {
                let mut encoder = Encoder::new(format);
                let mut decoder = Decoder::new(format);
                let encoded = encoder.encode(&original).unwrap().to_vec();
                assert_eq!(decoder.decode(&encoded).unwrap(), original);
            }
        }
    }

    #[test]
    fn stream_modes_match_slice_modes() {
        let msg = sample();
        let mut encoder = Encoder::new(Format::Msgpack);

        let mut streamed = Vec::new();
        encoder.encode_to(&mut streamed, &msg).unwrap();
        let sliced = encoder.encode(&msg).unwrap();
        assert_eq!(streamed, sliced);

        let mut decoder = Decoder::new(Format::Msgpack);
        let from_stream = decoder.decode_from(&streamed[..]).unwrap();
        assert_eq!(from_stream, msg);
    }

    #[test]
    fn encoder_buffer_is_reused() {
        let mut encoder = Encoder::new(Format::Msgpack);
        let msg = sample();

        encoder.encode(&msg).unwrap();
        let capacity = encoder.buf.capacity();
        for _ in 0..16 {
            encoder.encode(&msg).unwrap();
        }
        assert_eq!(encoder.buf.capacity(), capacity);
    }

    #[test]
    fn unknown_type_fails_decode() {
        // msg_type 42 is not a WRP type.
        let bogus = serde_json::json!({"msg_type": 42});
        let bytes = serde_json::to_vec(&bogus).unwrap();
        let mut decoder = Decoder::new(Format::Json);
        assert!(decoder.decode(&bytes).is_err());
    }

    #[test]
    fn msgpack_encodes_type_as_integer() {
        let msg = Message::authorization_status(200);
        let mut encoder = Encoder::new(Format::Msgpack);
        let bytes = encoder.encode(&msg).unwrap();

        // The map must contain the field name followed by the raw
        // discriminant 2, not the string "Auth".
        let key = b"msg_type";
        let pos = bytes
            .windows(key.len())
            .position(|w| w == key)
            .expect("msg_type key present");
        assert_eq!(bytes[pos + key.len()], 2);

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"Auth\""));
    }
}
