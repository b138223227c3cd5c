//! Wire framing.
//!
//! The historical mKTL transport (ZeroMQ ROUTER/DEALER/PUB/SUB) speaks in
//! multipart messages: an ordered tuple of byte-string frames. We don't
//! assume ZeroMQ is the carrier here -- the concrete socket library is out
//! of scope -- so [`FrameCodec`] frames that same ordered-tuple model over
//! any `AsyncRead`/`AsyncWrite` byte stream: a frame count, then for each
//! sub-frame a 4-byte big-endian length prefix followed by its bytes.
//!
//! [`to_request_frame`]/[`from_request_frame`] and
//! [`to_publish_frame`]/[`from_publish_frame`] convert between a
//! [`mktl_core::Message`] and that frame tuple, matching the historical
//! ordering: `(version, transid, type, key, payload_json, binary?)` for
//! request/response traffic, `(topic, version, payload_json, binary?)` for
//! publish traffic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mktl_core::{Envelope, Message, MsgType, Payload, PayloadError, Value, WIRE_VERSION};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub type Frame = Vec<Bytes>;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("frame tuple has {found} parts, expected at least {expected}")]
    WrongArity { expected: usize, found: usize },

    #[error("invalid utf-8 in frame: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid payload json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("topic frame missing trailing '.'")]
    BadTopic,
}

/// Length-prefixed multipart framing, analogous to a ZeroMQ multipart
/// message but carried over an ordinary byte stream.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u32(item.len() as u32);
        for part in item {
            dst.put_u32(part.len() as u32);
            dst.put_slice(&part);
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let count = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        let mut offset = 4;
        let mut parts = Vec::with_capacity(count);

        for _ in 0..count {
            if src.len() < offset + 4 {
                return Ok(None);
            }
            let len = u32::from_be_bytes(src[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if src.len() < offset + len {
                return Ok(None);
            }
            parts.push(Bytes::copy_from_slice(&src[offset..offset + len]));
            offset += len;
        }

        src.advance(offset);
        Ok(Some(parts))
    }
}

fn utf8(b: &Bytes) -> Result<String, FramingError> {
    Ok(std::str::from_utf8(b)?.to_string())
}

/// Encode a request/response message as `(version, transid, type, key,
/// payload_json, binary?)`.
pub fn to_request_frame(msg: &Message) -> Frame {
    let mut parts = vec![
        Bytes::from(msg.env.version.clone()),
        Bytes::from(msg.env.transid.clone()),
        Bytes::from(msg.env.msg_type.as_str()),
        Bytes::from(msg.env.key.clone()),
        Bytes::from(serde_json::to_vec(&msg.env.payload).expect("payload always serializes")),
    ];
    if let Some(binary) = &msg.binary {
        parts.push(Bytes::from(binary.clone()));
    }
    parts
}

fn msg_type_from_str(s: &str) -> Option<MsgType> {
    match s {
        "GET" => Some(MsgType::Get),
        "SET" => Some(MsgType::Set),
        "HASH" => Some(MsgType::Hash),
        "CONFIG" => Some(MsgType::Config),
        "ACK" => Some(MsgType::Ack),
        "REP" => Some(MsgType::Rep),
        "PUB" => Some(MsgType::Pub),
        _ => None,
    }
}

/// Decode a request/response frame tuple. A version mismatch does not
/// return an error -- it synthesizes a REP carrying a `ProtocolVersionMismatch`
/// payload error, matching the historical behavior of answering a
/// foreign-version peer instead of silently dropping it.
pub fn from_request_frame(frame: &Frame) -> Result<Message, FramingError> {
    if frame.len() < 5 {
        return Err(FramingError::WrongArity {
            expected: 5,
            found: frame.len(),
        });
    }

    let version = utf8(&frame[0])?;
    let transid = utf8(&frame[1])?;
    let type_str = utf8(&frame[2])?;
    let key = utf8(&frame[3])?;
    let binary = frame.get(5).map(|b| b.to_vec());

    if version != WIRE_VERSION {
        let env = Envelope::new(
            MsgType::Rep,
            transid,
            key,
            Payload::error(
                PayloadError::new("ProtocolVersionMismatch", format!("unsupported wire version {version:?}")),
                0.0,
            ),
        );
        return Ok(Message::new(env));
    }

    let msg_type = msg_type_from_str(&type_str).unwrap_or(MsgType::Rep);
    let payload: Payload = serde_json::from_slice(&frame[4])?;
    let env = Envelope::new(msg_type, transid, key, payload);

    Ok(match binary {
        Some(b) => Message::with_binary(env, b),
        None => Message::new(env),
    })
}

/// Encode a publish broadcast as `(topic., version, payload_json, binary?)`.
/// The topic always carries a trailing dot so subscribers can prefix-match
/// without risking `foo` matching `foobar`.
pub fn to_publish_frame(msg: &Message) -> Frame {
    let topic = format!("{}.", msg.env.key);
    let mut parts = vec![
        Bytes::from(topic),
        Bytes::from(msg.env.version.clone()),
        Bytes::from(serde_json::to_vec(&msg.env.payload).expect("payload always serializes")),
    ];
    if let Some(binary) = &msg.binary {
        parts.push(Bytes::from(binary.clone()));
    }
    parts
}

pub fn from_publish_frame(frame: &Frame) -> Result<Message, FramingError> {
    if frame.len() < 3 {
        return Err(FramingError::WrongArity {
            expected: 3,
            found: frame.len(),
        });
    }

    let topic = utf8(&frame[0])?;
    let key = topic.strip_suffix('.').ok_or(FramingError::BadTopic)?.to_string();
    let version = utf8(&frame[1])?;
    let binary = frame.get(3).map(|b| b.to_vec());

    if version != WIRE_VERSION {
        let env = Envelope::new(
            MsgType::Pub,
            String::new(),
            key,
            Payload::error(
                PayloadError::new("ProtocolVersionMismatch", format!("unsupported wire version {version:?}")),
                0.0,
            ),
        );
        return Ok(Message::new(env));
    }

    let payload: Payload = serde_json::from_slice(&frame[2])?;
    let env = Envelope::new(MsgType::Pub, String::new(), key, payload);

    Ok(match binary {
        Some(b) => Message::with_binary(env, b),
        None => Message::new(env),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn frame_codec_roundtrip() {
        let mut codec = FrameCodec;
        let frame: Frame = vec![Bytes::from_static(b"a"), Bytes::from_static(b"bcd"), Bytes::new()];
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_waits_for_more_bytes() {
        let mut codec = FrameCodec;
        let frame: Frame = vec![Bytes::from_static(b"hello")];
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        let mut truncated = buf.split_to(buf.len() - 2);
        assert!(codec.decode(&mut truncated).unwrap().is_none());
    }

    #[test]
    fn request_frame_roundtrip() {
        let msg = Message::request(MsgType::Get, "store.item", Payload::new(Value::Int(5), 1.0));
        let frame = to_request_frame(&msg);
        let back = from_request_frame(&frame).unwrap();
        assert_eq!(back.env.key, "store.item");
        assert_eq!(back.env.msg_type, MsgType::Get);
    }

    #[test]
    fn request_frame_version_mismatch_synthesizes_error_reply() {
        let mut frame = to_request_frame(&Message::request(MsgType::Get, "store.item", Payload::new(Value::Null, 0.0)));
        frame[0] = Bytes::from_static(b"z");
        let back = from_request_frame(&frame).unwrap();
        assert_eq!(back.env.msg_type, MsgType::Rep);
        assert!(back.is_error());
        assert_eq!(back.env.payload.error.unwrap().kind, "ProtocolVersionMismatch");
    }

    #[test]
    fn publish_frame_roundtrip_appends_dot() {
        let msg = Message::broadcast("store.item", Payload::new(Value::Float(1.5), 2.0));
        let frame = to_publish_frame(&msg);
        assert_eq!(&frame[0][..], b"store.item.");
        let back = from_publish_frame(&frame).unwrap();
        assert_eq!(back.env.key, "store.item");
    }

    #[test]
    fn publish_frame_with_binary_companion() {
        let msg = Message::with_binary(
            Envelope::new(MsgType::Pub, String::new(), "store.item", Payload::new(Value::Null, 0.0)),
            vec![1, 2, 3, 4],
        );
        let frame = to_publish_frame(&msg);
        let back = from_publish_frame(&frame).unwrap();
        assert_eq!(back.binary, Some(vec![1, 2, 3, 4]));
    }
}
