use uuid::Uuid;

use crate::envelope::{Envelope, MsgType};
use crate::payload::{Payload, PayloadError};
use crate::value::Value;

/// A full wire message: envelope plus an optional bulk binary companion
/// frame. The companion frame is never touched by JSON (de)serialization --
/// it rides alongside the envelope as its own frame in the wire tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub env: Envelope,
    pub binary: Option<Vec<u8>>,
}

impl Message {
    pub fn new(env: Envelope) -> Self {
        Self { env, binary: None }
    }

    pub fn with_binary(env: Envelope, binary: Vec<u8>) -> Self {
        Self {
            env,
            binary: Some(binary),
        }
    }

    /// Build a new outbound request (GET/SET/HASH/CONFIG), stamping a fresh
    /// transaction id the session layer will use to correlate the ACK/REP.
    pub fn request(msg_type: MsgType, key: impl Into<String>, payload: Payload) -> Self {
        assert!(msg_type.is_request(), "request() requires a request message type");
        let transid = Uuid::new_v4().to_string();
        Self::new(Envelope::new(msg_type, transid, key, payload))
    }

    /// Build the ACK that a server sends immediately upon receipt, before
    /// the handler has produced a real answer.
    pub fn ack_for(request: &Envelope) -> Self {
        Self::new(Envelope::new(
            MsgType::Ack,
            request.transid.clone(),
            request.key.clone(),
            Payload::new(Value::Null, 0.0),
        ))
    }

    /// Build the REP that answers a request, carrying the same transid.
    pub fn reply_for(request: &Envelope, payload: Payload) -> Self {
        Self::new(Envelope::new(MsgType::Rep, request.transid.clone(), request.key.clone(), payload))
    }

    /// Build an error REP from a caught exception-like description.
    pub fn error_reply_for(request: &Envelope, kind: impl Into<String>, text: impl Into<String>) -> Self {
        let payload = Payload::error(PayloadError::new(kind, text), 0.0);
        Self::reply_for(request, payload)
    }

    /// Build an unsolicited publish broadcast. `key` is the bare topic; the
    /// trailing-dot convention is applied by the framing layer.
    pub fn broadcast(key: impl Into<String>, payload: Payload) -> Self {
        let transid = Uuid::new_v4().to_string();
        Self::new(Envelope::new(MsgType::Pub, transid, key, payload))
    }

    pub fn is_error(&self) -> bool {
        self.env.payload.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_and_reply_share_transid() {
        let req = Message::request(MsgType::Get, "store.item", Payload::new(Value::Null, 0.0));
        let ack = Message::ack_for(&req.env);
        let rep = Message::reply_for(&req.env, Payload::new(Value::Int(7), 1.0));

        assert_eq!(ack.env.transid, req.env.transid);
        assert_eq!(rep.env.transid, req.env.transid);
        assert_eq!(ack.env.msg_type, MsgType::Ack);
        assert_eq!(rep.env.msg_type, MsgType::Rep);
    }

    #[test]
    fn error_reply_carries_payload_error() {
        let req = Message::request(MsgType::Set, "store.item", Payload::new(Value::Int(1), 0.0));
        let rep = Message::error_reply_for(&req.env, "ValueError", "out of range");
        assert!(rep.is_error());
    }

    #[test]
    fn broadcast_is_pub_type() {
        let msg = Message::broadcast("store.item", Payload::new(Value::Int(3), 5.0));
        assert_eq!(msg.env.msg_type, MsgType::Pub);
    }
}
