use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Wire protocol version tag. The original implementation hard-codes a
/// single byte ("a"); we keep the same literal so a Rust peer and the
/// historical Python peer can still talk to each other.
pub const WIRE_VERSION: &str = "a";

/// The seven message types defined by the protocol. GET/SET/HASH/CONFIG are
/// requests, ACK/REP answer them, PUB is an unsolicited broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MsgType {
    Get,
    Set,
    Hash,
    Config,
    Ack,
    Rep,
    Pub,
}

impl MsgType {
    pub fn is_request(self) -> bool {
        matches!(self, MsgType::Get | MsgType::Set | MsgType::Hash | MsgType::Config)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MsgType::Get => "GET",
            MsgType::Set => "SET",
            MsgType::Hash => "HASH",
            MsgType::Config => "CONFIG",
            MsgType::Ack => "ACK",
            MsgType::Rep => "REP",
            MsgType::Pub => "PUB",
        }
    }
}

/// Envelope metadata that travels alongside every message's payload.
///
/// `key` doubles as the addressing target (`store.item`, or bare `store` for
/// HASH/CONFIG requests that are not item-specific) for request/response
/// traffic, and as the publish topic for PUB traffic -- callers that need the
/// trailing-dot topic convention apply it at the framing layer, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    pub transid: String,
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub key: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(msg_type: MsgType, transid: impl Into<String>, key: impl Into<String>, payload: Payload) -> Self {
        Self {
            version: WIRE_VERSION.to_string(),
            transid: transid.into(),
            msg_type,
            key: key.into(),
            payload,
        }
    }

    pub fn version_matches(&self) -> bool {
        self.version == WIRE_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn envelope_roundtrips_through_json() {
        let env = Envelope::new(MsgType::Get, "t-1", "mystore.myitem", Payload::new(Value::Null, 0.0));
        let raw = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(env, back);
        assert!(back.version_matches());
    }

    #[test]
    fn msg_type_serializes_uppercase() {
        let raw = serde_json::to_string(&MsgType::Hash).unwrap();
        assert_eq!(raw, "\"HASH\"");
    }
}
