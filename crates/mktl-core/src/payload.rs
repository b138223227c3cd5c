use serde::{Deserialize, Serialize};

use crate::value::{BulkDescriptor, Value};

fn is_false(b: &bool) -> bool {
    !b
}

/// The `{type, text, debug}` shape an exception is flattened into before it
/// crosses the wire as a REP payload. `debug` is an optional traceback-style
/// string; callers should never depend on its contents, only log it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadError {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl PayloadError {
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
            debug: None,
        }
    }

    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }
}

/// The `data` carried by a GET/SET/HASH/CONFIG/REP/PUB message.
///
/// `time` is a wire-reserved field: it is stamped by whoever produces the
/// payload and is intentionally excluded from payload equality comparisons
/// used to decide whether a publish is a no-op (see [`Payload::same_value`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub value: Value,
    pub time: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub refresh: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk: Option<BulkDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PayloadError>,
}

impl Payload {
    pub fn new(value: impl Into<Value>, time: f64) -> Self {
        Self {
            value: value.into(),
            time,
            refresh: false,
            bulk: None,
            error: None,
        }
    }

    /// A GET request payload asking the daemon to bypass its cache and
    /// re-read the value before replying.
    pub fn refresh_request(time: f64) -> Self {
        Self {
            value: Value::Null,
            time,
            refresh: true,
            bulk: None,
            error: None,
        }
    }

    pub fn bulk(descriptor: BulkDescriptor, time: f64) -> Self {
        Self {
            value: Value::Null,
            time,
            refresh: false,
            bulk: Some(descriptor),
            error: None,
        }
    }

    pub fn error(err: PayloadError, time: f64) -> Self {
        Self {
            value: Value::Null,
            time,
            refresh: false,
            bulk: None,
            error: Some(err),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_bulk(&self) -> bool {
        self.bulk.is_some()
    }

    /// Value equality ignoring the `time` stamp, used by `Item::publish` to
    /// decide whether a new reading actually changed anything. Bulk payloads
    /// are compared by their companion bytes, passed in separately since they
    /// never live inside the JSON payload itself.
    pub fn same_value(&self, other: &Payload) -> bool {
        self.value == other.value && self.bulk == other.bulk && self.error == other.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrips_through_json() {
        let p = Payload::new(Value::Int(42), 100.5);
        let raw = serde_json::to_string(&p).unwrap();
        let back: Payload = serde_json::from_str(&raw).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn same_value_ignores_time() {
        let a = Payload::new(Value::Int(1), 10.0);
        let b = Payload::new(Value::Int(1), 20.0);
        assert!(a.same_value(&b));

        let c = Payload::new(Value::Int(2), 10.0);
        assert!(!a.same_value(&c));
    }

    #[test]
    fn error_payload_roundtrips() {
        let p = Payload::error(PayloadError::new("ValueError", "bad thing"), 1.0);
        let raw = serde_json::to_string(&p).unwrap();
        let back: Payload = serde_json::from_str(&raw).unwrap();
        assert!(back.is_error());
        assert_eq!(back.error.unwrap().text, "bad thing");
    }
}
