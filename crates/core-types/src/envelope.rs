//! Uniform `{ok, data|error}` result envelope.
//!
//! Page-side outcomes arrive in several shapes: the envelope produced by the
//! generated fragment wrapper, a bare value from an ad-hoc expression, `null`
//! for `undefined`, or an exception reported by the transport. Everything is
//! normalized into [`Envelope`] before it reaches a caller.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::errors::{BridgeError, BridgeErrorKind, BridgeResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Ok {
        data: Value,
    },
    Err {
        error: String,
        kind: BridgeErrorKind,
    },
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Envelope::Ok { data }
    }

    pub fn failure(err: &BridgeError) -> Self {
        Envelope::Err {
            error: err.message.clone(),
            kind: err.kind,
        }
    }

    pub fn from_result(result: BridgeResult<Value>) -> Self {
        match result {
            Ok(data) => Envelope::success(data),
            Err(err) => Envelope::failure(&err),
        }
    }

    /// Same as [`Envelope::from_result`] for any serializable payload.
    pub fn from_typed<T: Serialize>(result: BridgeResult<T>) -> Self {
        Envelope::from_result(result.and_then(|value| Ok(serde_json::to_value(value)?)))
    }

    /// Interpret a raw page-side value.
    pub fn normalize(raw: Value) -> Self {
        match raw {
            Value::Object(mut map) => match map.get("ok").and_then(Value::as_bool) {
                Some(true) => Envelope::Ok {
                    data: map.remove("data").unwrap_or(Value::Null),
                },
                Some(false) => Self::failure_from_map(&map),
                None => Envelope::Ok {
                    data: Value::Object(map),
                },
            },
            other => Envelope::Ok { data: other },
        }
    }

    fn failure_from_map(map: &Map<String, Value>) -> Self {
        let error = match map.get("error") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => "page reported an unspecified failure".to_string(),
            Some(other) => other.to_string(),
        };
        let kind = map
            .get("errorKind")
            .and_then(Value::as_str)
            .map(BridgeErrorKind::from_wire)
            .unwrap_or(BridgeErrorKind::ExecutionFailed);
        Envelope::Err { error, kind }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Ok { .. })
    }

    pub fn into_result(self) -> BridgeResult<Value> {
        match self {
            Envelope::Ok { data } => Ok(data),
            Envelope::Err { error, kind } => Err(BridgeError::new(kind, error)),
        }
    }

    pub fn decode<T: DeserializeOwned>(self) -> BridgeResult<T> {
        let data = self.into_result()?;
        serde_json::from_value(data).map_err(|err| {
            BridgeError::internal(format!("unexpected page payload: {err}"))
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Envelope::Ok { data } => json!({ "ok": true, "data": data }),
            Envelope::Err { error, kind } => json!({
                "ok": false,
                "error": error,
                "errorKind": kind.as_str(),
            }),
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Envelope::normalize)
    }
}
