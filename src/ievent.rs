//! ievent — the inter-event codec: `{event, kw}` pairs for wire transit.
//!
//! The kw travels in its serialization-neutral form: a plain JSON dict,
//! no process-local handles. Event names are bounded to 63 bytes.

use serde_json::{json, Value};

use crate::consts::EVENT_NAME_MAX;
use crate::error::{GResult, GobjError};
use crate::kw::Kw;

#[derive(Debug, Clone, PartialEq)]
pub struct IevMsg {
    pub event: String,
    pub kw: Kw,
}

/// Neutral form of a kw for the wire. Handles never enter the codec: a
/// kw is pure JSON, so normalization is a deep copy.
pub fn kw_serialize(kw: Kw) -> Kw {
    kw
}

pub fn kw_deserialize(kw: Kw) -> Kw {
    kw
}

/// Build the envelope `{event, kw}`.
pub fn iev_create(event: &str, kw: Kw) -> GResult<Value> {
    if event.is_empty() {
        return Err(GobjError::Param("iev_create: event NULL".to_string()));
    }
    if event.len() > EVENT_NAME_MAX {
        return Err(GobjError::Param(format!(
            "iev_create: event name TOO LARGE ({} > {})",
            event.len(),
            EVENT_NAME_MAX
        )));
    }
    Ok(json!({
        "event": event,
        "kw": Value::Object(kw_serialize(kw)),
    }))
}

/// Serialize an envelope for the outside world.
pub fn iev_to_buffer(iev: &Value, pretty: bool) -> Vec<u8> {
    if pretty {
        serde_json::to_vec_pretty(iev).unwrap_or_default()
    } else {
        serde_json::to_vec(iev).unwrap_or_default()
    }
}

/// Incorporate an event message from the outside world.
pub fn iev_from_buffer(buf: &[u8]) -> GResult<IevMsg> {
    let v: Value = serde_json::from_slice(buf)
        .map_err(|e| GobjError::Param(format!("iev_from_buffer: bad json: {}", e)))?;
    iev_from_value(v)
}

pub fn iev_from_value(v: Value) -> GResult<IevMsg> {
    let Value::Object(map) = v else {
        return Err(GobjError::Param("iev: not a json dict".to_string()));
    };
    let event = map
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if event.is_empty() {
        return Err(GobjError::Param("iev: event EMPTY".to_string()));
    }
    if event.len() > EVENT_NAME_MAX {
        return Err(GobjError::Param(format!(
            "iev: event name TOO LARGE ({} > {})",
            event.len(),
            EVENT_NAME_MAX
        )));
    }
    let kw = match map.get("kw") {
        Some(Value::Object(m)) => m.clone(),
        _ => return Err(GobjError::Param("iev: kw EMPTY".to_string())),
    };
    Ok(IevMsg {
        event,
        kw: kw_deserialize(kw),
    })
}
