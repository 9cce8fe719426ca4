//! JsValue <-> serde conversions used across the bridge

use chart_frame_shared::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::{JsCast, JsValue};

/// Serialize to a plain JS value (objects, not `Map`s)
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| ProtocolError::Serialization {
            message: e.to_string(),
        })
}

pub fn from_js<T: DeserializeOwned>(value: JsValue) -> ProtocolResult<T> {
    serde_wasm_bindgen::from_value(value).map_err(|e| ProtocolError::Serialization {
        message: e.to_string(),
    })
}

/// Structured `{ type, details }` error for JavaScript callers
pub fn to_js_error(error: ProtocolError) -> JsValue {
    match to_js(&error) {
        Ok(value) => value,
        Err(_) => JsValue::from_str(&error.to_string()),
    }
}

/// Best-effort message from a thrown JS value
pub fn js_error_message(value: &JsValue) -> String {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}
