use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde_json::{Map, Value, json};
use tracing::error;

use crate::state::SharedState;

/// Accepts a Content-Security-Policy violation report and logs it verbatim.
///
/// The payload is not validated; every request is acknowledged with
/// `204 No Content`.
pub async fn report_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let report = report_payload(&headers, &body);
    let count = state.record_report();
    error!(target: "csp_report", count, "{report}");
    StatusCode::NO_CONTENT
}

/// `{headers, body}`; the body is embedded as JSON when it parses, else as text.
pub fn report_payload(headers: &HeaderMap, body: &[u8]) -> Value {
    let mut header_map = Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match header_map.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                header_map.insert(name.as_str().to_string(), Value::String(value));
            }
        }
    }

    let body = serde_json::from_slice::<Value>(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));

    json!({
        "headers": header_map,
        "body": body,
    })
}
