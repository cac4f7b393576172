use super::classify::{RowClass, classify_row};
use crate::backend::Cursor;
use crate::core::Row;
use serde_json::Value;
use tracing::{debug, error};

/// Key used when a row is not a JSON object.
pub const RAW_MESSAGE_KEY: &str = "message";

/// An error-marked row, carrying the text exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedError {
    pub text: String,
}

/// Decode every row of `cursor`, in order.
///
/// The first error-marked row aborts decoding: no partial rows are returned
/// and the rest of the cursor is discarded. The cursor is always closed on
/// return.
pub fn decode(cursor: &mut Cursor) -> Result<Vec<Row>, EmbeddedError> {
    let mut rows = Vec::with_capacity(cursor.remaining());

    while let Some(text) = cursor.next_row() {
        if let RowClass::Error(marker) = classify_row(text.as_deref()) {
            let text = text.unwrap_or_default();
            error!(?marker, response = %text, "backend returned an error row");
            cursor.close();
            return Err(EmbeddedError { text });
        }

        rows.push(decode_row(text));
    }

    cursor.close();
    Ok(rows)
}

/// Parse one non-error row, wrapping anything that is not a JSON object.
pub fn decode_row(text: Option<String>) -> Row {
    if let Some(raw) = text.as_deref() {
        if let Ok(map) = serde_json::from_str::<Row>(raw) {
            return map;
        }
        debug!(response = %raw, "non-JSON response row");
    }

    let mut wrapped = Row::new();
    wrapped.insert(
        RAW_MESSAGE_KEY.to_string(),
        text.map_or(Value::Null, Value::String),
    );
    wrapped
}
