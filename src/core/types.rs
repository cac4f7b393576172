use serde::Serialize;

/// One decoded cursor row.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Identifier type used by typed actions.
pub type EntityId = i64;

/// Ordered rows returned by one successful gateway call.
///
/// An empty result is a success. The gateway cannot tell whether the
/// backend found nothing or completed a no-op that emits no confirmation
/// row (a DELETE, for instance); callers that care must decide themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ActionResult {
    rows: Vec<Row>,
}

impl ActionResult {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Render as a JSON array, the shape handed back to request layers.
    pub fn to_json(&self) -> String {
        serde_json::Value::Array(
            self.rows
                .iter()
                .cloned()
                .map(serde_json::Value::Object)
                .collect(),
        )
        .to_string()
    }
}

impl IntoIterator for ActionResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ActionResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_empty_result_is_valid() {
        let result = ActionResult::default();
        assert!(result.is_empty());
        assert_eq!(result.to_json(), "[]");
    }

    #[test]
    fn test_to_json_preserves_order() {
        let result = ActionResult::new(vec![
            row(json!({"ID": 2})),
            row(json!({"ID": 1})),
        ]);

        assert_eq!(result.to_json(), r#"[{"ID":2},{"ID":1}]"#);
        assert_eq!(result.first().and_then(|r| r.get("ID")), Some(&json!(2)));
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let result = ActionResult::new(vec![row(json!({"message": "ok"}))]);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!([{"message": "ok"}]));
    }
}
