//! Error sniffing for procedure output.
//!
//! The backend procedure reports business and routing failures as ordinary
//! text rows rather than raising. This module is the only place that decides
//! whether a row is such an error, so the pattern list can be audited and
//! tested in one spot.

use lazy_static::lazy_static;
use regex::Regex;

/// Prefixes the procedure uses for its own failure rows.
pub const ERROR_PREFIXES: &[&str] = &["Database error", "Routing error"];

/// Case-insensitive token that marks any row as an error.
pub const ERROR_TOKEN: &str = "error";

/// Oracle error marker, matched anywhere in the row with or without digits.
pub const ORACLE_MARKER: &str = "ORA-";

lazy_static! {
    /// Other vendor error codes: `PLS-`/`TNS-` codes and SQLSTATEs.
    static ref VENDOR_CODE: Regex =
        Regex::new(r"\b(?:PLS|TNS)-\d{5}\b|\bSQLSTATE\s*[:=]?\s*\[?[0-9A-Z]{5}\]?").unwrap();
}

/// Which rule marked a row as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMarker {
    Prefix(&'static str),
    VendorCode,
    Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    Error(ErrorMarker),
    Data,
}

impl RowClass {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Classify one cursor row. SQL NULL rows are never errors.
///
/// The token rule matches substrings too ("errors", "terror"); rows are
/// compared exactly as the procedure emits them.
pub fn classify_row(text: Option<&str>) -> RowClass {
    let Some(text) = text else {
        return RowClass::Data;
    };

    if let Some(prefix) = ERROR_PREFIXES.iter().find(|p| text.starts_with(*p)) {
        return RowClass::Error(ErrorMarker::Prefix(prefix));
    }

    if text.contains(ORACLE_MARKER) || VENDOR_CODE.is_match(text) {
        return RowClass::Error(ErrorMarker::VendorCode);
    }

    if text.to_lowercase().contains(ERROR_TOKEN) {
        return RowClass::Error(ErrorMarker::Token);
    }

    RowClass::Data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(text: &str) -> RowClass {
        classify_row(Some(text))
    }

    #[test]
    fn test_known_prefixes() {
        assert_eq!(
            class("Database error: unique constraint violated"),
            RowClass::Error(ErrorMarker::Prefix("Database error"))
        );
        assert_eq!(
            class("Routing error: unknown action FOO"),
            RowClass::Error(ErrorMarker::Prefix("Routing error"))
        );
    }

    #[test]
    fn test_vendor_codes() {
        assert_eq!(
            class("ORA-00001: unique constraint (APP.PK_POSTS) violated"),
            RowClass::Error(ErrorMarker::VendorCode)
        );
        assert_eq!(
            class("failed with PLS-00306 wrong number of arguments"),
            RowClass::Error(ErrorMarker::VendorCode)
        );
        assert_eq!(
            class("TNS-12541: no listener"),
            RowClass::Error(ErrorMarker::VendorCode)
        );
        assert_eq!(
            class("SQLSTATE 23505 duplicate key"),
            RowClass::Error(ErrorMarker::VendorCode)
        );
        assert_eq!(
            class("SQLSTATE[42P01] relation missing"),
            RowClass::Error(ErrorMarker::VendorCode)
        );
    }

    #[test]
    fn test_error_token_any_case() {
        assert_eq!(class("ERROR"), RowClass::Error(ErrorMarker::Token));
        assert_eq!(
            class(r#"{"status":"Error","detail":"post locked"}"#),
            RowClass::Error(ErrorMarker::Token)
        );
        assert_eq!(class("3 errors occurred"), RowClass::Error(ErrorMarker::Token));
        // Substring matches are intentional compatibility behavior.
        assert_eq!(class("the terror of deadlines"), RowClass::Error(ErrorMarker::Token));
    }

    #[test]
    fn test_prefix_is_case_sensitive_but_token_catches_it() {
        assert_eq!(
            class("database error: lowercase"),
            RowClass::Error(ErrorMarker::Token)
        );
    }

    #[test]
    fn test_data_rows() {
        assert_eq!(class(r#"{"ID":42,"CONTENT":"hello"}"#), RowClass::Data);
        assert_eq!(class("Post deleted successfully"), RowClass::Data);
        assert_eq!(class(""), RowClass::Data);
        assert_eq!(class("PLS-12"), RowClass::Data);
        assert_eq!(class("ora-00001 in lowercase"), RowClass::Data);
    }

    #[test]
    fn test_oracle_marker_matches_anywhere() {
        for text in ["ORA-", "CORA-12345X", "failed: ORA-1403", "code=ORA-06512x"] {
            assert_eq!(class(text), RowClass::Error(ErrorMarker::VendorCode), "{text}");
        }
    }

    #[test]
    fn test_null_row_is_data() {
        assert_eq!(classify_row(None), RowClass::Data);
        assert!(!classify_row(None).is_error());
    }
}
