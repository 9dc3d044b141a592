//! Slicing a JSON literal out of markup between two fixed markers.
//!
//! Scraped pages are not a stable API, so the failure modes are kept apart:
//! a missing marker means the page has a different shape, while invalid JSON
//! means the markers matched but the payload did not.

use serde_json::Value;
use std::fmt;

#[derive(Debug)]
pub enum ExtractError {
    /// The start marker does not occur in the text.
    MissingStart,
    /// The end marker does not follow the start marker.
    MissingEnd,
    /// Both markers matched but the slice between them is not JSON.
    InvalidJson(serde_json::Error),
}

impl ExtractError {
    /// `true` when the markers were never found, as opposed to a bad payload.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::MissingStart | Self::MissingEnd)
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStart => write!(f, "start marker not found"),
            Self::MissingEnd => write!(f, "end marker not found after start marker"),
            Self::InvalidJson(err) => write!(f, "embedded payload is not valid JSON: {err}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidJson(err) => Some(err),
            _ => None,
        }
    }
}

/// Returns the raw text strictly between `start` and the first `end` after it.
pub fn slice_between<'a>(text: &'a str, start: &str, end: &str) -> Result<&'a str, ExtractError> {
    let from = text
        .find(start)
        .map(|idx| idx + start.len())
        .ok_or(ExtractError::MissingStart)?;
    let len = text[from..].find(end).ok_or(ExtractError::MissingEnd)?;
    Ok(&text[from..from + len])
}

pub fn extract_between(text: &str, start: &str, end: &str) -> Result<Value, ExtractError> {
    let raw = slice_between(text, start, end)?;
    serde_json::from_str(raw).map_err(ExtractError::InvalidJson)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const START: &str = "var ytInitialPlayerResponse = ";
    const END: &str = ";</script>";

    #[test]
    fn parses_payload_between_markers() {
        let html = r#"<script>var ytInitialPlayerResponse = {"valid":"json"};</script><p>"#;
        assert_eq!(extract_between(html, START, END).unwrap(), json!({"valid": "json"}));
    }

    #[test]
    fn end_marker_is_searched_after_start() {
        let html = r#"<script>x=1;</script><script>var ytInitialPlayerResponse = [1,2];</script>"#;
        assert_eq!(extract_between(html, START, END).unwrap(), json!([1, 2]));
    }

    #[test]
    fn missing_start_is_not_found() {
        let err = extract_between("<html>ytInitialPlayerResponse</html>", START, END).unwrap_err();
        assert!(matches!(err, ExtractError::MissingStart));
        assert!(err.is_not_found());
    }

    #[test]
    fn missing_end_is_not_found() {
        let err = extract_between("var ytInitialPlayerResponse = {}", START, END).unwrap_err();
        assert!(matches!(err, ExtractError::MissingEnd));
        assert!(err.is_not_found());
    }

    #[test]
    fn bad_payload_is_distinguishable() {
        let html = "var ytInitialPlayerResponse = {not json};</script>";
        let err = extract_between(html, START, END).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidJson(_)));
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn empty_payload_is_invalid_json() {
        let err = extract_between("var ytInitialPlayerResponse = ;</script>", START, END)
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidJson(_)));
    }

    #[test]
    fn slice_between_returns_raw_text() {
        assert_eq!(slice_between("a[b]c", "[", "]").unwrap(), "b");
    }
}
