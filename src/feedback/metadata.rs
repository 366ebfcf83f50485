//! Learning metadata embedded in fix PR bodies
//!
//! The fix creator appends a hidden HTML comment listing the categories the
//! PR addresses. It is read once, when the PR is registered for tracking.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!-- LEARNING_METADATA: (\{.*?\}) -->").expect("valid metadata marker regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LearningMetadata {
    #[serde(default)]
    pub root_causes: Vec<String>,
    #[serde(default)]
    pub error_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

/// Hidden comment carrying `metadata`
pub fn render(metadata: &LearningMetadata) -> Result<String, serde_json::Error> {
    Ok(format!(
        "<!-- LEARNING_METADATA: {} -->",
        serde_json::to_string(metadata)?
    ))
}

/// First metadata marker in `body`, if present and well-formed
pub fn extract(body: &str) -> Option<LearningMetadata> {
    let json = MARKER.captures(body)?.get(1)?.as_str();
    match serde_json::from_str(json) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed learning metadata");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_then_extract_from_body() {
        let meta = LearningMetadata {
            root_causes: vec!["risky:business_logic".into(), "unknown".into()],
            error_count: 2,
            source_file: Some("App.java".into()),
        };
        let body = format!("## Fix\n\nSome text\n\n{}\n", render(&meta).unwrap());
        assert_eq!(extract(&body), Some(meta));
    }

    #[test]
    fn test_missing_or_malformed_marker() {
        assert_eq!(extract("plain body"), None);
        assert_eq!(extract("<!-- LEARNING_METADATA: {broken} -->"), None);
    }

    #[test]
    fn test_partial_metadata_defaults() {
        let m = extract(r#"<!-- LEARNING_METADATA: {"root_causes":["x"]} -->"#).unwrap();
        assert_eq!(m.root_causes, vec!["x".to_string()]);
        assert_eq!(m.error_count, 0);
        assert_eq!(m.source_file, None);
    }
}
