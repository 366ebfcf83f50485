//! Splits raw compiler output into discrete error blocks
//!
//! A block starts at a line shaped like `<file>:<line>:` and runs until the
//! next such line. Blank lines and trailing `N errors` summaries are dropped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

static BLOCK_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<file>\S.*?):(?P<line>\d+):").expect("valid block regex"));

static SUMMARY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+ (errors?|warnings?)$").expect("valid summary regex"));

/// One compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBlock {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl ErrorBlock {
    /// Short stable identifier for the message text
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.message.as_bytes());
        hex::encode(digest)[..8].to_string()
    }
}

struct Pending {
    file: String,
    line: Option<u32>,
    lines: Vec<String>,
}

impl Pending {
    fn finish(self) -> ErrorBlock {
        ErrorBlock {
            message: self.lines.join("\n").trim().to_string(),
            file: Some(self.file),
            line: self.line,
        }
    }
}

/// Parse every error block out of compiler output.
///
/// Output without any `<file>:<line>:` header but with content is returned
/// as a single block so it still gets classified.
pub fn parse_errors(output: &str) -> Vec<ErrorBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<Pending> = None;

    for line in output.lines() {
        if let Some(caps) = BLOCK_START.captures(line) {
            if let Some(done) = current.take() {
                blocks.push(done.finish());
            }
            current = Some(Pending {
                file: caps["file"].to_string(),
                line: caps["line"].parse().ok(),
                lines: vec![line.to_string()],
            });
        } else if let Some(pending) = current.as_mut() {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !SUMMARY_LINE.is_match(trimmed) {
                pending.lines.push(line.to_string());
            }
        }
    }

    if let Some(done) = current.take() {
        blocks.push(done.finish());
    }

    if blocks.is_empty() && !output.trim().is_empty() {
        blocks.push(ErrorBlock {
            message: output.trim().to_string(),
            file: None,
            line: None,
        });
    }

    blocks.retain(|b| !b.message.is_empty());
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAVAC_OUTPUT: &str = "\
src/App.java:12: error: cannot find symbol
        Foo foo = new Foo();
        ^
  symbol:   class Foo
  location: class App
src/App.java:20: error: cannot find symbol
        bar(1);
        ^
  symbol:   method bar(int)
2 errors
";

    #[test]
    fn test_splits_on_file_line_prefix() {
        let blocks = parse_errors(JAVAC_OUTPUT);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].file.as_deref(), Some("src/App.java"));
        assert_eq!(blocks[0].line, Some(12));
        assert!(blocks[0].message.contains("symbol:   class Foo"));
        assert_eq!(blocks[1].line, Some(20));
        assert!(blocks[1].message.contains("method bar(int)"));
        assert!(!blocks[1].message.contains("2 errors"));
    }

    #[test]
    fn test_preamble_before_first_header_is_ignored() {
        let blocks = parse_errors("Compiling...\nApp.java:3: error: ';' expected\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].message, "App.java:3: error: ';' expected");
    }

    #[test]
    fn test_headerless_output_is_one_block() {
        let blocks = parse_errors("error: linker failed\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file, None);
        assert_eq!(blocks[0].message, "error: linker failed");
    }

    #[test]
    fn test_empty_output() {
        assert!(parse_errors("  \n\n").is_empty());
    }

    #[test]
    fn test_fingerprint_is_short_and_stable() {
        let blocks = parse_errors(JAVAC_OUTPUT);
        let fp = blocks[0].fingerprint();
        assert_eq!(fp.len(), 8);
        assert_eq!(fp, blocks[0].fingerprint());
        assert_ne!(fp, blocks[1].fingerprint());
    }
}
