//! Rule table mapping compiler error text to a base category and confidence
//!
//! Rules live in one ordered list. Every risky rule is evaluated before any
//! safe rule, so a message that happens to match both is always reported as
//! risky. The matcher enforces that ordering when it is constructed; callers
//! supplying custom rules cannot place a safe rule ahead of a risky one.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Base confidence for any risky match
pub const RISKY_CONFIDENCE: f64 = 0.1;
/// Base confidence for any safe match
pub const SAFE_CONFIDENCE: f64 = 0.9;
/// Base confidence when nothing matched
pub const UNKNOWN_CONFIDENCE: f64 = 0.5;
/// Category reported when nothing matched
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Evaluation class of a rule. Declaration order is evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleClass {
    /// Symbol-kind markers (method/variable "cannot find symbol")
    SymbolMarker,
    Risky,
    Safe,
}

impl RuleClass {
    fn prefix(&self) -> &'static str {
        match self {
            RuleClass::SymbolMarker | RuleClass::Risky => "risky",
            RuleClass::Safe => "safe",
        }
    }

    fn base_confidence(&self) -> f64 {
        match self {
            RuleClass::SymbolMarker | RuleClass::Risky => RISKY_CONFIDENCE,
            RuleClass::Safe => SAFE_CONFIDENCE,
        }
    }
}

/// A single tagged rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    class: RuleClass,
    name: String,
    regex: Regex,
}

impl PatternRule {
    /// Build a rule. Patterns are matched case-insensitively.
    pub fn new(class: RuleClass, name: &str, pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("(?i){}", pattern))?;
        Ok(Self {
            class,
            name: name.to_string(),
            regex,
        })
    }

    pub fn class(&self) -> RuleClass {
        self.class
    }

    /// Category key, e.g. `risky:business_logic`
    pub fn category(&self) -> String {
        format!("{}:{}", self.class.prefix(), self.name)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Result of running the rule table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatch {
    pub category: String,
    pub base_confidence: f64,
    /// `None` when no rule matched
    pub class: Option<RuleClass>,
}

impl PatternMatch {
    fn unknown() -> Self {
        Self {
            category: UNKNOWN_CATEGORY.to_string(),
            base_confidence: UNKNOWN_CONFIDENCE,
            class: None,
        }
    }
}

/// Built-in rules: (class, name, pattern)
const BUILTIN_RULES: &[(RuleClass, &str, &str)] = &[
    (RuleClass::SymbolMarker, "business_logic", r"symbol:\s*(method|variable)"),
    (
        RuleClass::Risky,
        "business_logic",
        r"NullPointerException|IndexOutOfBoundsException|logic error|method.*not found|RuntimeException",
    ),
    (RuleClass::Risky, "security", r"SQL injection|XSS|vulnerability|deprecated|insecure"),
    (RuleClass::Risky, "migration", r"database|schema|ALTER TABLE|migration"),
    (RuleClass::Safe, "missing_import", r"cannot find symbol|import not found|unresolved import"),
    (RuleClass::Safe, "formatting", r"unexpected token|invalid syntax|malformed"),
    (
        RuleClass::Safe,
        "syntax_error",
        r"class.*interface.*enum.*record expected|unexpected.*token|mismatched|unclosed",
    ),
    (RuleClass::Safe, "test_failure", r"AssertionError|Test.*failed|FAILED"),
    (RuleClass::Safe, "lint_issue", r"warning|unused variable|dead code"),
];

static DEFAULT_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    BUILTIN_RULES
        .iter()
        .map(|(class, name, pattern)| {
            PatternRule::new(*class, name, pattern).expect("built-in pattern must compile")
        })
        .collect()
});

/// Stateless ordered rule table
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    rules: Vec<PatternRule>,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }
}

impl PatternMatcher {
    /// Build a matcher from custom rules. The list is stably reordered by
    /// class so relative order within a class is kept.
    pub fn with_rules(mut rules: Vec<PatternRule>) -> Self {
        rules.sort_by_key(|r| r.class);
        Self { rules }
    }

    /// The rules in evaluation order
    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Classify a single error message; first matching rule wins
    pub fn match_text(&self, error_text: &str) -> PatternMatch {
        self.rules
            .iter()
            .find(|rule| rule.is_match(error_text))
            .map(|rule| PatternMatch {
                category: rule.category(),
                base_confidence: rule.class.base_confidence(),
                class: Some(rule.class),
            })
            .unwrap_or_else(PatternMatch::unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_import_is_safe() {
        let m = PatternMatcher::default().match_text("error: cannot find symbol: class Foo");
        assert_eq!(m.category, "safe:missing_import");
        assert_eq!(m.base_confidence, SAFE_CONFIDENCE);
        assert_eq!(m.class, Some(RuleClass::Safe));
    }

    #[test]
    fn test_method_symbol_is_risky() {
        let text = "App.java:10: error: cannot find symbol\n  symbol:   method foo(int)";
        let m = PatternMatcher::default().match_text(text);
        assert_eq!(m.category, "risky:business_logic");
        assert_eq!(m.base_confidence, RISKY_CONFIDENCE);
        assert_eq!(m.class, Some(RuleClass::SymbolMarker));
    }

    #[test]
    fn test_variable_symbol_is_risky() {
        let m = PatternMatcher::default().match_text("cannot find symbol\nsymbol: variable count");
        assert_eq!(m.category, "risky:business_logic");
    }

    #[test]
    fn test_risky_beats_safe_overlap() {
        // "unresolved import" is a safe signal, NullPointerException is risky
        let m = PatternMatcher::default()
            .match_text("java.lang.NullPointerException near unresolved import");
        assert_eq!(m.category, "risky:business_logic");
    }

    #[test]
    fn test_case_insensitive_rules() {
        let m = PatternMatcher::default().match_text("error: alter table users failed");
        assert_eq!(m.category, "risky:migration");
    }

    #[test]
    fn test_unknown_fallback() {
        let m = PatternMatcher::default().match_text("something odd happened");
        assert_eq!(m.category, UNKNOWN_CATEGORY);
        assert_eq!(m.base_confidence, UNKNOWN_CONFIDENCE);
        assert_eq!(m.class, None);
    }

    #[test]
    fn test_custom_rules_reordered_risky_first() {
        let rules = vec![
            PatternRule::new(RuleClass::Safe, "typo", "typo").unwrap(),
            PatternRule::new(RuleClass::Risky, "payments", "payment").unwrap(),
        ];
        let matcher = PatternMatcher::with_rules(rules);
        assert_eq!(matcher.rules()[0].class(), RuleClass::Risky);
        let m = matcher.match_text("typo in payment code");
        assert_eq!(m.category, "risky:payments");
    }

    #[test]
    fn test_default_rule_order() {
        let matcher = PatternMatcher::default();
        let classes: Vec<RuleClass> = matcher.rules().iter().map(|r| r.class()).collect();
        let mut sorted = classes.clone();
        sorted.sort();
        assert_eq!(classes, sorted);
    }
}
