//! Session-memory fact extraction.
//!
//! Users declare facts in passing ("my name is Satoshi") and expect them
//! remembered. The recognized sentence shapes are deliberately few; a line
//! that matches none of them simply stores nothing.

use std::sync::OnceLock;

use regex::Regex;

struct FactPattern {
    key: &'static str,
    regex: Regex,
}

fn patterns() -> &'static [FactPattern] {
    static PATTERNS: OnceLock<Vec<FactPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let build = |key, pattern: &str| FactPattern {
            key,
            regex: Regex::new(pattern).expect("literal regex compiles"),
        };
        vec![
            build("user_name", r"(?i)\bmy name is\s+([\w'-]+)"),
            build("user_name", r"(?i)\bcall me\s+([\w'-]+)"),
            build("agent_name", r"(?i)\byour name is\s+([\w'-]+)"),
        ]
    })
}

/// Facts declared in `text`, as `(key, value)` pairs.
///
/// When several shapes for the same key match, the first pattern wins.
pub fn extract_facts(text: &str) -> Vec<(String, String)> {
    let mut facts: Vec<(String, String)> = Vec::new();
    for pattern in patterns() {
        if facts.iter().any(|(key, _)| key == pattern.key) {
            continue;
        }
        if let Some(captures) = pattern.regex.captures(text) {
            if let Some(value) = captures.get(1) {
                facts.push((pattern.key.to_string(), value.as_str().to_string()));
            }
        }
    }
    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_user_name() {
        assert_eq!(
            extract_facts("Hi, my name is Satoshi."),
            vec![("user_name".to_string(), "Satoshi".to_string())]
        );
    }

    #[test]
    fn call_me_variant() {
        assert_eq!(
            extract_facts("Please call me Ken"),
            vec![("user_name".to_string(), "Ken".to_string())]
        );
    }

    #[test]
    fn extracts_agent_name() {
        assert_eq!(
            extract_facts("From now on your name is Gako"),
            vec![("agent_name".to_string(), "Gako".to_string())]
        );
    }

    #[test]
    fn both_names_in_one_line() {
        let facts = extract_facts("My name is Satoshi and your name is Gako");
        assert!(facts.contains(&("user_name".to_string(), "Satoshi".to_string())));
        assert!(facts.contains(&("agent_name".to_string(), "Gako".to_string())));
    }

    #[test]
    fn first_shape_wins_per_key() {
        let facts = extract_facts("my name is Alice, but call me Al");
        assert_eq!(facts, vec![("user_name".to_string(), "Alice".to_string())]);
    }

    #[test]
    fn unrelated_text_stores_nothing() {
        assert!(extract_facts("Add 100 and 200.").is_empty());
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(
            extract_facts("MY NAME IS BOB"),
            vec![("user_name".to_string(), "BOB".to_string())]
        );
    }
}
