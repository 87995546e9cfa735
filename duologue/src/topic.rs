//! Topic adherence — keyword overlap between a reply and the configured
//! discussion topic, plus the corrective-retry policy constants.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Overlap score below which the scheduler issues one corrective retry.
///
/// Heuristic cutoff, not validated against ground truth; tune per
/// deployment rather than relying on it as a correctness boundary.
pub const RETRY_THRESHOLD: f64 = 0.5;

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("valid regex"))
}

fn words(text: &str) -> Vec<String> {
    word_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Fraction of `text`'s words that appear as whole tokens in `topic`,
/// case-insensitively. In `[0, 1]`; `0` when either side is empty.
pub fn score(text: &str, topic: &str) -> f64 {
    let topic_tokens: HashSet<String> = words(topic).into_iter().collect();
    if topic_tokens.is_empty() {
        return 0.0;
    }
    let text_words = words(text);
    if text_words.is_empty() {
        return 0.0;
    }
    let common = text_words
        .iter()
        .filter(|w| topic_tokens.contains(*w))
        .count();
    common as f64 / text_words.len() as f64
}

/// The synthetic user message appended before a corrective retry.
pub fn corrective_prompt(topic: &str) -> String {
    format!(
        "IMPORTANT: Stay strictly on topic: \"{topic}\". \
         Give a short, focused answer only about this topic."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        let s = score("the benefits of remote work are many", "remote work");
        assert!(s > 0.0 && s < 1.0);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn test_score_empty_text() {
        assert_eq!(score("", "anything"), 0.0);
        assert_eq!(score("   ", "anything"), 0.0);
    }

    #[test]
    fn test_score_empty_topic() {
        assert_eq!(score("some words here", ""), 0.0);
    }

    #[test]
    fn test_score_identity() {
        assert_eq!(score("remote work benefits", "remote work benefits"), 1.0);
    }

    #[test]
    fn test_score_case_insensitive() {
        assert_eq!(score("Remote WORK", "remote work"), 1.0);
    }

    #[test]
    fn test_score_partial_overlap() {
        // 2 of 4 words overlap the topic.
        assert_eq!(score("remote work is great", "remote work"), 0.5);
    }

    #[test]
    fn test_corrective_prompt_embeds_topic() {
        let prompt = corrective_prompt("tea ceremonies");
        assert!(prompt.contains("\"tea ceremonies\""));
        assert!(prompt.starts_with("IMPORTANT: Stay strictly on topic"));
    }
}
