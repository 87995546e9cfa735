//! Reply post-processing — transport-artifact stripping, truncation
//! policies, and adjacent-sentence dedup.
//!
//! Everything here is deterministic and side-effect-free: the same input
//! and policy always produce the same output.

use std::sync::OnceLock;

use regex::Regex;

/// How a reply is cut down before emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TruncationPolicy {
    /// Prefer one complete first sentence over the char budget.
    pub short_turn: bool,
    /// Character budget (not bytes); no limit when unset.
    pub max_chars: Option<usize>,
}

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A sentence terminator followed by whitespace or end-of-text.
    RE.get_or_init(|| Regex::new(r"(?s)(.+?[.!?])(\s|$)").expect("valid regex"))
}

fn clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[,;:\-]\s*").expect("valid regex"))
}

fn chunk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^.!?\n]+[.!?…]?").expect("valid regex"))
}

fn meta_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(model|created_at|done|total_duration)=[^\s,]+").expect("valid regex")
    })
}

fn message_wrapper_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"message=Message\([^)]*\)").expect("valid regex"))
}

fn punct_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([!?.]){2,}").expect("valid regex"))
}

fn space_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]{2,}").expect("valid regex"))
}

/// Remove transport debris a model endpoint can leak into reply text and
/// normalize typography to plain ASCII punctuation.
pub fn strip_artifacts(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let s = message_wrapper_re().replace_all(raw, "");
    let s = meta_token_re().replace_all(&s, "");

    // Single logical line: join non-empty lines with one space.
    let s = s
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let s = s
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{2014}', '\u{2013}'], "-");

    let s = punct_run_re().replace_all(&s, "$1");
    let s = space_run_re().replace_all(&s, " ");
    s.trim().to_string()
}

/// Apply the truncation policy.
///
/// Short-turn keeps the whole first sentence even past the char budget;
/// with no terminator anywhere it falls back to the first clause, marked
/// with an ellipsis when it lacks terminal punctuation. Otherwise the cut
/// lands on the last sentence boundary inside the budget, then on the
/// first full sentence of the original text, then on a hard cut plus
/// ellipsis.
pub fn truncate(text: &str, policy: &TruncationPolicy) -> String {
    let t = text.trim();
    if t.is_empty() {
        return String::new();
    }

    if policy.short_turn {
        if let Some(cap) = sentence_re().captures(t) {
            return cap[1].trim().to_string();
        }
        let fragment = clause_re().splitn(t, 2).next().unwrap_or(t);
        return close_fragment(fragment, t);
    }

    match policy.max_chars {
        Some(max_chars) if max_chars > 0 && t.chars().count() > max_chars => {
            let snippet: String = t.chars().take(max_chars).collect();
            if let Some(pos) = snippet.rfind(['.', '!', '?']) {
                if pos > 0 {
                    return snippet[..=pos].trim().to_string();
                }
            }
            if let Some(cap) = sentence_re().captures(t) {
                return cap[1].trim().to_string();
            }
            close_fragment(&snippet, t)
        }
        _ => t.to_string(),
    }
}

/// Tidy a cut fragment: mark an actual cut with an ellipsis, but leave an
/// uncut terminator-less text alone so output never outgrows input.
fn close_fragment(fragment: &str, original: &str) -> String {
    let s = fragment.trim();
    if s.ends_with(['.', '!', '?']) {
        return s.to_string();
    }
    let stripped = s.trim_end_matches([' ', ',', ';', ':']);
    if stripped.len() < original.trim().len() {
        format!("{stripped}…")
    } else {
        stripped.to_string()
    }
}

/// Drop sentences textually identical to the immediately preceding one.
///
/// Adjacent-only: models occasionally repeat a sentence verbatim inside a
/// single turn; a repeat further away is treated as intentional.
pub fn dedupe(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let mut kept: Vec<&str> = Vec::new();
    let mut prev: Option<&str> = None;
    for chunk in chunk_re().find_iter(text) {
        let s = chunk.as_str().trim();
        if s.is_empty() {
            continue;
        }
        if prev == Some(s) {
            continue;
        }
        kept.push(s);
        prev = Some(s);
    }

    if kept.is_empty() {
        return text.trim().to_string();
    }
    kept.join(" ")
}

/// The full per-reply pipeline: strip, truncate, dedupe.
pub fn sanitize(raw: &str, policy: &TruncationPolicy) -> String {
    dedupe(&truncate(&strip_artifacts(raw), policy))
}
