//! src/extraction.rs
//!
//! Answer extraction from structured LLM responses.
//!
//! Completions are expected to follow the `<reasoning>...</reasoning>` `<answer>...</answer>`
//! format requested by the system prompt. Extraction is lenient: it never fails, it only
//! reports whether it found a well-formed answer region or had to fall back.
//!
//! # Extraction strategy:
//! 1. Take the content between the first `<answer>` and the first `</answer>` after it.
//! 2. Otherwise take the text after the last `<answer>` (or the whole text), cut at a
//!    stray `</answer>` if there is one.
//!
//! In both cases the result is whitespace-trimmed.
//!
//! # Examples
//! ```
//! use icdrlrewards::extraction::extract_answer;
//!
//! let completion = "<reasoning>chest pain</reasoning>\n<answer> [I20.9] </answer>";
//! assert_eq!(extract_answer(completion), "[I20.9]");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

const ANSWER_OPEN: &str = "<answer>";
const ANSWER_CLOSE: &str = "</answer>";

// Content within the first complete <answer>...</answer> pair
static ANSWER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<answer>(.*?)</answer>").unwrap());

// Content within every <reasoning>...</reasoning> region, newlines included
static REASONING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<reasoning>(.*?)</reasoning>").unwrap());

/// Result of answer extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extraction<'a> {
    /// A complete `<answer>...</answer>` pair was found.
    Tagged(&'a str),
    /// No complete pair; best-effort remainder of the text.
    Degraded(&'a str),
}

impl<'a> Extraction<'a> {
    pub fn parse(text: &'a str) -> Self {
        if let Some(captures) = ANSWER_PATTERN.captures(text) {
            let inner = captures.get(1).map_or("", |m| m.as_str());
            return Extraction::Tagged(inner.trim());
        }

        let tail = text
            .rsplit_once(ANSWER_OPEN)
            .map_or(text, |(_, after)| after);
        let tail = tail.split_once(ANSWER_CLOSE).map_or(tail, |(before, _)| before);

        Extraction::Degraded(tail.trim())
    }

    pub fn text(&self) -> &'a str {
        match self {
            Extraction::Tagged(s) | Extraction::Degraded(s) => *s,
        }
    }

    pub fn is_tagged(&self) -> bool {
        matches!(self, Extraction::Tagged(_))
    }
}

/// Extracts the answer segment of a completion, trimmed. Never fails.
pub fn extract_answer(text: &str) -> String {
    Extraction::parse(text).text().to_string()
}

/// True if `text` has at least one `<reasoning>` region whose trimmed content is non-empty.
pub fn has_reasoning_content(text: &str) -> bool {
    REASONING_PATTERN
        .captures_iter(text)
        .any(|caps| caps.get(1).is_some_and(|m| !m.as_str().trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tagged_answer() {
        let text = "<reasoning>x</reasoning><answer>\n  [A10, B20]\n</answer>";
        assert_eq!(Extraction::parse(text), Extraction::Tagged("[A10, B20]"));
    }

    #[test]
    fn only_first_pair_is_honored() {
        let text = "<answer>first</answer> then <answer>second</answer>";
        assert_eq!(extract_answer(text), "first");
    }

    #[test]
    fn empty_pair_gives_empty_string() {
        let extraction = Extraction::parse("<answer></answer>");
        assert!(extraction.is_tagged());
        assert_eq!(extraction.text(), "");
    }

    #[test]
    fn no_markers_degrades_to_trimmed_text() {
        let extraction = Extraction::parse("  I10, E11.9 \n");
        assert_eq!(extraction, Extraction::Degraded("I10, E11.9"));
    }

    #[test]
    fn missing_close_takes_remainder_after_last_open() {
        let text = "<answer>draft <answer> J45.909 ";
        assert_eq!(Extraction::parse(text), Extraction::Degraded("J45.909"));
    }

    #[test]
    fn missing_open_cuts_at_close() {
        let text = "K21.9 </answer> trailing";
        assert_eq!(Extraction::parse(text), Extraction::Degraded("K21.9"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let inputs = [
            "<answer>[A10]</answer>",
            "no tags at all",
            "<answer>unterminated",
            "",
        ];
        for text in inputs {
            assert_eq!(extract_answer(text), extract_answer(text));
            let once = extract_answer(text);
            assert_eq!(extract_answer(&once), once);
        }
    }

    #[test]
    fn reasoning_requires_non_blank_content() {
        assert!(has_reasoning_content("<reasoning>a</reasoning>"));
        assert!(has_reasoning_content("<reasoning>\nline one\nline two\n</reasoning>"));
        assert!(!has_reasoning_content("<reasoning>  \n </reasoning>"));
        assert!(!has_reasoning_content("<reasoning>unterminated"));
        assert!(!has_reasoning_content("plain text"));
    }

    #[test]
    fn any_non_blank_reasoning_region_counts() {
        let text = "<reasoning> </reasoning><reasoning>second</reasoning>";
        assert!(has_reasoning_content(text));
    }
}
