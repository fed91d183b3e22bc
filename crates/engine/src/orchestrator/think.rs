use regex::Regex;
use std::sync::OnceLock;

fn think_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static pattern"))
}

/// Strip `<think>...</think>` spans (dotall matching) for internal
/// control-flow decisions. The raw text, tags included, is still what gets
/// forwarded on the SSE channel (§4.4 — "think-tag leakage" is deliberate).
pub fn strip_think_tags(text: &str) -> String {
    think_pattern().replace_all(text, "").trim().to_string()
}

pub fn wrap_think(text: &str) -> String {
    format!("<think>{}</think>", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_think_span() {
        let input = "<think>reasoning here</think>The actual plan.";
        assert_eq!(strip_think_tags(input), "The actual plan.");
    }

    #[test]
    fn strips_multiline_think_span() {
        let input = "<think>line one\nline two\nline three</think>Plan body";
        assert_eq!(strip_think_tags(input), "Plan body");
    }

    #[test]
    fn leaves_text_without_think_tags_untouched() {
        assert_eq!(strip_think_tags("<done>"), "<done>");
    }

    #[test]
    fn strips_multiple_think_spans() {
        let input = "<think>a</think>middle<think>b</think>end";
        assert_eq!(strip_think_tags(input), "middleend");
    }
}
