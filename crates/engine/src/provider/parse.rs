/// Result of parsing a provider response as a list-of-strings literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedList {
    /// The `<done>` sentinel — further iterations would not improve the
    /// answer.
    Done,
    /// A parsed list, possibly empty (empty on any parse failure too —
    /// the two cases are indistinguishable to the caller by design).
    Items(Vec<String>),
}

impl ParsedList {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Items(items) if items.is_empty())
    }
}

/// Strip a single leading/trailing fenced code block (``` or ```python)
/// around a list literal, if present.
fn clean_markdown_response(response: &str) -> String {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let lines: Vec<&str> = trimmed.lines().collect();
    let mut start_idx = 0;
    for (i, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with('[') {
            start_idx = i;
            break;
        }
    }

    let mut end_idx = lines.len();
    for (i, line) in lines.iter().enumerate().rev() {
        let t = line.trim();
        if t.ends_with(']') {
            end_idx = i + 1;
            break;
        } else if t == "```" {
            end_idx = i;
            break;
        }
    }

    lines[start_idx..end_idx].join("\n").trim().to_string()
}

/// Parse a provider response as a list of strings, handling markdown
/// fences and the `<done>` sentinel. Never propagates an error: any
/// parse failure is logged and degrades to an empty list.
pub fn parse_list_response(response: &str) -> ParsedList {
    if response.trim().is_empty() {
        tracing::warn!("empty response received for list parsing");
        return ParsedList::Items(Vec::new());
    }

    let trimmed = response.trim();
    if trimmed == "<done>" {
        return ParsedList::Done;
    }

    let cleaned = clean_markdown_response(response);

    match serde_json::from_str::<Vec<String>>(&cleaned) {
        Ok(items) => {
            tracing::debug!(count = items.len(), "parsed list response");
            ParsedList::Items(items)
        }
        Err(_) => match try_parse_single_quoted_list(&cleaned) {
            Some(items) => ParsedList::Items(items),
            None => {
                tracing::warn!(response = %response, "failed to parse list from provider response");
                ParsedList::Items(Vec::new())
            }
        },
    }
}

/// Planner prompts frequently ask for a Python-style list literal, which
/// may use single-quoted strings — not valid JSON. Fall back to a small
/// hand-rolled parser for exactly that shape before giving up.
fn try_parse_single_quoted_list(text: &str) -> Option<Vec<String>> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut items = Vec::new();
    for raw in split_top_level_commas(inner) {
        let item = raw.trim();
        let unquoted = item
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| item.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?;
        items.push(unquoted.to_string());
    }
    Some(items)
}

fn split_top_level_commas(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes: Option<char> = None;

    for c in text.chars() {
        match in_quotes {
            Some(q) if c == q => {
                in_quotes = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    in_quotes = Some(c);
                    current.push(c);
                }
                ',' => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Fallback-on-error substrings (§4.1): a case-insensitive match against
/// any of these in the provider's response text triggers the one-shot
/// fallback-model retry, same as an empty response does.
pub fn looks_like_retryable_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["rate limit", "context length", "max tokens"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_done_sentinel() {
        assert_eq!(parse_list_response("<done>"), ParsedList::Done);
        assert_eq!(parse_list_response("  <done>  "), ParsedList::Done);
    }

    #[test]
    fn parses_plain_json_list() {
        assert_eq!(
            parse_list_response(r#"["a", "b"]"#),
            ParsedList::Items(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn parses_fenced_list() {
        let response = "```python\n[\"q1\", \"q2\"]\n```";
        assert_eq!(
            parse_list_response(response),
            ParsedList::Items(vec!["q1".into(), "q2".into()])
        );
    }

    #[test]
    fn parses_single_quoted_list() {
        assert_eq!(
            parse_list_response("['q1', 'q2']"),
            ParsedList::Items(vec!["q1".into(), "q2".into()])
        );
    }

    #[test]
    fn empty_response_yields_empty_list() {
        assert_eq!(parse_list_response(""), ParsedList::Items(Vec::new()));
    }

    #[test]
    fn garbage_yields_empty_list_not_error() {
        assert_eq!(
            parse_list_response("not a list at all"),
            ParsedList::Items(Vec::new())
        );
    }

    #[test]
    fn non_list_literal_yields_empty_list() {
        assert_eq!(parse_list_response(r#"{"a": 1}"#), ParsedList::Items(Vec::new()));
    }

    #[test]
    fn detects_retryable_error_phrases_case_insensitively() {
        assert!(looks_like_retryable_error("Rate Limit exceeded"));
        assert!(looks_like_retryable_error("the CONTEXT LENGTH is too long"));
        assert!(looks_like_retryable_error("hit max tokens"));
        assert!(!looks_like_retryable_error("here is your answer"));
    }
}
