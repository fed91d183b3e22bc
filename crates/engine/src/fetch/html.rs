use scraper::{Html, Selector};

/// Extract the document title, or "Untitled" if none is present.
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").expect("static selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Extract readable text from HTML by removing non-content elements
/// (script, style, nav, footer, header, noscript, svg, aside), the "full
/// mode" HTML-cleaning strategy of §4.3 step 5, ahead of truncation to
/// `max_html_length` and hand-off to the HTML-to-markdown provider call.
pub fn extract_html_content(html: &str) -> String {
    let document = Html::parse_document(html);

    let remove_selectors = [
        "script", "style", "nav", "footer", "header", "noscript", "svg", "aside",
    ];

    let mut skip_ids = std::collections::HashSet::new();
    for sel_str in &remove_selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            for element in document.select(&selector) {
                skip_ids.insert(element.id());
            }
        }
    }

    let mut text_parts = Vec::new();
    for node in document.tree.nodes() {
        let mut should_skip = false;
        let mut check_id = Some(node.id());
        while let Some(id) = check_id {
            if skip_ids.contains(&id) {
                should_skip = true;
                break;
            }
            check_id = document
                .tree
                .get(id)
                .and_then(|n| n.parent())
                .map(|p| p.id());
        }

        if should_skip {
            continue;
        }

        if let Some(text) = node.value().as_text() {
            let trimmed = text.text.trim();
            if !trimmed.is_empty() {
                text_parts.push(trimmed.to_string());
            }
        }
    }

    collapse_whitespace(&text_parts.join(" "))
}

/// InnerText-only extraction used by the HTML branch's "lite" mode
/// (§4.3 step 4): all text contained in `main` (or `body` if there is no
/// `main`), unlike full mode this does not strip nav/footer/aside/script.
pub fn extract_inner_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let root = ["main", "body"].iter().find_map(|sel_str| {
        Selector::parse(sel_str)
            .ok()
            .and_then(|selector| document.select(&selector).next())
    });

    let text = match root {
        Some(el) => el.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    };

    collapse_whitespace(&text)
}

pub fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(c);
            prev_was_space = false;
        }
    }
    result.trim().to_string()
}

/// Truncate to at most `max_len` characters (character-boundary safe),
/// the bound applied before full-mode HTML is sent to the markdownify
/// provider call.
pub fn truncate_chars(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    s.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html>
        <head><title>Test Article</title></head>
        <body>
            <nav>Navigation here</nav>
            <main>
                <h1>Article Title</h1>
                <p>This is the main content of the article.</p>
            </main>
            <aside>Related links</aside>
            <footer>Footer content</footer>
            <script>alert('bad');</script>
        </body>
        </html>
    "#;

    #[test]
    fn extracts_main_content_and_skips_chrome() {
        let text = extract_html_content(SAMPLE);
        assert!(text.contains("Article Title"));
        assert!(text.contains("main content"));
        assert!(!text.contains("Navigation here"));
        assert!(!text.contains("Footer content"));
        assert!(!text.contains("Related links"));
        assert!(!text.contains("alert"));
    }

    #[test]
    fn inner_text_only_selects_main_and_does_not_strip_chrome_within_it() {
        let text = extract_inner_text(SAMPLE);
        assert!(text.contains("Article Title"));
        assert!(text.contains("main content"));
        // main/body scoping excludes the sibling nav/footer/aside/script,
        // but unlike full mode there is no chrome-stripping within the root.
        assert!(!text.contains("Navigation here"));
        assert!(!text.contains("Footer content"));
        assert!(!text.contains("Related links"));
    }

    #[test]
    fn lite_and_full_modes_diverge_when_main_contains_chrome_tags() {
        let html = r#"
            <html><body>
            <main>
                <h1>Title</h1>
                <nav>In-page nav</nav>
                <p>Body text</p>
            </main>
            </body></html>
        "#;
        let lite = extract_inner_text(html);
        let full = extract_html_content(html);
        assert!(lite.contains("In-page nav"), "lite mode keeps nav nested inside main");
        assert!(!full.contains("In-page nav"), "full mode strips nav anywhere in the document");
    }

    #[test]
    fn extracts_title() {
        assert_eq!(extract_title(SAMPLE), "Test Article");
        assert_eq!(extract_title("<html><body></body></html>"), "Untitled");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(collapse_whitespace("hello   world"), "hello world");
        assert_eq!(collapse_whitespace("  hello\n\n  world  "), "hello world");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("short", 50), "short");
    }
}
