//! Message text utilities: link extraction and search-term highlighting.
//!
//! Both return flat segment lists so consumers can render without parsing
//! anything themselves.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Absolute http(s) URLs, bare www./domain forms, and email addresses.
    Regex::new(
        r"(https?://(?:www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b[-a-zA-Z0-9()@:%_+.~#?&=/]*)|((?:www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b[-a-zA-Z0-9()@:%_+.~#?&=/]*)|([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})",
    )
    .expect("url regex must compile")
});

/// One run of message text: either plain text or a clickable link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TextSegment {
    Text { text: String },
    Link { text: String, href: String },
}

/// Split message text into plain and link segments.
///
/// Bare domains get an `https://` scheme, addresses containing `@` become
/// `mailto:` links, and absolute URLs pass through untouched.  Text with no
/// links comes back as a single [`TextSegment::Text`].
pub fn parse_links(text: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut last_end = 0;

    for found in URL_REGEX.find_iter(text) {
        if found.start() > last_end {
            segments.push(TextSegment::Text {
                text: text[last_end..found.start()].to_string(),
            });
        }

        let url = found.as_str();
        let href = if url.starts_with("http") {
            url.to_string()
        } else if url.contains('@') {
            format!("mailto:{url}")
        } else {
            format!("https://{url}")
        };

        segments.push(TextSegment::Link {
            text: url.to_string(),
            href,
        });
        last_end = found.end();
    }

    if last_end < text.len() {
        segments.push(TextSegment::Text {
            text: text[last_end..].to_string(),
        });
    }

    if segments.is_empty() {
        segments.push(TextSegment::Text {
            text: text.to_string(),
        });
    }

    segments
}

/// One run of text when rendering a search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HighlightSegment {
    Text { text: String },
    Highlight { text: String },
}

/// Split `text` around case-insensitive occurrences of `term` so hits can be
/// rendered highlighted.  An empty term yields the whole text unhighlighted.
pub fn highlight_matches(text: &str, term: &str) -> Vec<HighlightSegment> {
    if term.is_empty() {
        return vec![HighlightSegment::Text {
            text: text.to_string(),
        }];
    }

    let pattern = Regex::new(&format!("(?i){}", regex::escape(term)))
        .expect("escaped search term must compile");

    let mut segments = Vec::new();
    let mut last_end = 0;

    for found in pattern.find_iter(text) {
        if found.start() > last_end {
            segments.push(HighlightSegment::Text {
                text: text[last_end..found.start()].to_string(),
            });
        }
        segments.push(HighlightSegment::Highlight {
            text: found.as_str().to_string(),
        });
        last_end = found.end();
    }

    if last_end < text.len() {
        segments.push(HighlightSegment::Text {
            text: text[last_end..].to_string(),
        });
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_one_segment() {
        let segments = parse_links("just words here");
        assert_eq!(
            segments,
            vec![TextSegment::Text {
                text: "just words here".to_string()
            }]
        );
    }

    #[test]
    fn http_url_becomes_single_link_segment() {
        let segments = parse_links("check this http://x.co");

        let links: Vec<_> = segments
            .iter()
            .filter_map(|s| match s {
                TextSegment::Link { href, .. } => Some(href.as_str()),
                TextSegment::Text { .. } => None,
            })
            .collect();
        assert_eq!(links, vec!["http://x.co"]);
        assert_eq!(
            segments[0],
            TextSegment::Text {
                text: "check this ".to_string()
            }
        );
    }

    #[test]
    fn bare_domain_gets_https_scheme() {
        let segments = parse_links("see www.example.com for details");
        match &segments[1] {
            TextSegment::Link { text, href } => {
                assert_eq!(text, "www.example.com");
                assert_eq!(href, "https://www.example.com");
            }
            other => panic!("expected link, got {other:?}"),
        }
    }

    #[test]
    fn email_becomes_mailto() {
        let segments = parse_links("write to someone@example.com please");
        match &segments[1] {
            TextSegment::Link { href, .. } => assert_eq!(href, "mailto:someone@example.com"),
            other => panic!("expected link, got {other:?}"),
        }
    }

    #[test]
    fn highlight_is_case_insensitive_and_keeps_original_casing() {
        let segments = highlight_matches("Hello World, hello again", "hello");
        assert_eq!(
            segments,
            vec![
                HighlightSegment::Highlight {
                    text: "Hello".to_string()
                },
                HighlightSegment::Text {
                    text: " World, ".to_string()
                },
                HighlightSegment::Highlight {
                    text: "hello".to_string()
                },
                HighlightSegment::Text {
                    text: " again".to_string()
                },
            ]
        );
    }

    #[test]
    fn highlight_escapes_regex_metacharacters() {
        let segments = highlight_matches("cost is $5 (approx)", "$5 (approx)");
        assert_eq!(
            segments,
            vec![
                HighlightSegment::Text {
                    text: "cost is ".to_string()
                },
                HighlightSegment::Highlight {
                    text: "$5 (approx)".to_string()
                },
            ]
        );
    }
}
