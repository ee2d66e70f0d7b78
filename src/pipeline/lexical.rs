//! Conversion between the colour-coded HTML the model writes and the Lexical
//! editor JSON stored on the article.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

// Compile regexes once using LazyLock

static BETWEEN_TAGS_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s+<").unwrap());
static PARAGRAPH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").unwrap());
static SPAN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<span\b([^>]*)>(.*?)</span>").unwrap());
static STYLE_COLOR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)style\s*=\s*["'][^"']*?color:\s*([^;"']+)"#).unwrap()
});
static ANY_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn text_node(text: &str, color: Option<&str>) -> Value {
    json!({
        "detail": 0,
        "format": 0,
        "mode": "normal",
        "style": color.map(|c| format!("color:{}", c)).unwrap_or_default(),
        "text": text,
        "type": "text",
        "version": 1,
    })
}

/// Convert `<p><span style="color:...">text</span></p>` HTML into a Lexical
/// root. Only text inside spans is kept; empty spans and paragraphs are
/// dropped.
pub fn html_to_lexical(html: &str) -> Value {
    let clean = BETWEEN_TAGS_REGEX.replace_all(html.trim(), "><");

    let paragraphs: Vec<Value> = PARAGRAPH_REGEX
        .captures_iter(&clean)
        .filter_map(|paragraph| {
            let children: Vec<Value> = SPAN_REGEX
                .captures_iter(&paragraph[1])
                .filter_map(|span| {
                    let color = STYLE_COLOR_REGEX
                        .captures(&span[1])
                        .map(|c| c[1].trim().to_string());
                    let text = decode_entities(&ANY_TAG_REGEX.replace_all(&span[2], ""));
                    let text = text.trim();
                    (!text.is_empty()).then(|| text_node(text, color.as_deref()))
                })
                .collect();
            (!children.is_empty()).then(|| {
                json!({
                    "children": children,
                    "direction": "ltr",
                    "format": "",
                    "indent": 0,
                    "type": "paragraph",
                    "version": 1,
                })
            })
        })
        .collect();

    json!({
        "root": {
            "children": paragraphs,
            "direction": "ltr",
            "format": "",
            "indent": 0,
            "type": "root",
            "version": 1,
        }
    })
}

fn collect_text<'a>(node: &'a Value, out: &mut Vec<&'a str>) {
    if node.get("type").and_then(Value::as_str) == Some("text")
        && let Some(text) = node.get("text").and_then(Value::as_str)
        && !text.is_empty()
    {
        out.push(text);
    }
    if let Some(children) = node.get("children").and_then(Value::as_array) {
        for child in children {
            collect_text(child, out);
        }
    }
}

/// Text of a Lexical document as the editor displays it, whitespace
/// normalised. Returns an empty string for anything that is not a Lexical
/// root.
pub fn display_text(lexical: &Value) -> String {
    let Some(root) = lexical.get("root") else {
        return String::new();
    };
    let mut parts = Vec::new();
    collect_text(root, &mut parts);
    WHITESPACE_REGEX
        .replace_all(&parts.join(" "), " ")
        .trim()
        .to_string()
}
