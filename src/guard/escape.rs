//! Context-aware output escaping.
//!
//! Containers are escaped recursively: array elements and object values are
//! escaped, object keys are kept as they are. Unknown context names fall back
//! to HTML escaping.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

/// Where the escaped value will be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputContext {
    #[default]
    Html,
    Js,
    Url,
    Css,
}

impl OutputContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputContext::Html => "html",
            OutputContext::Js => "js",
            OutputContext::Url => "url",
            OutputContext::Css => "css",
        }
    }

    /// Parse a context name, defaulting to HTML for anything unknown.
    pub fn parse_lenient(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl FromStr for OutputContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(OutputContext::Html),
            "js" | "javascript" => Ok(OutputContext::Js),
            "url" => Ok(OutputContext::Url),
            "css" => Ok(OutputContext::Css),
            other => Err(format!("unknown output context '{}'", other)),
        }
    }
}

impl fmt::Display for OutputContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escape an arbitrary JSON value for `context`.
pub fn escape_value(value: &Value, context: OutputContext) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| escape_value(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), escape_value(v, context)))
                .collect(),
        ),
        Value::String(s) => Value::String(escape_str(s, context)),
        Value::Null => Value::String(match context {
            OutputContext::Js => "null".to_string(),
            _ => String::new(),
        }),
        // Numbers and booleans: Js keeps the JSON literal, the rest escape its text.
        scalar => Value::String(match context {
            OutputContext::Js => scalar.to_string(),
            _ => escape_str(&scalar.to_string(), context),
        }),
    }
}

/// Escape a string for `context`.
pub fn escape_str(input: &str, context: OutputContext) -> String {
    match context {
        OutputContext::Html => escape_html(input),
        OutputContext::Js => escape_js(input),
        OutputContext::Url => escape_url(input),
        OutputContext::Css => escape_css(input),
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// JSON string literal with markup-significant characters hex-escaped.
pub fn escape_js(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('"');
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\u0022"),
            '\'' => out.push_str("\\u0027"),
            '<' => out.push_str("\\u003C"),
            '>' => out.push_str("\\u003E"),
            '&' => out.push_str("\\u0026"),
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || !c.is_ascii() => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Form-style percent-encoding (space becomes `+`).
pub fn escape_url(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

/// Strip everything outside `[A-Za-z0-9_-]`.
pub fn escape_css(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_html_script_tag() {
        let escaped = escape_str(r#"<script>alert("xss")</script>"#, OutputContext::Html);
        assert_eq!(escaped, "&lt;script&gt;alert(&quot;xss&quot;)&lt;/script&gt;");
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
        assert!(!escaped.contains('"'));
    }

    #[test]
    fn test_html_ampersand_first() {
        assert_eq!(escape_html("a&lt;b 'c'"), "a&amp;lt;b &apos;c&apos;");
    }

    #[test]
    fn test_js_context() {
        let escaped = escape_str("'; alert('xss'); '", OutputContext::Js);
        assert!(!escaped.contains("alert('xss')"));
        assert_eq!(escaped, r#""\u0027; alert(\u0027xss\u0027); \u0027""#);

        let tag = escape_str("</script><b>&", OutputContext::Js);
        assert_eq!(tag, r#""\u003C\/script\u003E\u003Cb\u003E\u0026""#);
    }

    #[test]
    fn test_js_non_ascii_and_controls() {
        assert_eq!(escape_js("é\u{1}"), r#""\u00e9\u0001""#);
        assert_eq!(escape_js("😀"), r#""\ud83d\ude00""#);
        assert_eq!(escape_js("a\\\"b\n"), r#""a\\\u0022b\n""#);
    }

    #[test]
    fn test_url_context() {
        let escaped = escape_str(r#"javascript:alert("xss") now"#, OutputContext::Url);
        assert_eq!(escaped, "javascript%3Aalert%28%22xss%22%29+now");
        assert!(!escaped.contains(':'));
    }

    #[test]
    fn test_css_context() {
        assert_eq!(
            escape_str("red;} body{background:url(evil)}", OutputContext::Css),
            "redbodybackgroundurlevil"
        );
        assert_eq!(escape_str("main-title_2", OutputContext::Css), "main-title_2");
    }

    #[test]
    fn test_unknown_context_defaults_to_html() {
        let ctx = OutputContext::parse_lenient("xml");
        assert_eq!(ctx, OutputContext::Html);
        assert_eq!(escape_str("<b>", ctx), "&lt;b&gt;");
        assert_eq!(OutputContext::parse_lenient(" JS "), OutputContext::Js);
    }

    #[test]
    fn test_recursive_containers() {
        let data = json!({
            "title": "<h1>",
            "tags": ["<a>", {"inner": "\"q\""}],
            "count": 3,
            "missing": null
        });
        let escaped = escape_value(&data, OutputContext::Html);
        assert_eq!(
            escaped,
            json!({
                "title": "&lt;h1&gt;",
                "tags": ["&lt;a&gt;", {"inner": "&quot;q&quot;"}],
                "count": "3",
                "missing": ""
            })
        );

        let js = escape_value(&json!([true, 1.5, "<"]), OutputContext::Js);
        assert_eq!(js, json!(["true", "1.5", "\"\\u003C\""]));
    }
}
