//! XML tool-call parser.
//!
//! Extracts structured tool invocations of the form
//!
//! ```text
//! <tool_call>
//!   <name>web_search</name>
//!   <params>
//!     <query><![CDATA[rust optimistic locking]]></query>
//!   </params>
//! </tool_call>
//! ```
//!
//! from free-form LLM output. A strict well-formed pass runs first; when the
//! model emits sloppy XML (unclosed tags, stray text) a regex-based lenient
//! pass takes over, bounding unclosed tags by the next sibling tag at equal
//! or lower indentation. Values may be CDATA-wrapped; `true`/`false` and
//! bare numbers are coerced. Only the first well-formed call is returned.

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// A tool invocation parsed out of LLM text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    /// The tool name.
    pub name: String,
    /// Parameters as a JSON object.
    pub params: Value,
}

/// Tag names: letter/underscore start, then word chars or dashes, ≤ 20 chars.
const TAG_PATTERN: &str = r"[a-zA-Z_][\w\-]{0,19}";

fn any_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(&format!("<({TAG_PATTERN})>"))
            .case_insensitive(true)
            .build()
            .expect("static regex")
    })
}

fn tag_regex(tag: &str, closing: bool) -> Regex {
    let slash = if closing { "/" } else { "" };
    RegexBuilder::new(&format!("<{slash}{}>", regex::escape(tag)))
        .case_insensitive(true)
        .build()
        .expect("static regex")
}

/// Parse the first well-formed tool call in `text`, if any.
///
/// Calls with an empty or missing `<name>` are skipped; additional calls
/// after the first valid one are ignored.
pub fn parse_tool_call(text: &str) -> Option<ParsedToolCall> {
    for block in extract_blocks(text, "tool_call") {
        let call = parse_strict(&block).or_else(|| parse_lenient(&block));
        if let Some(call) = call {
            if !call.name.is_empty() {
                return Some(call);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Block extraction
// ---------------------------------------------------------------------------

/// Extract the inner content of each `<tag>…</tag>` block. A block without
/// a closing tag extends to the next opening tag of the same name or the
/// end of the text.
fn extract_blocks(text: &str, tag: &str) -> Vec<String> {
    let open = tag_regex(tag, false);
    let close = tag_regex(tag, true);

    let mut blocks = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let Some(open_match) = open.find(&text[pos..]) else {
            break;
        };
        let content_start = pos + open_match.end();

        match close.find(&text[content_start..]) {
            Some(close_match) => {
                let content_end = content_start + close_match.start();
                blocks.push(text[content_start..content_end].to_string());
                pos = content_start + close_match.end();
            }
            None => {
                let content_end = match open.find(&text[content_start..]) {
                    Some(next_open) => content_start + next_open.start(),
                    None => text.len(),
                };
                blocks.push(text[content_start..content_end].trim_end().to_string());
                pos = content_end;
            }
        }
    }

    blocks
}

// ---------------------------------------------------------------------------
// Strict pass
// ---------------------------------------------------------------------------

/// Parse a block that is fully well-formed: every tag closed, nothing but
/// whitespace between parameters. Returns `None` on the first irregularity
/// so the lenient pass can take over.
fn parse_strict(block: &str) -> Option<ParsedToolCall> {
    let name = closed_tag_content(block, "name")?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }

    let params = match closed_tag_content(block, "params") {
        Some(params_content) => parse_params_strict(&params_content)?,
        None => {
            // Params are optional, but a dangling open tag is not strict.
            if tag_regex("params", false).is_match(block) {
                return None;
            }
            Map::new()
        }
    };

    Some(ParsedToolCall {
        name: name.to_string(),
        params: Value::Object(params),
    })
}

/// Inner content of `<tag>…</tag>` when both tags are present.
fn closed_tag_content(text: &str, tag: &str) -> Option<String> {
    let open = tag_regex(tag, false).find(text)?;
    let rest = &text[open.end()..];
    let close = tag_regex(tag, true).find(rest)?;
    Some(rest[..close.start()].to_string())
}

/// Parse a strict parameter list: a sequence of closed sibling tags with
/// only whitespace between them.
fn parse_params_strict(content: &str) -> Option<Map<String, Value>> {
    let mut params = Map::new();
    let mut pos = 0;

    loop {
        let rest = &content[pos..];
        if rest.trim().is_empty() {
            break;
        }

        let tag_match = any_tag_regex().find(rest)?;
        // Stray text before the tag breaks strictness.
        if !rest[..tag_match.start()].trim().is_empty() {
            return None;
        }

        let tag_name = any_tag_regex()
            .captures(rest)?
            .get(1)?
            .as_str()
            .to_string();

        let value_start = pos + tag_match.end();
        let close = tag_regex(&tag_name, true).find(&content[value_start..])?;
        let raw_value = &content[value_start..value_start + close.start()];

        params.insert(tag_name.clone(), parse_param_value(&tag_name, raw_value));
        pos = value_start + close.end();
    }

    Some(params)
}

// ---------------------------------------------------------------------------
// Lenient pass
// ---------------------------------------------------------------------------

/// Regex-based lenient parse for sloppy model output.
fn parse_lenient(block: &str) -> Option<ParsedToolCall> {
    let name = extract_simple_tag(block, "name")?;
    if name.is_empty() {
        return None;
    }

    let params = match extract_blocks(block, "params").into_iter().next() {
        Some(params_content) => {
            let mut params = Map::new();
            for (tag, raw_value) in extract_sibling_tags(&params_content) {
                params.insert(tag.clone(), parse_param_value(&tag, &raw_value));
            }
            params
        }
        None => Map::new(),
    };

    Some(ParsedToolCall {
        name,
        params: Value::Object(params),
    })
}

/// Extract a simple single-line tag. Without a closing tag, the value is
/// the first non-empty line before the next tag.
fn extract_simple_tag(text: &str, tag: &str) -> Option<String> {
    let open = tag_regex(tag, false).find(text)?;
    let rest = &text[open.end()..];

    if let Some(close) = tag_regex(tag, true).find(rest) {
        return Some(rest[..close.start()].trim().to_string());
    }

    let remaining = rest.trim_start();
    let newline_pos = remaining.find('\n').unwrap_or(remaining.len());
    let next_tag_pos = any_tag_regex()
        .find(remaining)
        .map(|m| m.start())
        .unwrap_or(remaining.len());

    Some(remaining[..newline_pos.min(next_tag_pos)].trim().to_string())
}

/// Extract all top-level sibling tags from `text` as `(name, raw value)`.
///
/// A tag without a closing tag is bounded by the next tag at equal or lower
/// indentation, so nested children are not mistaken for siblings.
fn extract_sibling_tags(text: &str) -> Vec<(String, String)> {
    let mut results = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let Some(captures) = any_tag_regex().captures(&text[pos..]) else {
            break;
        };
        let whole = captures.get(0).expect("match group 0");
        let tag_name = captures.get(1).expect("match group 1").as_str().to_string();
        let tag_start = pos + whole.start();
        let content_start = pos + whole.end();

        match tag_regex(&tag_name, true).find(&text[content_start..]) {
            Some(close) => {
                let content_end = content_start + close.start();
                results.push((tag_name, text[content_start..content_end].to_string()));
                pos = content_start + close.end();
            }
            None => {
                let content_end = boundary_by_indent(text, content_start, tag_start);
                results.push((
                    tag_name,
                    text[content_start..content_end].trim_end().to_string(),
                ));
                pos = content_end.max(content_start + 1);
            }
        }
    }

    results
}

/// For an unclosed tag starting at `tag_start`, find the position of the
/// next tag whose indentation is ≤ the unclosed tag's indentation.
fn boundary_by_indent(text: &str, content_start: usize, tag_start: usize) -> usize {
    let current_indent = indent_of(text, tag_start);

    let mut pos = content_start;
    while pos < text.len() {
        let Some(found) = any_tag_regex().find(&text[pos..]) else {
            return text.len();
        };
        let tag_pos = pos + found.start();
        if indent_of(text, tag_pos) <= current_indent {
            return tag_pos;
        }
        // Deeper-nested tag; keep scanning.
        pos = tag_pos + 1;
    }

    text.len()
}

/// Column of `offset` relative to the start of its line.
fn indent_of(text: &str, offset: usize) -> usize {
    let line_start = text[..offset].rfind('\n').map(|p| p + 1).unwrap_or(0);
    offset - line_start
}

// ---------------------------------------------------------------------------
// Value parsing
// ---------------------------------------------------------------------------

/// Parse a raw parameter value. Parameters whose name mentions "list" parse
/// as arrays of `<item>`-style children; everything else is a coerced
/// scalar.
fn parse_param_value(name: &str, raw: &str) -> Value {
    if name.to_lowercase().contains("list") {
        parse_list_value(raw)
    } else {
        parse_scalar(raw)
    }
}

/// Parse a list parameter: nested child tags (any name) become items; a
/// bare `[a, b]` body falls back to a comma-split for older call formats.
fn parse_list_value(raw: &str) -> Value {
    let items: Vec<Value> = extract_sibling_tags(raw)
        .into_iter()
        .map(|(_, content)| parse_scalar(&content))
        .collect();

    if !items.is_empty() {
        return Value::Array(items);
    }

    let trimmed = raw.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let items: Vec<Value> = inner
            .split(',')
            .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\''))
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();
        return Value::Array(items);
    }

    Value::Array(Vec::new())
}

/// Strip a CDATA wrapper, then coerce booleans and numbers.
fn parse_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    let unwrapped = strip_cdata(trimmed).unwrap_or(trimmed);
    coerce(unwrapped)
}

/// The literal interior of `<![CDATA[…]]>`, if `value` is one.
fn strip_cdata(value: &str) -> Option<&str> {
    value
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
}

/// Coerce `true`/`false` to booleans and digit strings to numbers.
fn coerce(value: &str) -> Value {
    if value.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    let has_float_marker = value.contains('.') || value.to_lowercase().contains('e');
    if !has_float_marker {
        if let Ok(int) = value.parse::<i64>() {
            return Value::Number(int.into());
        }
    } else if let Ok(float) = value.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }

    Value::String(value.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
