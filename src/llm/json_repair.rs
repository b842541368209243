//! Tolerant JSON recovery for LLM output
//!
//! LLMs routinely emit JSON with markdown fences, trailing commas, or
//! truncation mid-object when the token budget runs out. The repair path
//! tries the raw text, then a trailing-comma cleanup, then truncates at the
//! last closing brace outside a string and re-closes the open brackets.
//! Unrecoverable input surfaces an error for the caller to log and skip.

use serde_json::Value;

use crate::error::{MemoryError, Result};

/// Strip a surrounding markdown code fence (``` or ```json).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the fence line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse possibly malformed JSON, repairing what can be repaired.
pub fn repair_json(raw: &str) -> Result<Value> {
    let text = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }

    let cleaned = remove_trailing_commas(text);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Ok(value);
    }

    // Truncation recovery: cut after the last closing brace/bracket that
    // sits outside a string, then re-close whatever is still open.
    if let Some(cut) = last_closer_outside_string(text) {
        let prefix = &text[..cut];
        let balanced = close_open_brackets(prefix);
        let cleaned = remove_trailing_commas(&balanced);
        if let Ok(value) = serde_json::from_str(&cleaned) {
            return Ok(value);
        }
    }

    Err(MemoryError::InvalidInput(format!(
        "unrecoverable JSON in LLM output ({} chars)",
        raw.len()
    )))
}

/// Remove commas that directly precede a closing brace or bracket,
/// ignoring string contents.
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ',' {
            // Lookahead past whitespace: drop the comma if a closer follows
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    out
}

/// Byte offset just past the last `}` or `]` that is outside any string.
fn last_closer_outside_string(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escape = false;
    let mut last = None;

    for (i, c) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '}' | ']' => last = Some(i + c.len_utf8()),
            _ => {}
        }
    }

    last
}

/// Append the closers for every bracket left open in `prefix`.
fn close_open_brackets(prefix: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for c in prefix.chars() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = prefix.to_string();
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_json_passes_through() {
        let value = repair_json(r#"[{"content": "a"}, {"content": "b"}]"#).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_markdown_fence_stripped() {
        let value = repair_json("```json\n[{\"content\": \"a\"}]\n```").unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_trailing_comma_removed() {
        let value = repair_json(r#"[{"content": "a"}, {"content": "b"},]"#).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_trailing_comma_before_brace() {
        let value = repair_json(r#"[{"content": "a",}]"#).unwrap();
        assert_eq!(value[0]["content"], "a");
    }

    #[test]
    fn test_truncated_mid_object() {
        let value = repair_json(r#"[{"content": "a"}, {"content": "b", "impo"#).unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["content"], "a");
    }

    #[test]
    fn test_truncated_mid_string_value() {
        let value = repair_json(r#"[{"content": "a"}, {"content": "unterminat"#).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_comma_inside_string_preserved() {
        let value = repair_json(r#"[{"content": "a, b, c"}]"#).unwrap();
        assert_eq!(value[0]["content"], "a, b, c");
    }

    #[test]
    fn test_completely_unrecoverable_errors() {
        assert!(repair_json("This is not JSON").is_err());
    }

    #[test]
    fn test_deeply_truncated_object_reclosed() {
        let value = repair_json(r#"{"facts": [{"content": "a"}, {"content"#).unwrap();
        assert_eq!(value["facts"].as_array().unwrap().len(), 1);
    }
}
