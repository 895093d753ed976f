//! Repair of truncated model JSON
//!
//! Vision responses regularly hit the output-length limit mid-payload. The
//! routines here close unterminated strings/objects/arrays by tracking
//! bracket depth with full string/escape state, so that every complete
//! object written before the truncation point survives a re-parse. When even
//! that fails, [`salvage_objects`] scrapes whatever balanced `{...}` spans
//! are still intact.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Array,
    /// Object plus what the parser would expect next at this depth.
    Object(ObjExpect),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ObjExpect {
    Key,
    Colon,
    Value,
    CommaOrEnd,
}

struct Scan {
    stack: Vec<Frame>,
    in_string: bool,
    escape: bool,
    string_is_key: bool,
}

fn scan(input: &str) -> Scan {
    let mut state = Scan {
        stack: Vec::new(),
        in_string: false,
        escape: false,
        string_is_key: false,
    };

    for c in input.chars() {
        if state.in_string {
            if state.escape {
                state.escape = false;
            } else if c == '\\' {
                state.escape = true;
            } else if c == '"' {
                state.in_string = false;
                if let Some(Frame::Object(expect)) = state.stack.last_mut() {
                    *expect = if state.string_is_key {
                        ObjExpect::Colon
                    } else {
                        ObjExpect::CommaOrEnd
                    };
                }
            }
            continue;
        }

        match c {
            '{' => state.stack.push(Frame::Object(ObjExpect::Key)),
            '[' => state.stack.push(Frame::Array),
            '}' | ']' => {
                state.stack.pop();
                if let Some(Frame::Object(expect)) = state.stack.last_mut() {
                    *expect = ObjExpect::CommaOrEnd;
                }
            }
            '"' => {
                state.in_string = true;
                state.escape = false;
                state.string_is_key =
                    matches!(state.stack.last(), Some(Frame::Object(ObjExpect::Key)));
            }
            ':' => {
                if let Some(Frame::Object(expect)) = state.stack.last_mut() {
                    *expect = ObjExpect::Value;
                }
            }
            ',' => {
                if let Some(Frame::Object(expect)) = state.stack.last_mut() {
                    *expect = ObjExpect::Key;
                }
            }
            _ => {}
        }
    }

    state
}

/// Heuristically close an unterminated JSON payload.
///
/// Returns `None` when the input contains no JSON structure at all;
/// otherwise returns a candidate string that strict parsing can be
/// re-attempted on. Already-balanced input comes back unchanged.
pub fn repair_truncated(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if !trimmed.contains('{') && !trimmed.contains('[') {
        return None;
    }

    let state = scan(trimmed);
    if state.stack.is_empty() && !state.in_string {
        return Some(trimmed.to_string());
    }

    let mut repaired = trimmed.to_string();

    if state.in_string {
        repaired.push('"');
        if state.string_is_key {
            // Key cut off mid-string: give it a null value so the object
            // still parses.
            repaired.push_str(":null");
        }
    } else {
        trim_partial_tail(&mut repaired);
        if let Some(Frame::Object(ObjExpect::Colon)) = state.stack.last() {
            // Complete key but the colon never arrived.
            repaired.push_str(":null");
        }
    }

    for frame in state.stack.iter().rev() {
        repaired.push(match frame {
            Frame::Array => ']',
            Frame::Object(_) => '}',
        });
    }

    Some(repaired)
}

/// Remove a trailing partial token (half a number, half a keyword, dangling
/// comma or colon) so the closers appended after it parse cleanly.
fn trim_partial_tail(s: &mut String) {
    while s.ends_with(char::is_whitespace) {
        s.pop();
    }

    // Partial true/false/null keyword.
    let tail_alpha: String = s
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if !tail_alpha.is_empty() && !matches!(tail_alpha.as_str(), "true" | "false" | "null") {
        s.truncate(s.len() - tail_alpha.len());
    }

    // Partial number tail like "12." or "1e".
    while s.ends_with(['.', '-', '+', 'e', 'E']) {
        s.pop();
    }

    while s.ends_with(char::is_whitespace) {
        s.pop();
    }
    if s.ends_with(',') {
        s.pop();
    } else if s.ends_with(':') {
        s.push_str("null");
    }
}

/// Scrape every balanced `{...}` span out of arbitrary text and return the
/// ones that parse as JSON objects. Last-resort salvage when repair fails.
pub fn salvage_objects(input: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let bytes: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != '{' {
            i += 1;
            continue;
        }

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escape = false;
        let mut end = None;

        for (j, &c) in bytes.iter().enumerate().skip(i) {
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
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(j);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(j) => {
                let span: String = bytes[i..=j].iter().collect();
                if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&span) {
                    objects.push(value);
                }
                i = j + 1;
            }
            // Unclosed brace: nothing balanced remains past this point.
            None => break,
        }
    }

    objects
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parses(s: &str) -> bool {
        serde_json::from_str::<Value>(s).is_ok()
    }

    #[test]
    fn test_balanced_input_unchanged() {
        let input = r#"[{"a": 1}, {"b": 2}]"#;
        assert_eq!(repair_truncated(input).unwrap(), input);
    }

    #[test]
    fn test_no_json_structure() {
        assert!(repair_truncated("sorry, I cannot help with that").is_none());
    }

    #[test]
    fn test_truncated_mid_string_value() {
        let input = r#"[{"description": "Widget", "quantity": 4}, {"description": "Slee"#;
        let repaired = repair_truncated(input).unwrap();
        assert!(parses(&repaired), "repaired: {}", repaired);
        let v: Value = serde_json::from_str(&repaired).unwrap();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        // The complete object before the truncation point survives intact.
        assert_eq!(arr[0]["quantity"], 4);
    }

    #[test]
    fn test_truncated_mid_object_after_value() {
        let input = r#"[{"a": 1}, {"b": 2, "c": 3"#;
        let repaired = repair_truncated(input).unwrap();
        assert!(parses(&repaired), "repaired: {}", repaired);
        let v: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(v[0]["a"], 1);
        assert_eq!(v[1]["c"], 3);
    }

    #[test]
    fn test_truncated_after_colon() {
        let input = r#"{"items": [{"qty": 2}], "total":"#;
        let repaired = repair_truncated(input).unwrap();
        assert!(parses(&repaired), "repaired: {}", repaired);
        let v: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(v["items"][0]["qty"], 2);
        assert!(v["total"].is_null());
    }

    #[test]
    fn test_truncated_mid_key() {
        let input = r#"[{"code": "A-1", "quantity": 4}, {"cod"#;
        let repaired = repair_truncated(input).unwrap();
        assert!(parses(&repaired), "repaired: {}", repaired);
        let v: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(v[0]["quantity"], 4);
    }

    #[test]
    fn test_truncated_mid_number() {
        let input = r#"[{"qty": 4, "price": 300."#;
        let repaired = repair_truncated(input).unwrap();
        assert!(parses(&repaired), "repaired: {}", repaired);
    }

    #[test]
    fn test_truncated_mid_keyword() {
        let input = r#"[{"qty": 4, "valid": tru"#;
        let repaired = repair_truncated(input).unwrap();
        assert!(parses(&repaired), "repaired: {}", repaired);
    }

    #[test]
    fn test_trailing_comma_dropped() {
        let input = r#"[{"a": 1},"#;
        let repaired = repair_truncated(input).unwrap();
        assert!(parses(&repaired), "repaired: {}", repaired);
        let v: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_escaped_quote_in_string() {
        let input = r#"[{"description": "6\" bandage", "qty": 1}, {"description": "tru"#;
        let repaired = repair_truncated(input).unwrap();
        assert!(parses(&repaired), "repaired: {}", repaired);
        let v: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(v[0]["description"], "6\" bandage");
    }

    #[test]
    fn test_salvage_objects_skips_broken_spans() {
        let text = r#"
            leading text {"description": "Widget", "quantity": 4}
            noise {"description": "Sleeve", "quantity": 2} and {"broken":
        "#;
        let objects = salvage_objects(text);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["description"], "Widget");
        assert_eq!(objects[1]["quantity"], 2);
    }

    #[test]
    fn test_salvage_objects_nested() {
        let text = r#"{"outer": {"inner": 1}, "x": 2} trailing"#;
        let objects = salvage_objects(text);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["outer"]["inner"], 1);
    }
}
