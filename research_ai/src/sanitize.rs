//! JSON sanitization for LLM output (§4.3 structured-output discipline).
//!
//! Local models reliably produce near-valid JSON wrapped in code fences,
//! with stray backslash escapes, embedded literal newlines inside string
//! values, and trailing commas. None of those are fatal — they're fixed up
//! here before `serde_json::from_str` gets a turn.

/// Strip a ```json ... ``` or ``` ... ``` code-fence wrapper, if present.
pub fn strip_code_fence(raw: &str) -> &str {
  let trimmed = raw.trim();
  let Some(after_open) = trimmed.strip_prefix("```") else {
    return trimmed;
  };
  let after_open = after_open
    .strip_prefix("json")
    .or_else(|| after_open.strip_prefix("JSON"))
    .unwrap_or(after_open);
  let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);
  after_open.strip_suffix("```").unwrap_or(after_open).trim()
}

/// Apply the §4.3(b) sanitization passes: remove invalid backslash escapes
/// (keeping the JSON-legal set `\" \\ \/ \b \f \n \r \t \uXXXX`), collapse
/// stray literal newlines inside string values, and remove trailing commas
/// before a closing `}` or `]`.
pub fn sanitize_json(raw: &str) -> String {
  let stripped = strip_code_fence(raw);
  let escaped = fix_invalid_escapes(stripped);
  let unwrapped_newlines = collapse_newlines_in_strings(&escaped);
  remove_trailing_commas(&unwrapped_newlines)
}

fn fix_invalid_escapes(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars().peekable();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.peek().copied() {
      Some(next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
        out.push(c);
      }
      _ => {
        // Invalid escape (e.g. "\(" from a LaTeX-flavored answer) — drop the
        // backslash, keep whatever follows.
      }
    }
  }
  out
}

/// Replace literal newlines/carriage returns that fall inside a JSON string
/// value with a space, tracking quote state so structural whitespace between
/// tokens is left untouched.
fn collapse_newlines_in_strings(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut in_string = false;
  let mut escaped = false;
  for c in s.chars() {
    if in_string {
      if escaped {
        out.push(c);
        escaped = false;
        continue;
      }
      match c {
        '\\' => {
          out.push(c);
          escaped = true;
        }
        '"' => {
          in_string = false;
          out.push(c);
        }
        '\n' | '\r' => out.push(' '),
        _ => out.push(c),
      }
    } else {
      if c == '"' {
        in_string = true;
      }
      out.push(c);
    }
  }
  out
}

fn remove_trailing_commas(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let chars: Vec<char> = s.chars().collect();
  let mut i = 0;
  while i < chars.len() {
    let c = chars[i];
    if c == ',' {
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

/// Parse an LLM response as sanitized JSON into `T`.
pub fn parse_sanitized<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
  serde_json::from_str(&sanitize_json(raw))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Value;

  #[test]
  fn strips_json_code_fence() {
    assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
  }

  #[test]
  fn removes_trailing_comma_before_brace() {
    let v: Value = parse_sanitized(r#"{"a":1,"b":2,}"#).unwrap();
    assert_eq!(v["a"], 1);
    assert_eq!(v["b"], 2);
  }

  #[test]
  fn removes_trailing_comma_before_bracket() {
    let v: Value = parse_sanitized(r#"{"xs":[1,2,3,]}"#).unwrap();
    assert_eq!(v["xs"][2], 3);
  }

  #[test]
  fn drops_invalid_escape_keeps_valid_ones() {
    let sanitized = sanitize_json(r#"{"t":"a\(b)\nc"}"#);
    let v: Value = serde_json::from_str(&sanitized).unwrap();
    assert_eq!(v["t"], "a(b)\nc");
  }

  #[test]
  fn collapses_literal_newline_inside_string() {
    let raw = "{\"t\":\"line one\nline two\"}";
    let sanitized = sanitize_json(raw);
    let v: Value = serde_json::from_str(&sanitized).unwrap();
    assert_eq!(v["t"], "line one line two");
  }

  #[test]
  fn full_round_trip_with_fence_and_trailing_comma() {
    let raw = "```json\n{\"executive_summary\":\"ok\",\"key_findings\":[],}\n```";
    let v: Value = parse_sanitized(raw).unwrap();
    assert_eq!(v["executive_summary"], "ok");
  }
}
