//! Shared extraction helpers used by the parsers: think-block stripping,
//! fenced code blocks, bracket matching and list-marker handling.

/// Strip `<think>` blocks and trim. Every parser calls this first.
pub fn preprocess(text: &str) -> String {
    strip_think_tags(text).trim().to_string()
}

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks from text.
///
/// An unclosed block swallows the rest of the text.
///
/// # Examples
///
/// ```
/// use llm_prompt_fn::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>reasoning</think>result"), "result");
/// assert_eq!(strip_think_tags("<think>no closing tag"), "");
/// assert_eq!(strip_think_tags("<thinking>also works</thinking>done"), "done");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    ["think", "thinking"]
        .iter()
        .fold(text.to_string(), |acc, tag| strip_block(&acc, tag))
}

fn strip_block(text: &str, tag: &str) -> String {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(&open) {
        out.push_str(&rest[..start]);
        match rest[start..].find(&close) {
            Some(end) => rest = &rest[start + end + close.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Content of the first fenced code block, optionally restricted to a language.
///
/// With `lang = None` any fence matches; with `Some("json")` only fences
/// tagged `json` (case-insensitive) do.
///
/// # Examples
///
/// ```
/// use llm_prompt_fn::output_parser::extract::code_block;
///
/// let input = "Here:\n```json\n{\"a\": 1}\n```";
/// assert_eq!(code_block(input, Some("json")), Some("{\"a\": 1}"));
/// assert_eq!(code_block(input, Some("yaml")), None);
/// assert_eq!(code_block(input, None), Some("{\"a\": 1}"));
/// ```
pub fn code_block<'a>(text: &'a str, lang: Option<&str>) -> Option<&'a str> {
    let mut from = 0;
    while let Some(offset) = text[from..].find("```") {
        let after = from + offset + 3;
        let line_end = after + text[after..].find('\n')?;
        let tag = text[after..line_end].trim();
        let body_start = line_end + 1;
        let close = text[body_start..].find("```")?;
        let matches = match lang {
            None => true,
            Some(wanted) => tag.eq_ignore_ascii_case(wanted),
        };
        if matches {
            return Some(text[body_start..body_start + close].trim());
        }
        from = body_start + close + 3;
    }
    None
}

/// Find the last top-level region delimited by `open`/`close`.
///
/// Nesting-aware and skips delimiters inside JSON strings. The later region
/// wins because models tend to put the answer after any preamble.
///
/// # Examples
///
/// ```
/// use llm_prompt_fn::output_parser::extract::find_bracketed;
///
/// let input = r#"Result: {"a": [1, 2]}"#;
/// assert_eq!(find_bracketed(input, '{', '}'), Some(r#"{"a": [1, 2]}"#));
/// ```
pub fn find_bracketed(text: &str, open: char, close: char) -> Option<&str> {
    let mut best = None;
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' && depth > 0 {
            in_string = true;
        } else if ch == open {
            if depth == 0 {
                start = Some(i);
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(s) = start.take() {
                    best = Some(&text[s..i + ch.len_utf8()]);
                }
            }
        }
    }
    best
}

/// Strip a leading bullet (`-`, `*`, `•`) or number (`1.`, `2)`) marker.
///
/// Returns `None` when the line is not a list item.
pub fn strip_list_marker(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    for bullet in ["-", "*", "\u{2022}"] {
        if let Some(rest) = trimmed.strip_prefix(bullet) {
            if rest.starts_with(char::is_whitespace) {
                return Some(rest.trim());
            }
        }
    }
    let digits = trimmed.len() - trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let rest = &trimmed[digits..];
    rest.strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_think_tags_multiple() {
        let input = "<think>first</think>middle<think>second</think>end";
        assert_eq!(strip_think_tags(input), "middleend");
    }

    #[test]
    fn strip_mixed_think_and_thinking() {
        let input = "<think>a</think>mid<thinking>b</thinking>end";
        assert_eq!(strip_think_tags(input), "midend");
    }

    #[test]
    fn preprocess_strips_and_trims() {
        assert_eq!(preprocess("  <think>stuff</think>  hello world  "), "hello world");
    }

    #[test]
    fn code_block_skips_other_languages() {
        let input = "```yaml\nname: x\n```\nthen\n```json\n[1]\n```";
        assert_eq!(code_block(input, Some("json")), Some("[1]"));
        assert_eq!(code_block(input, None), Some("name: x"));
    }

    #[test]
    fn code_block_no_fence() {
        assert!(code_block("no code blocks here", None).is_none());
    }

    #[test]
    fn find_bracketed_prefers_later() {
        let input = r#"[1, 2] and then ["a", "b"]"#;
        assert_eq!(find_bracketed(input, '[', ']'), Some(r#"["a", "b"]"#));
    }

    #[test]
    fn find_bracketed_ignores_brackets_in_strings() {
        let input = r#"{"text": "hello [world] }"}"#;
        assert_eq!(find_bracketed(input, '{', '}'), Some(input));
    }

    #[test]
    fn find_bracketed_no_match() {
        assert!(find_bracketed("no brackets here", '{', '}').is_none());
    }

    #[test]
    fn list_markers() {
        assert_eq!(strip_list_marker("- a"), Some("a"));
        assert_eq!(strip_list_marker("  * b "), Some("b"));
        assert_eq!(strip_list_marker("12. twelve"), Some("twelve"));
        assert_eq!(strip_list_marker("3) three"), Some("three"));
        assert_eq!(strip_list_marker("-5 degrees"), None);
        assert_eq!(strip_list_marker("plain"), None);
    }
}
