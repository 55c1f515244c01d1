//! Markdown section structure.

use serde_json::{Map, Value};

use super::error::ParseError;
use super::extract::preprocess;
use super::OutputParser;

/// Key holding a section's own text when it also has subsections.
pub const SECTION_TEXT_KEY: &str = "_content";

/// Parses markdown into an object keyed by section heading.
///
/// A section without subsections maps to its text. A section with
/// subsections maps to an object of the same shape; any text before its
/// first subsection is kept under [`SECTION_TEXT_KEY`].
///
/// # Example
///
/// ```
/// use llm_prompt_fn::output_parser::{MarkdownStructureParser, OutputParser};
/// use serde_json::json;
///
/// let parser = MarkdownStructureParser::new();
/// let value = parser.parse("# Intro\nhello\n# Plan\n## Step 1\ndo it").unwrap();
/// assert_eq!(value, json!({"Intro": "hello", "Plan": {"Step 1": "do it"}}));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MarkdownStructureParser;

impl MarkdownStructureParser {
    pub fn new() -> Self {
        Self
    }
}

struct Section {
    level: usize,
    title: String,
    body: Vec<String>,
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.len() - trimmed.trim_start_matches('#').len();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim()))
}

/// Build the object for `sections[*pos..]` whose level is deeper than `parent_level`.
fn build(sections: &[Section], pos: &mut usize, parent_level: usize) -> Map<String, Value> {
    let mut out = Map::new();
    while *pos < sections.len() && sections[*pos].level > parent_level {
        let section = &sections[*pos];
        *pos += 1;
        let text = section.body.join("\n").trim().to_string();
        let children = build(sections, pos, section.level);
        let value = if children.is_empty() {
            Value::String(text)
        } else {
            let mut obj = Map::new();
            if !text.is_empty() {
                obj.insert(SECTION_TEXT_KEY.to_string(), Value::String(text));
            }
            obj.extend(children);
            Value::Object(obj)
        };
        out.insert(section.title.clone(), value);
    }
    out
}

impl OutputParser for MarkdownStructureParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        let cleaned = preprocess(text);
        if cleaned.is_empty() {
            return Err(ParseError::EmptyResponse);
        }

        let mut sections: Vec<Section> = Vec::new();
        let mut in_fence = false;
        for line in cleaned.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
            }
            match heading(line).filter(|_| !in_fence) {
                Some((level, title)) => sections.push(Section {
                    level,
                    title: title.to_string(),
                    body: Vec::new(),
                }),
                None => {
                    if let Some(current) = sections.last_mut() {
                        current.body.push(line.to_string());
                    }
                }
            }
        }

        if sections.is_empty() {
            return Err(ParseError::unparseable(
                "markdown",
                "no section headings found",
                text,
            ));
        }

        let mut pos = 0;
        let mut root = Map::new();
        while pos < sections.len() {
            // headings shallower than the first one restart at their own level
            let level = sections[pos].level;
            root.extend(build(&sections, &mut pos, level - 1));
        }
        Ok(Value::Object(root))
    }

    fn format_instructions(&self) -> Option<String> {
        Some(
            "Structure the answer as markdown sections. Start every section with a heading line (\"# Title\", \"## Subtitle\")."
                .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_sections() {
        let parser = MarkdownStructureParser::new();
        let value = parser.parse("## Pros\nfast\n## Cons\nexpensive\nloud").unwrap();
        assert_eq!(value, json!({"Pros": "fast", "Cons": "expensive\nloud"}));
    }

    #[test]
    fn test_nested_section_keeps_own_text() {
        let parser = MarkdownStructureParser::new();
        let value = parser.parse("# Plan\noverview\n## A\none\n## B\ntwo").unwrap();
        assert_eq!(
            value,
            json!({"Plan": {"_content": "overview", "A": "one", "B": "two"}})
        );
    }

    #[test]
    fn test_headings_inside_code_fence_are_text() {
        let parser = MarkdownStructureParser::new();
        let value = parser.parse("# Script\n```\n# comment\n```").unwrap();
        assert_eq!(value, json!({"Script": "```\n# comment\n```"}));
    }

    #[test]
    fn test_preamble_before_first_heading_is_dropped() {
        let parser = MarkdownStructureParser::new();
        let value = parser.parse("Sure!\n# Answer\n42").unwrap();
        assert_eq!(value, json!({"Answer": "42"}));
    }

    #[test]
    fn test_no_headings_is_recoverable() {
        let parser = MarkdownStructureParser::new();
        let err = parser.parse("just text").unwrap_err();
        assert_eq!(err.original(), Some("just text"));
    }

    #[test]
    fn test_hashtag_is_not_heading() {
        assert!(heading("#rust is fun").is_none());
        assert_eq!(heading("### Deep"), Some((3, "Deep")));
    }
}
