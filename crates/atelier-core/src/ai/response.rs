//! Parsing of raw AI payloads.

use atelier_protocol::{BuildCommand, ChatMessage, FileTree};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Keys accepted for the tree fragment, in priority order.
const TREE_KEYS: &[&str] = &["fileTree", "filetreeFragment", "filetree", "files"];
const BUILD_KEYS: &[&str] = &["buildCommand", "build_command"];

/// Why part of a payload was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedAiPayload {
    #[error("payload is not a JSON object with a text field")]
    NotStructured,
    #[error("file tree fragment rejected: {0}")]
    Tree(String),
    #[error("build command rejected: {0}")]
    BuildCommand(String),
}

/// A parsed AI reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiResponse {
    pub text: String,
    pub filetree_fragment: Option<FileTree>,
    pub build_command: Option<BuildCommand>,
}

/// Result of [`AiResponse::parse`]: always a usable response, plus the
/// problems found on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub response: AiResponse,
    pub issues: Vec<MalformedAiPayload>,
}

impl AiResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Parse a raw payload.
    ///
    /// Anything that is not a JSON object carrying `text` becomes plain text
    /// with no fragment. A fragment that fails validation is dropped as a
    /// whole while the text is kept.
    pub fn parse(raw: &str) -> ParsedResponse {
        let body = strip_code_fence(raw.trim());

        let object = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(object)) => object,
            _ => return Self::plain(raw),
        };
        let text = match object.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => return Self::plain(raw),
        };

        let mut issues = Vec::new();
        let filetree_fragment = match lookup(&object, TREE_KEYS) {
            Some(value) => match FileTree::from_value(value) {
                Ok(tree) => Some(tree),
                Err(e) => {
                    issues.push(MalformedAiPayload::Tree(e.to_string()));
                    None
                }
            },
            None => None,
        };
        let build_command = match lookup(&object, BUILD_KEYS) {
            Some(value) => match serde_json::from_value::<BuildCommand>(value.clone()) {
                Ok(command) => Some(command),
                Err(e) => {
                    issues.push(MalformedAiPayload::BuildCommand(e.to_string()));
                    None
                }
            },
            None => None,
        };

        ParsedResponse {
            response: Self {
                text,
                filetree_fragment,
                build_command,
            },
            issues,
        }
    }

    fn plain(raw: &str) -> ParsedResponse {
        ParsedResponse {
            response: Self::text(raw.trim()),
            issues: vec![MalformedAiPayload::NotStructured],
        }
    }

    /// The room message carrying this reply.
    pub fn into_message(self, timestamp: DateTime<Utc>) -> ChatMessage {
        ChatMessage::ai(self.text, self.filetree_fragment, self.build_command, timestamp)
    }
}

fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

/// Strip a surrounding markdown code fence, with or without a language tag.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return text;
    };
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        // Single line: drop a language tag glued to the payload
        None => rest
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
            .trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_payload_with_fence_and_alias() {
        let raw = r#"```json
{
  "text": "Added a server",
  "filetreeFragment": { "server.js": { "file": { "contents": "require('http')" } } },
  "buildCommand": { "mainItem": "npm", "commands": ["install", "start"] }
}
```"#;
        let parsed = AiResponse::parse(raw);
        assert!(parsed.issues.is_empty());
        let response = parsed.response;
        assert_eq!(response.text, "Added a server");
        assert!(response.filetree_fragment.unwrap().contains("server.js"));
        assert_eq!(response.build_command.unwrap().commands, vec!["install", "start"]);
    }

    #[test]
    fn plain_text_degrades_without_fragment() {
        let parsed = AiResponse::parse("Sure, here is how you do it.");
        assert_eq!(parsed.response, AiResponse::text("Sure, here is how you do it."));
        assert_eq!(parsed.issues, vec![MalformedAiPayload::NotStructured]);

        // JSON, but not the expected shape
        let parsed = AiResponse::parse(r#"["a", "b"]"#);
        assert_eq!(parsed.response.text, r#"["a", "b"]"#);
        assert!(parsed.response.filetree_fragment.is_none());
    }

    #[test]
    fn malformed_fragment_is_dropped_whole() {
        let raw = r#"{
            "text": "two files",
            "fileTree": {
                "ok.js": { "file": { "contents": "1" } },
                "../escape.js": { "file": { "contents": "2" } }
            }
        }"#;
        let parsed = AiResponse::parse(raw);
        assert_eq!(parsed.response.text, "two files");
        assert!(parsed.response.filetree_fragment.is_none());
        assert!(matches!(parsed.issues.as_slice(), [MalformedAiPayload::Tree(_)]));
    }

    #[test]
    fn null_fragment_is_absent() {
        let parsed = AiResponse::parse(r#"{"text": "hi", "fileTree": null}"#);
        assert!(parsed.issues.is_empty());
        assert!(parsed.response.filetree_fragment.is_none());
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("no fence"), "no fence");
        assert_eq!(strip_code_fence("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn single_line_fence_with_language_tag() {
        let parsed = AiResponse::parse(r#"```json{"text":"x"}```"#);
        assert!(parsed.issues.is_empty());
        assert_eq!(parsed.response.text, "x");
    }
}
