/// Token counting utilities

use crate::context::encoder::{default_encoder, Encoder};
use crate::context::{Content, ContentPart, Role, Turn};
use crate::error::{PromptError, Result};
use serde::Serialize;
use serde_json::ser::Formatter;
use std::io;
use std::sync::Arc;

/// Flat estimate per attached image. Correct when the provider downsamples,
/// badly off when it does not.
pub const IMAGE_TOKENS: usize = 85;

#[derive(Clone)]
pub struct TokenCounter {
    encoder: Arc<dyn Encoder>,
    image_tokens: usize,
}

impl TokenCounter {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self {
            encoder,
            image_tokens: IMAGE_TOKENS,
        }
    }

    pub fn with_image_tokens(mut self, image_tokens: usize) -> Self {
        self.image_tokens = image_tokens;
        self
    }

    pub fn count_text(&self, text: &str) -> Result<usize> {
        count_text(self.encoder.as_ref(), text)
    }

    pub fn count_turn(&self, turn: &Turn) -> Result<usize> {
        count_turn(turn, self.encoder.as_ref(), self.image_tokens)
    }

    pub fn count_turns(&self, turns: &[Turn]) -> Result<Vec<usize>> {
        turns.iter().map(|turn| self.count_turn(turn)).collect()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(default_encoder())
    }
}

fn count_text(encoder: &dyn Encoder, text: &str) -> Result<usize> {
    encoder
        .encode(text)
        .map(|tokens| tokens.len())
        .map_err(PromptError::Encoding)
}

/// Sum of every part of the turn: text parts, a flat cost per image, and for
/// assistant turns the name and JSON arguments of each tool call.
pub fn count_turn(turn: &Turn, encoder: &dyn Encoder, image_tokens: usize) -> Result<usize> {
    let mut total = match &turn.content {
        Content::Text(text) => count_text(encoder, text)?,
        Content::Parts(parts) => {
            let mut sum = 0;
            for part in parts {
                sum += match part {
                    ContentPart::Text { text } => count_text(encoder, text)?,
                    ContentPart::ImageUrl { .. } => image_tokens,
                };
            }
            sum
        }
    };

    if turn.role == Role::Assistant {
        for call in &turn.tool_calls {
            let args = tool_args_json(&call.args)?;
            total += count_text(encoder, &args)?;
            total += count_text(encoder, &call.name)?;
        }
    }

    Ok(total)
}

/// Conventional wire spelling of JSON: `", "` and `": "` separators, non-ASCII
/// escaped as `\uXXXX`. Tool arguments are counted the way providers
/// receive them.
struct WireFormatter;

impl Formatter for WireFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

fn tool_args_json(args: &serde_json::Value) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, WireFormatter);
    args.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(|e| PromptError::InvalidInput(format!("tool arguments: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Content, ToolCall};
    use anyhow::anyhow;
    use serde_json::json;

    fn char_counter() -> TokenCounter {
        TokenCounter::new(Arc::new(|text: &str| -> anyhow::Result<Vec<u32>> {
            Ok(text.chars().map(|c| c as u32).collect())
        }))
    }

    #[test]
    fn test_plain_text() {
        let counter = char_counter();
        assert_eq!(counter.count_turn(&Turn::user("hello")).unwrap(), 5);
    }

    #[test]
    fn test_mixed_parts() {
        let counter = char_counter();
        let turn = Turn::new(
            Role::User,
            Content::Parts(vec![
                ContentPart::text("ab"),
                ContentPart::text("cde"),
                ContentPart::image("https://example.com/cat.png"),
            ]),
        );
        assert_eq!(counter.count_turn(&turn).unwrap(), 2 + 3 + 85);
    }

    #[test]
    fn test_custom_image_cost() {
        let counter = char_counter().with_image_tokens(10);
        let turn = Turn::user_with_images("", ["data:image/png;base64,AAAA"]);
        assert_eq!(counter.count_turn(&turn).unwrap(), 10);
    }

    #[test]
    fn test_tool_calls_counted_on_assistant() {
        let counter = char_counter();
        let call = ToolCall::new("search", json!({"q": "x"}));
        let turn = Turn::assistant_with_tool_calls("ok", vec![call]);
        // "ok" + {"q": "x"} + "search"
        assert_eq!(counter.count_turn(&turn).unwrap(), 2 + 10 + 6);
    }

    #[test]
    fn test_tool_args_wire_spelling() {
        let args = json!({"a": [1, 2], "b": {"c": "caf\u{e9}"}, "d": "\u{1f600}"});
        assert_eq!(
            tool_args_json(&args).unwrap(),
            r#"{"a": [1, 2], "b": {"c": "caf\u00e9"}, "d": "\ud83d\ude00"}"#
        );
        assert_eq!(tool_args_json(&json!({})).unwrap(), "{}");
        assert_eq!(tool_args_json(&json!("quote\"d")).unwrap(), r#""quote\"d""#);
    }

    #[test]
    fn test_tool_calls_ignored_off_assistant() {
        let counter = char_counter();
        let mut turn = Turn::user("ok");
        turn.tool_calls.push(ToolCall::new("search", json!({})));
        assert_eq!(counter.count_turn(&turn).unwrap(), 2);
    }

    #[test]
    fn test_encoder_failure_propagates() {
        let counter = TokenCounter::new(Arc::new(|_: &str| -> anyhow::Result<Vec<u32>> {
            Err(anyhow!("tokenizer offline"))
        }));
        let err = counter.count_turn(&Turn::user("hi")).unwrap_err();
        assert!(matches!(err, PromptError::Encoding(_)));
    }
}
