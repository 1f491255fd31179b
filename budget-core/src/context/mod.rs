pub mod encoder;
pub mod token_counter;
pub mod window;

pub use encoder::{default_encoder, Encoder, HeuristicEncoder, TiktokenEncoder};
pub use token_counter::{count_turn, TokenCounter};
pub use window::{AssembledPrompt, ContextWindowManager, HistoryTruncator};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Accepts a remote URL or a `data:` URI.
    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            args,
        }
    }
}

/// One message in a conversation. `id` survives clones and edits; cached
/// token counts are tied to the content via [`Turn::fingerprint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Turn {
    pub fn new(role: Role, content: Content) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Content::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Content::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Content::Text(text.into()))
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self::new(Role::Tool, Content::Text(text.into()))
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(text)
        }
    }

    /// User turn with attached images. Without images the content stays
    /// plain text.
    pub fn user_with_images<I, S>(text: impl Into<String>, image_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = text.into();
        let images: Vec<ContentPart> = image_urls.into_iter().map(ContentPart::image).collect();
        if images.is_empty() {
            return Self::user(text);
        }

        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::text(text));
        parts.extend(images);
        Self::new(Role::User, Content::Parts(parts))
    }

    /// Hash of everything that contributes to the token count.
    pub fn fingerprint(&self) -> Result<u64> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.role.hash(&mut hasher);
        serde_json::to_string(&self.content)?.hash(&mut hasher);
        serde_json::to_string(&self.tool_calls)?.hash(&mut hasher);
        Ok(hasher.finish())
    }

    /// Concatenated text of all text parts, plus the image URLs in order.
    pub fn text_and_images(&self) -> (String, Vec<String>) {
        match &self.content {
            Content::Text(text) => (text.clone(), Vec::new()),
            Content::Parts(parts) => {
                let mut text = String::new();
                let mut images = Vec::new();
                for part in parts {
                    match part {
                        ContentPart::Text { text: t } => text.push_str(t),
                        ContentPart::ImageUrl { image_url } => images.push(image_url.url.clone()),
                    }
                }
                (text, images)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub turns: Vec<Turn>,
    #[serde(skip)]
    token_cache: HashMap<(Uuid, u64), usize>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::from_turns(Vec::new())
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            turns,
            token_cache: HashMap::new(),
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Per-turn token counts aligned with `turns`, memoised by turn id and
    /// content fingerprint. A turn edited since it was counted is counted
    /// again.
    pub fn token_counts(&mut self, counter: &TokenCounter) -> Result<Vec<usize>> {
        let mut counts = Vec::with_capacity(self.turns.len());
        for turn in &self.turns {
            let key = (turn.id, turn.fingerprint()?);
            let count = match self.token_cache.get(&key) {
                Some(count) => *count,
                None => {
                    let count = counter.count_turn(turn)?;
                    self.token_cache.insert(key, count);
                    count
                }
            };
            counts.push(count);
        }
        Ok(counts)
    }

    pub fn cached_turns(&self) -> usize {
        self.token_cache.len()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
