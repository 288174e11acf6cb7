//! Blocked-word moderation.
//!
//! Matches whole words, ASCII case-insensitively. Sanitizing masks every
//! character of a match with `*`.

use {
    async_trait::async_trait,
    parlor_config::WordFilterConfig,
    parlor_store::Message,
};

use crate::plugin::{ContentModerator, MessageTransformer, Plugin, PluginConfig, PluginMetadata};

pub const WORD_FILTER_ID: &str = "word-filter";

pub struct WordFilter {
    metadata: PluginMetadata,
    /// Lower-cased, non-empty.
    words: Vec<String>,
}

impl WordFilter {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_ascii_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            metadata: PluginMetadata::new(WORD_FILTER_ID, "Word Filter", env!("CARGO_PKG_VERSION"))
                .with_description("Rejects and masks blocked words"),
            words,
        }
    }

    pub fn from_config(config: &WordFilterConfig) -> Self {
        Self::new(&config.words)
    }

    /// Byte ranges of every blocked word occurring as a whole word.
    fn matches(&self, text: &str) -> Vec<(usize, usize)> {
        let lowered = text.to_ascii_lowercase();
        let mut ranges = Vec::new();
        for word in &self.words {
            for (start, found) in lowered.match_indices(word.as_str()) {
                let end = start + found.len();
                let before = lowered[..start].chars().next_back();
                let after = lowered[end..].chars().next();
                if !before.is_some_and(char::is_alphanumeric)
                    && !after.is_some_and(char::is_alphanumeric)
                {
                    ranges.push((start, end));
                }
            }
        }
        ranges
    }

    pub fn is_clean(&self, text: &str) -> bool {
        self.matches(text).is_empty()
    }

    pub fn mask(&self, text: &str) -> String {
        let ranges = self.matches(text);
        if ranges.is_empty() {
            return text.to_string();
        }
        text.char_indices()
            .map(|(i, c)| {
                if ranges.iter().any(|&(start, end)| i >= start && i < end) {
                    '*'
                } else {
                    c
                }
            })
            .collect()
    }
}

#[async_trait]
impl Plugin for WordFilter {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn config(&self) -> PluginConfig {
        PluginConfig::default()
    }
}

#[async_trait]
impl ContentModerator for WordFilter {
    async fn validate_content(&self, content: &str) -> anyhow::Result<bool> {
        Ok(self.is_clean(content))
    }

    async fn sanitize_content(&self, content: &str) -> anyhow::Result<String> {
        Ok(self.mask(content))
    }
}

#[async_trait]
impl MessageTransformer for WordFilter {
    async fn transform_incoming(&self, mut message: Message) -> anyhow::Result<Message> {
        message.content = self.mask(&message.content);
        Ok(message)
    }

    async fn transform_outgoing(&self, mut message: Message) -> anyhow::Result<Message> {
        message.content = self.mask(&message.content);
        Ok(message)
    }
}
