//! Token counting seam.
//!
//! The real tokenizer belongs to the model provider; the engine only needs
//! a synchronous `count` it can call on message content. Counters must be
//! fast - they run on the conversation path, never inside worker loops.

use crate::models::{ContentPart, MessageContent};

/// Counts tokens for message content. Injected into the engine by the
/// hosting runtime.
pub trait TokenCounter: Send + Sync {
    fn count(&self, content: &MessageContent) -> usize;
}

/// Character-ratio fallback counter (~4 chars per token, flat image cost).
///
/// Only a last resort; counts from a provider tokenizer are always better.
#[derive(Debug, Clone)]
pub struct HeuristicCounter {
    /// Flat token cost charged per image part.
    pub image_tokens: usize,
}

/// Default flat image cost, sized for large vision inputs.
pub const DEFAULT_IMAGE_TOKENS: usize = 1_000;

impl Default for HeuristicCounter {
    fn default() -> Self {
        Self {
            image_tokens: DEFAULT_IMAGE_TOKENS,
        }
    }
}

impl TokenCounter for HeuristicCounter {
    fn count(&self, content: &MessageContent) -> usize {
        match content {
            MessageContent::Text(text) => text.len() / 4 + 1,
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.len() / 4 + 1,
                    ContentPart::Image { .. } => self.image_tokens,
                })
                .sum(),
        }
    }
}

impl<F> TokenCounter for F
where
    F: Fn(&MessageContent) -> usize + Send + Sync,
{
    fn count(&self, content: &MessageContent) -> usize {
        self(content)
    }
}
