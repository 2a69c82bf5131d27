//! Per-category token budget.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Token budget for one message category.
///
/// Invariant: `min_tokens <= max_tokens`. Construction clamps rather than
/// failing; a misconfigured budget must not take the engine down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBudget {
    /// Floor: tokens guaranteed to this category.
    pub min_tokens: usize,
    /// Ceiling: tokens this category may consume.
    pub max_tokens: usize,
    /// Tokens currently attributed to this category.
    #[serde(default)]
    pub current_tokens: usize,
}

impl TokenBudget {
    pub fn new(min_tokens: usize, max_tokens: usize) -> Self {
        let min_tokens = if min_tokens > max_tokens {
            warn!(
                min_tokens,
                max_tokens, "min_tokens exceeds max_tokens, clamping to max"
            );
            max_tokens
        } else {
            min_tokens
        };
        Self {
            min_tokens,
            max_tokens,
            current_tokens: 0,
        }
    }

    /// Tokens over the ceiling, zero when within budget.
    pub fn overage(&self) -> usize {
        self.current_tokens.saturating_sub(self.max_tokens)
    }

    /// Unused capacity below the ceiling.
    pub fn headroom(&self) -> usize {
        self.max_tokens.saturating_sub(self.current_tokens)
    }

    pub fn is_over(&self) -> bool {
        self.current_tokens > self.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_min_to_max() {
        let budget = TokenBudget::new(5000, 1000);
        assert_eq!(budget.min_tokens, 1000);
        assert_eq!(budget.max_tokens, 1000);
    }

    #[test]
    fn test_overage_and_headroom() {
        let mut budget = TokenBudget::new(0, 100);
        budget.current_tokens = 60;
        assert_eq!(budget.overage(), 0);
        assert_eq!(budget.headroom(), 40);
        assert!(!budget.is_over());

        budget.current_tokens = 130;
        assert_eq!(budget.overage(), 30);
        assert_eq!(budget.headroom(), 0);
        assert!(budget.is_over());
    }
}
