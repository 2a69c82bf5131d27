//! Context window management: token budgeting and content trimming.
//!
//! Tracks token usage per message category against budget ceilings, trims
//! over-budget sessions (oldest first, lowest-priority category first),
//! replaces stale images with placeholders, and rebalances ceiling
//! capacity between categories. Stateless over any one session snapshot:
//! trimming always returns a new session and leaves the input untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ContextConfig;
use crate::counter::TokenCounter;
use crate::models::{
    ContentPart, Message, MessageCategory, MessageContent, Session, TokenBudget,
};

/// Placeholder text substituted for trimmed images.
const IMAGE_PLACEHOLDER: &str = "[Image removed to save tokens]";

/// Default ceiling allocation per category, as fractions of the total.
const ALLOCATIONS: [(MessageCategory, f64); 4] = [
    (MessageCategory::System, 0.10),
    (MessageCategory::Context, 0.35),
    (MessageCategory::Dialog, 0.50),
    (MessageCategory::SystemOutput, 0.05),
];

/// Token usage statistics for one session snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAnalysis {
    pub total_tokens: usize,
    pub per_category: BTreeMap<MessageCategory, usize>,
    pub image_count: usize,
    pub message_count: usize,
    pub over_budget: bool,
}

impl SessionAnalysis {
    pub fn category_tokens(&self, category: MessageCategory) -> usize {
        self.per_category.get(&category).copied().unwrap_or(0)
    }
}

/// Point-in-time usage report for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSnapshot {
    pub total: usize,
    pub available: usize,
    pub max: usize,
    pub per_category: BTreeMap<MessageCategory, (usize, usize)>,
}

/// Manages token budgeting and content trimming for conversation context.
pub struct ContextWindowManager {
    max_tokens: usize,
    budgets: BTreeMap<MessageCategory, TokenBudget>,
    counter: Arc<dyn TokenCounter>,
}

impl ContextWindowManager {
    /// Build budgets from the model ceiling using the default allocation
    /// percentages. The system floor is clamped to its own allocation.
    pub fn new(config: &ContextConfig, counter: Arc<dyn TokenCounter>) -> Self {
        let mut budgets = BTreeMap::new();
        for (category, fraction) in ALLOCATIONS {
            let ceiling = (config.max_tokens as f64 * fraction) as usize;
            let floor = if category == MessageCategory::System {
                config.system_min_tokens.min(ceiling)
            } else {
                0
            };
            budgets.insert(category, TokenBudget::new(floor, ceiling));
        }
        Self {
            max_tokens: config.max_tokens,
            budgets,
            counter,
        }
    }

    /// Build with explicit per-category budgets (tests, custom configs).
    pub fn with_budgets(
        max_tokens: usize,
        budgets: BTreeMap<MessageCategory, TokenBudget>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            max_tokens,
            budgets,
            counter,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Count tokens for arbitrary content with the injected counter.
    pub fn measure(&self, content: &MessageContent) -> usize {
        self.counter.count(content)
    }

    pub fn budget(&self, category: MessageCategory) -> &TokenBudget {
        &self.budgets[&category]
    }

    /// Cached token count, or a fresh measurement for uncounted messages.
    fn effective_tokens(&self, message: &Message) -> usize {
        if message.tokens > 0 {
            message.tokens
        } else {
            self.counter.count(&message.content)
        }
    }

    /// Analyze a session for token usage and multimodal content.
    pub fn analyze_session(&self, session: &Session) -> SessionAnalysis {
        let mut total_tokens = 0;
        let mut per_category: BTreeMap<MessageCategory, usize> = BTreeMap::new();
        let mut image_count = 0;

        for msg in &session.messages {
            let tokens = self.effective_tokens(msg);
            total_tokens += tokens;
            *per_category.entry(msg.category).or_default() += tokens;

            if let MessageContent::Parts(parts) = &msg.content {
                image_count += parts.iter().filter(|p| p.is_image()).count();
            }
        }

        SessionAnalysis {
            total_tokens,
            per_category,
            image_count,
            message_count: session.message_count(),
            over_budget: total_tokens > self.max_tokens,
        }
    }

    /// Attribute an analysis to the budget trackers.
    pub fn update_usage(&mut self, analysis: &SessionAnalysis) {
        for budget in self.budgets.values_mut() {
            budget.current_tokens = 0;
        }
        for (category, tokens) in &analysis.per_category {
            if let Some(budget) = self.budgets.get_mut(category) {
                budget.current_tokens = *tokens;
            }
        }
    }

    /// Reset usage tracking for one category, or all of them.
    pub fn reset_usage(&mut self, category: Option<MessageCategory>) {
        match category {
            Some(category) => {
                if let Some(budget) = self.budgets.get_mut(&category) {
                    budget.current_tokens = 0;
                }
            }
            None => {
                for budget in self.budgets.values_mut() {
                    budget.current_tokens = 0;
                }
            }
        }
    }

    /// Whether one category (or the whole window) exceeds its ceiling.
    pub fn is_over_budget(&self, category: Option<MessageCategory>) -> bool {
        match category {
            Some(category) => self.budgets[&category].is_over(),
            None => {
                let used: usize = self.budgets.values().map(|b| b.current_tokens).sum();
                used > self.max_tokens
            }
        }
    }

    /// Usage report for display and diagnostics.
    pub fn usage_snapshot(&self) -> UsageSnapshot {
        let total: usize = self.budgets.values().map(|b| b.current_tokens).sum();
        UsageSnapshot {
            total,
            available: self.max_tokens.saturating_sub(total),
            max: self.max_tokens,
            per_category: self
                .budgets
                .iter()
                .map(|(c, b)| (*c, (b.current_tokens, b.max_tokens)))
                .collect(),
        }
    }

    /// Move ceiling capacity from Dialog to Context when Context overflows
    /// and Dialog has headroom.
    ///
    /// At most half of Dialog's headroom moves in one call, so a single
    /// pass cannot starve the lender. Dialog's ceiling never drops below
    /// its configured floor. Returns the amount moved.
    pub fn auto_rebalance_budgets(&mut self) -> usize {
        let context = self.budgets[&MessageCategory::Context];
        let dialog = self.budgets[&MessageCategory::Dialog];

        let overage = context.overage();
        let headroom = dialog.headroom();
        if overage == 0 || headroom == 0 {
            return 0;
        }

        let mut movable = overage.min(headroom).min(headroom / 2);
        movable = movable.min(dialog.max_tokens.saturating_sub(dialog.min_tokens));
        if movable == 0 {
            return 0;
        }

        if let Some(dialog) = self.budgets.get_mut(&MessageCategory::Dialog) {
            dialog.max_tokens -= movable;
        }
        if let Some(context) = self.budgets.get_mut(&MessageCategory::Context) {
            context.max_tokens += movable;
        }

        info!(
            moved = movable,
            "rebalanced ceiling capacity from dialog to context"
        );
        movable
    }

    /// Trim a session to fit its budgets. Returns a new session; the input
    /// is untouched and surviving messages keep their original order.
    pub fn trim_session(&self, session: &Session) -> Session {
        if session.messages.is_empty() {
            return session.clone();
        }

        let mut analysis = self.analyze_session(session);

        // Images first: they dwarf everything else.
        let working = if analysis.image_count > 1 {
            let replaced = self.replace_stale_images(session);
            analysis = self.analyze_session(&replaced);
            replaced
        } else {
            session.clone()
        };

        let total_over = analysis.total_tokens > self.max_tokens;
        let mut tokens_to_trim = analysis.total_tokens.saturating_sub(self.max_tokens);
        let mut removed: HashSet<String> = HashSet::new();

        for category in MessageCategory::TRIM_ORDER {
            let budget = self.budgets[&category];
            let category_tokens = analysis.category_tokens(category);
            if category_tokens <= budget.max_tokens {
                continue;
            }

            let mut excess = category_tokens - budget.max_tokens;
            if total_over {
                // The overall overage may demand more than the category's
                // own ceiling does, down to the category floor.
                let down_to_floor = category_tokens.saturating_sub(budget.min_tokens);
                excess = excess.max(tokens_to_trim.min(down_to_floor));
            }

            let mut candidates: Vec<&Message> = working
                .messages
                .iter()
                .filter(|m| m.category == category)
                .collect();
            candidates.sort_by_key(|m| m.timestamp);

            let mut trimmed_tokens = 0;
            for msg in candidates {
                if trimmed_tokens >= excess {
                    break;
                }
                let tokens = self.effective_tokens(msg);
                trimmed_tokens += tokens;
                tokens_to_trim = tokens_to_trim.saturating_sub(tokens);
                removed.insert(msg.id.clone());
                debug!(
                    message_id = %msg.id,
                    category = ?category,
                    tokens,
                    "trimmed message"
                );
            }
        }

        let mut result = Session::empty_like(&working);
        result.messages = working
            .messages
            .iter()
            .filter(|m| !removed.contains(&m.id))
            .cloned()
            .collect();
        result
    }

    /// Budgeting and trimming in one idempotent pass: analyze, rebalance
    /// ceilings if Context overflows, then trim if still needed.
    pub fn process_session(&mut self, session: &Session) -> Session {
        if session.messages.is_empty() {
            return session.clone();
        }

        let analysis = self.analyze_session(session);
        self.update_usage(&analysis);

        if self.budgets[&MessageCategory::Context].is_over() {
            self.auto_rebalance_budgets();
        }

        let needs_trim = analysis.over_budget
            || MessageCategory::TRIM_ORDER
                .iter()
                .any(|c| analysis.category_tokens(*c) > self.budgets[c].max_tokens);

        if !needs_trim {
            return session.clone();
        }

        info!(
            session_id = %session.id,
            total_tokens = analysis.total_tokens,
            max_tokens = self.max_tokens,
            "trimming over-budget session"
        );

        let trimmed = self.trim_session(session);
        let after = self.analyze_session(&trimmed);
        self.update_usage(&after);
        debug!(
            removed = session.message_count() - trimmed.message_count(),
            "trim complete"
        );
        trimmed
    }

    /// Replace every image except the most recent (by message timestamp)
    /// with a text placeholder. Original references move into the owning
    /// message's metadata.
    fn replace_stale_images(&self, session: &Session) -> Session {
        let keep_id = session
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.content.contains_image())
            .max_by_key(|(i, m)| (m.timestamp, *i))
            .map(|(_, m)| m.id.clone());

        let mut result = Session::empty_like(session);
        for msg in &session.messages {
            if Some(&msg.id) == keep_id.as_ref() || !msg.content.contains_image() {
                result.messages.push(msg.clone());
                continue;
            }
            result.messages.push(self.placeholder_message(msg));
        }
        result
    }

    fn placeholder_message(&self, msg: &Message) -> Message {
        let MessageContent::Parts(parts) = &msg.content else {
            return msg.clone();
        };

        let mut sources = Vec::new();
        let new_parts: Vec<ContentPart> = parts
            .iter()
            .map(|part| match part {
                ContentPart::Image { source } => {
                    sources.push(source.clone());
                    ContentPart::text(IMAGE_PLACEHOLDER)
                }
                text => text.clone(),
            })
            .collect();

        let content = MessageContent::Parts(new_parts);
        let tokens = self.counter.count(&content);

        let mut replaced = msg.clone();
        replaced.content = content;
        replaced.tokens = tokens;
        replaced
            .metadata
            .insert("image_replaced".into(), true.into());
        replaced
            .metadata
            .insert("original_images".into(), sources.join(",").into());
        replaced
    }
}
