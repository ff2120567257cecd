//! Trims conversation history to a token ceiling without ever dropping the
//! newest turn. Cost is a cheap character-count proxy; exact tokenization is
//! a provider detail this crate stays away from.

use crate::config::BudgetConfig;
use crate::domain::conversation::ConversationTurn;

/// Rough "1 token is about 4 characters" ratio. A proxy, not a bound; tune
/// via `BudgetConfig.chars_per_token`.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

#[derive(Clone, Copy, Debug)]
pub struct TokenBudgeter {
    chars_per_token: usize,
}

impl Default for TokenBudgeter {
    fn default() -> Self {
        Self { chars_per_token: DEFAULT_CHARS_PER_TOKEN }
    }
}

impl TokenBudgeter {
    pub fn new(chars_per_token: usize) -> Self {
        Self { chars_per_token: chars_per_token.max(1) }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.chars_per_token)
    }

    pub fn estimate(&self, text: &str) -> usize {
        text.len() / self.chars_per_token
    }

    /// Produces a budgeted transcript ending in `new_turn`.
    ///
    /// History is evicted oldest-first: the kept turns are always a
    /// contiguous most-recent suffix of the input, re-inserted in
    /// chronological order. Oversize input is recovered by truncation, never
    /// by an error.
    pub fn budget(
        &self,
        history: &[ConversationTurn],
        new_turn: ConversationTurn,
        max_tokens: usize,
        reserved: usize,
    ) -> Vec<ConversationTurn> {
        let new_turn_cost = self.estimate(&new_turn.content);
        if new_turn_cost >= max_tokens {
            return vec![new_turn];
        }

        let reserve = new_turn_cost.min(reserved / 2);
        let Some(available) = max_tokens.checked_sub(reserve).filter(|budget| *budget > 0) else {
            return vec![new_turn];
        };

        let mut kept = Vec::new();
        let mut used = 0usize;
        for turn in history.iter().rev() {
            let cost = self.estimate(&turn.content);
            if used + cost > available {
                break;
            }
            used += cost;
            kept.push(turn.clone());
        }

        kept.reverse();
        kept.push(new_turn);
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::TokenBudgeter;
    use crate::domain::conversation::{ConversationTurn, TurnRole};

    fn turn_with_tokens(index: usize, tokens: usize) -> ConversationTurn {
        let role = if index % 2 == 0 { TurnRole::User } else { TurnRole::Assistant };
        let mut turn = ConversationTurn::user(format!("{index}:") + &"x".repeat(tokens * 4));
        turn.role = role;
        turn
    }

    #[test]
    fn estimate_uses_configured_ratio() {
        assert_eq!(TokenBudgeter::default().estimate("abcdefgh"), 2);
        assert_eq!(TokenBudgeter::new(2).estimate("abcdefgh"), 4);
    }

    #[test]
    fn new_turn_is_never_dropped() {
        let budgeter = TokenBudgeter::default();
        let history: Vec<_> = (0..10).map(|i| turn_with_tokens(i, 100)).collect();
        let new_turn = ConversationTurn::user("most recent message");

        let budgeted = budgeter.budget(&history, new_turn.clone(), 50, 20);
        assert_eq!(budgeted.last().expect("non-empty").content, new_turn.content);
    }

    #[test]
    fn oversize_new_turn_returns_only_itself() {
        let budgeter = TokenBudgeter::default();
        let history: Vec<_> = (0..3).map(|i| turn_with_tokens(i, 10)).collect();
        let new_turn = ConversationTurn::user("z".repeat(4 * 500));

        let budgeted = budgeter.budget(&history, new_turn, 400, 100);
        assert_eq!(budgeted.len(), 1);
    }

    #[test]
    fn kept_history_is_a_contiguous_recent_suffix() {
        let budgeter = TokenBudgeter::default();
        let history: Vec<_> = (0..8).map(|i| turn_with_tokens(i, 50)).collect();
        let new_turn = ConversationTurn::user("hello");

        let budgeted = budgeter.budget(&history, new_turn, 180, 0);
        let kept_history = &budgeted[..budgeted.len() - 1];

        let expected_suffix = &history[history.len() - kept_history.len()..];
        assert_eq!(kept_history, expected_suffix);
        assert!(!kept_history.is_empty());
    }

    #[test]
    fn six_large_turns_are_trimmed_oldest_first() {
        let budgeter = TokenBudgeter::default();
        let history: Vec<_> = (0..6).map(|i| turn_with_tokens(i, 6_000)).collect();
        let new_turn = ConversationTurn::user("n".repeat(4 * 50));

        let budgeted = budgeter.budget(&history, new_turn.clone(), 24_000, 8_000);

        // available = 24_000 - min(50, 4_000) = 23_950 tokens: room for the
        // three most recent 6_000-token turns, oldest three dropped.
        assert_eq!(budgeted.len(), 4);
        assert_eq!(budgeted[..3], history[3..]);
        assert_eq!(budgeted.last().expect("non-empty").content, new_turn.content);
    }

    #[test]
    fn zero_budget_keeps_only_the_new_turn() {
        let budgeter = TokenBudgeter::default();
        let history: Vec<_> = (0..3).map(|i| turn_with_tokens(i, 10)).collect();
        let budgeted = budgeter.budget(&history, ConversationTurn::user("hi"), 0, 0);
        assert_eq!(budgeted.len(), 1);
    }

    #[test]
    fn empty_history_is_fine() {
        let budgeter = TokenBudgeter::default();
        let budgeted = budgeter.budget(&[], ConversationTurn::user("first message"), 1_000, 200);
        assert_eq!(budgeted.len(), 1);
    }
}
