//! Ordered conversation history shared by the memory strategies.
//!
//! Messages are stored oldest first. The rendered buffer uses `Human:` / `AI:` prefixes,
//! one message per line.

use std::collections::VecDeque;

use crate::llm::ChatMessage;

#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    messages: VecDeque<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one user/assistant exchange.
    pub fn add_exchange(&mut self, input: impl Into<String>, output: impl Into<String>) {
        self.messages.push_back(ChatMessage::user(input));
        self.messages.push_back(ChatMessage::assistant(output));
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    /// The last `n` messages (all of them when fewer).
    pub fn last(&self, n: usize) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().skip(self.messages.len().saturating_sub(n))
    }

    /// Copies of the oldest `n` messages, left in place.
    pub fn oldest(&self, n: usize) -> Vec<ChatMessage> {
        self.messages.iter().take(n).cloned().collect()
    }

    /// Remove the oldest `n` messages.
    pub fn drop_oldest(&mut self, n: usize) {
        let n = n.min(self.messages.len());
        self.messages.drain(..n);
    }

    /// How many of the oldest messages must go for the rest to fit `limit`, counting each
    /// rendered line with `count`. Nothing is removed.
    pub fn overflow(&self, limit: usize, count: impl Fn(&str) -> usize) -> usize {
        let counts: Vec<usize> = self.messages.iter().map(|m| count(&render_line(m))).collect();
        let mut total: usize = counts.iter().sum();
        let mut n = 0;
        while total > limit && n < counts.len() {
            total -= counts[n];
            n += 1;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn buffer_string(&self) -> String {
        buffer_string(&self.messages)
    }
}

/// Display prefix for a message role.
pub fn role_prefix(role: &str) -> &str {
    match role {
        "user" => "Human",
        "assistant" => "AI",
        "system" => "System",
        other => other,
    }
}

fn render_line(m: &ChatMessage) -> String {
    format!("{}: {}", role_prefix(&m.role), m.content)
}

/// Render messages as `Prefix: content` lines.
pub fn buffer_string<'a>(messages: impl IntoIterator<Item = &'a ChatMessage>) -> String {
    messages
        .into_iter()
        .map(render_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenCounter;

    #[test]
    fn renders_human_and_ai_lines() {
        let mut h = ChatHistory::new();
        h.add_exchange("Hi", "Hello!");
        h.add_exchange("What is 1+1?", "2");
        assert_eq!(h.buffer_string(), "Human: Hi\nAI: Hello!\nHuman: What is 1+1?\nAI: 2");
        assert_eq!(buffer_string(h.last(2)), "Human: What is 1+1?\nAI: 2");
        assert_eq!(h.last(10).count(), 4);
        assert_eq!(h.messages().count(), 4);
    }

    #[test]
    fn oldest_copies_and_drop_oldest_removes() {
        let mut h = ChatHistory::new();
        h.add_exchange("a", "b");
        assert_eq!(h.oldest(1), vec![ChatMessage::user("a")]);
        assert_eq!(h.len(), 2);
        h.drop_oldest(1);
        assert_eq!(h.buffer_string(), "AI: b");
        h.drop_oldest(5);
        assert!(h.is_empty());
    }

    #[test]
    fn overflow_counts_messages_over_budget() {
        let mut h = ChatHistory::new();
        // 4 + 2 + 4 + 2 words.
        h.add_exchange("AI is what?!", "Amazing!");
        h.add_exchange("Backpropagation is what?", "Beautiful!");
        let words = |s: &str| TokenCounter::Whitespace.count(s);
        assert_eq!(h.overflow(12, words), 0);
        assert_eq!(h.overflow(8, words), 1);
        assert_eq!(h.overflow(5, words), 2);
        assert_eq!(h.overflow(0, words), 4);
        assert_eq!(h.len(), 4);
    }
}
