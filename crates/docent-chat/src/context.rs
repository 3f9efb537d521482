//! Outbound context assembly.
//!
//! Builds the message list for one completion request from the prior
//! conversation and the documents found for the new utterance. The prior
//! conversation is cut to a rolling window so request size stays bounded.

use docent_core::config::ContextConfig;
use docent_core::types::{ConversationMessage, OutboundMessage, SearchResult};

// =============================================================================
// ContextAssembler
// =============================================================================

/// Pure builder for outbound message lists.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    /// Number of most recent prior messages to include.
    pub history_window: usize,
    /// Characters of each document's content quoted in the context message.
    pub excerpt_chars: usize,
    /// Text that opens the context message.
    pub preamble: String,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(&ContextConfig::default())
    }
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            history_window: config.history_window,
            excerpt_chars: config.excerpt_chars,
            preamble: config.context_preamble.clone(),
        }
    }

    /// Assemble the request for `utterance`.
    ///
    /// Layout: optional context message, then the last `history_window` prior
    /// messages oldest-first, then the utterance. The context message is only
    /// present when `results` is non-empty.
    pub fn assemble(
        &self,
        utterance: &str,
        prior: &[ConversationMessage],
        results: &[SearchResult],
    ) -> Vec<OutboundMessage> {
        let start = prior.len().saturating_sub(self.history_window);
        let window = &prior[start..];

        let mut messages = Vec::with_capacity(window.len() + 2);
        if let Some(context) = self.context_message(results) {
            messages.push(context);
        }
        messages.extend(window.iter().map(ConversationMessage::to_outbound));
        messages.push(OutboundMessage::user(utterance));
        messages
    }

    /// The synthetic system message quoting `results` in rank order.
    pub fn context_message(&self, results: &[SearchResult]) -> Option<OutboundMessage> {
        if results.is_empty() {
            return None;
        }

        let quoted = results
            .iter()
            .map(|r| {
                format!(
                    "{}: {}",
                    r.document.title,
                    excerpt(&r.document.content, self.excerpt_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        Some(OutboundMessage::system(format!("{}{}", self.preamble, quoted)))
    }
}

/// The first `max_chars` characters of `text`, never splitting a character.
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::types::{DocumentRef, Role};

    fn make_result(id: u64, title: &str, content: &str) -> SearchResult {
        SearchResult {
            document: DocumentRef {
                id,
                title: title.to_string(),
                content: content.to_string(),
                url: String::new(),
                category: "guide".to_string(),
                tags: vec![],
            },
            score: 0.5,
        }
    }

    /// `count` alternating user/assistant messages numbered from 0.
    fn make_history(count: usize) -> Vec<ConversationMessage> {
        (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationMessage::user(format!("message {}", i))
                } else {
                    ConversationMessage::assistant(format!("message {}", i))
                }
            })
            .collect()
    }

    // ---- Utterance placement ----

    #[test]
    fn test_no_history_no_results() {
        let assembler = ContextAssembler::default();
        let messages = assembler.assemble("hello", &[], &[]);
        assert_eq!(messages, vec![OutboundMessage::user("hello")]);
    }

    #[test]
    fn test_empty_results_add_no_system_message() {
        let assembler = ContextAssembler::default();
        let history = make_history(4);
        let messages = assembler.assemble("next", &history, &[]);
        assert_eq!(messages.len(), 5);
        assert!(messages.iter().all(|m| m.role != Role::System));
        assert_eq!(messages.last(), Some(&OutboundMessage::user("next")));
    }

    // ---- History window ----

    #[test]
    fn test_window_keeps_most_recent_oldest_first() {
        let assembler = ContextAssembler::default();
        let history = make_history(12);
        let messages = assembler.assemble("new", &history, &[]);

        assert_eq!(messages.len(), 11);
        let contents: Vec<&str> = messages[..10].iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (2..12).map(|i| format!("message {}", i)).collect();
        assert_eq!(contents, expected);
        assert_eq!(messages[10], OutboundMessage::user("new"));
    }

    #[test]
    fn test_window_larger_than_history() {
        let assembler = ContextAssembler::default();
        let history = make_history(3);
        let messages = assembler.assemble("new", &history, &[]);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "message 0");
    }

    #[test]
    fn test_zero_window_sends_only_utterance() {
        let assembler = ContextAssembler {
            history_window: 0,
            ..ContextAssembler::default()
        };
        let messages = assembler.assemble("solo", &make_history(6), &[]);
        assert_eq!(messages, vec![OutboundMessage::user("solo")]);
    }

    #[test]
    fn test_history_roles_preserved() {
        let assembler = ContextAssembler::default();
        let messages = assembler.assemble("q", &make_history(2), &[]);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    // ---- Context message ----

    #[test]
    fn test_results_prepend_single_system_message() {
        let assembler = ContextAssembler::default();
        let results = vec![
            make_result(1, "Install", "Run the installer."),
            make_result(2, "Configure", "Edit the config file."),
        ];
        let messages = assembler.assemble("how?", &make_history(2), &results);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[0].content,
            "Use this context to answer: Install: Run the installer.\n\nConfigure: Edit the config file."
        );
        assert_eq!(
            messages.iter().filter(|m| m.role == Role::System).count(),
            1
        );
        assert_eq!(messages[3], OutboundMessage::user("how?"));
    }

    #[test]
    fn test_context_follows_rank_order() {
        let assembler = ContextAssembler::default();
        let results = vec![
            make_result(3, "Third", "c"),
            make_result(1, "First", "a"),
        ];
        let context = assembler.context_message(&results).unwrap();
        let third = context.content.find("Third").unwrap();
        let first = context.content.find("First").unwrap();
        assert!(third < first);
    }

    #[test]
    fn test_excerpt_truncated_to_configured_length() {
        let assembler = ContextAssembler::default();
        let long = "x".repeat(500);
        let context = assembler
            .context_message(&[make_result(1, "Long", &long)])
            .unwrap();
        let quoted = context
            .content
            .strip_prefix("Use this context to answer: Long: ")
            .unwrap();
        assert_eq!(quoted.len(), 200);
    }

    #[test]
    fn test_custom_preamble() {
        let assembler = ContextAssembler {
            preamble: "Docs:\n".to_string(),
            ..ContextAssembler::default()
        };
        let context = assembler
            .context_message(&[make_result(1, "A", "b")])
            .unwrap();
        assert_eq!(context.content, "Docs:\nA: b");
    }

    #[test]
    fn test_no_results_no_context_message() {
        assert!(ContextAssembler::default().context_message(&[]).is_none());
    }

    // ---- excerpt ----

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("h\u{e9}llo", 2), "h\u{e9}");
        assert_eq!(excerpt("\u{1f600}\u{1f600}\u{1f600}", 1), "\u{1f600}");
    }

    #[test]
    fn test_excerpt_short_text_unchanged() {
        assert_eq!(excerpt("short", 200), "short");
        assert_eq!(excerpt("", 10), "");
        assert_eq!(excerpt("abc", 0), "");
    }
}
