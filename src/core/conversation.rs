use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::message::Message;

/// Title every conversation starts with until its first send.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Number of characters of the first user message kept in a derived title.
pub const TITLE_MAX_CHARS: usize = 30;

const TITLE_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Set once the title was chosen, by a rename or by the first send.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub title_fixed: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            title_fixed: false,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(Message::is_user)
    }

    /// True until the title was fixed by a rename or a first exchange.
    pub fn accepts_derived_title(&self) -> bool {
        !self.title_fixed && !self.has_user_message()
    }

    /// Give the conversation a title that later sends never replace.
    pub fn fix_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.title_fixed = true;
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a sidebar title from the first message of a conversation.
pub fn title_from_message(text: &str) -> String {
    if text.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
        title.push_str(TITLE_ELLIPSIS);
        title
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_conversations_get_unique_ids_and_default_title() {
        let first = Conversation::new();
        let second = Conversation::new();
        assert_ne!(first.id, second.id);
        assert_eq!(first.title, DEFAULT_TITLE);
        assert!(first.messages.is_empty());
    }

    #[test]
    fn short_messages_become_the_title_verbatim() {
        assert_eq!(title_from_message("Hello"), "Hello");
        let exactly_thirty = "a".repeat(30);
        assert_eq!(title_from_message(&exactly_thirty), exactly_thirty);
    }

    #[test]
    fn long_messages_are_truncated_with_ellipsis() {
        let long = "abcdefghijklmnopqrstuvwxyz0123456789";
        assert_eq!(
            title_from_message(long),
            "abcdefghijklmnopqrstuvwxyz0123..."
        );
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "é".repeat(31);
        let title = title_from_message(&text);
        assert_eq!(title, format!("{}...", "é".repeat(30)));
    }

    #[test]
    fn derived_title_only_applies_before_first_exchange() {
        let mut conversation = Conversation::new();
        assert!(conversation.accepts_derived_title());

        conversation.messages.push(Message::user("hi"));
        assert!(!conversation.accepts_derived_title());

        let mut renamed = Conversation::new();
        renamed.fix_title("Trip planning");
        assert!(!renamed.accepts_derived_title());
    }

    #[test]
    fn renaming_to_the_default_title_still_fixes_it() {
        let mut conversation = Conversation::new();
        conversation.fix_title(DEFAULT_TITLE);
        assert!(!conversation.accepts_derived_title());
    }

    #[test]
    fn stored_conversations_without_the_flag_still_load() {
        let conversation: Conversation =
            serde_json::from_str(r#"{"id":"a","title":"New Chat","messages":[]}"#)
                .expect("parse");
        assert!(!conversation.title_fixed);
        assert!(conversation.accepts_derived_title());

        let json = serde_json::to_string(&Conversation::new()).expect("serialize");
        assert!(!json.contains("title_fixed"));
    }
}
