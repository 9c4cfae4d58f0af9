//! In-memory conversation collection with write-through persistence.
//!
//! Every successful mutation saves the whole [`ConversationSet`] and then
//! notifies subscribers with a [`StoreEvent`], which is how the terminal UI
//! learns that it has to redraw.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::conversation::{title_from_message, Conversation};
use crate::core::message::Message;
use crate::core::persistence::{ConversationPersistence, ConversationSet};

/// Prefix put in front of error text that replaces a failed reply.
pub const ERROR_MARKER: &str = "⚠️";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created { id: String },
    Selected { id: String },
    Deleted { id: String },
    Renamed { id: String },
    MessagesChanged { id: String },
}

impl StoreEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            StoreEvent::Created { id }
            | StoreEvent::Selected { id }
            | StoreEvent::Deleted { id }
            | StoreEvent::Renamed { id }
            | StoreEvent::MessagesChanged { id } => id,
        }
    }
}

pub struct ConversationStore {
    set: ConversationSet,
    persistence: ConversationPersistence,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl ConversationStore {
    /// Load the saved set, or start with one default conversation.
    pub fn load(persistence: ConversationPersistence) -> Self {
        let set = persistence.load();
        Self {
            set,
            persistence,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn snapshot(&self) -> &ConversationSet {
        &self.set
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.set.conversations
    }

    pub fn active_id(&self) -> &str {
        &self.set.active_id
    }

    pub fn active(&self) -> &Conversation {
        let index = self.position(&self.set.active_id).unwrap_or(0);
        &self.set.conversations[index]
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.set.conversations.iter().find(|c| c.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.set.conversations.iter().position(|c| c.id == id)
    }

    /// Insert a new empty conversation at the front and make it active.
    pub fn create_conversation(&mut self) -> String {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.set.conversations.insert(0, conversation);
        self.set.active_id = id.clone();
        debug!(id = %id, "Created conversation");
        self.commit(StoreEvent::Created { id: id.clone() });
        id
    }

    /// Returns false (and changes nothing) when `id` is unknown.
    pub fn select_conversation(&mut self, id: &str) -> bool {
        if !self.set.contains(id) {
            return false;
        }
        self.set.active_id = id.to_string();
        self.commit(StoreEvent::Selected { id: id.to_string() });
        true
    }

    /// Remove a conversation. When the active one goes away the first
    /// remaining conversation takes over, or a fresh default is created.
    pub fn delete_conversation(&mut self, id: &str) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.set.conversations.remove(index);
        debug!(id = %id, "Deleted conversation");

        if self.set.active_id == id {
            match self.set.conversations.first() {
                Some(first) => self.set.active_id = first.id.clone(),
                None => {
                    self.set = ConversationSet::with_default();
                    let replacement = self.set.active_id.clone();
                    self.commit(StoreEvent::Deleted { id: id.to_string() });
                    self.notify(StoreEvent::Created { id: replacement });
                    return true;
                }
            }
        }

        self.commit(StoreEvent::Deleted { id: id.to_string() });
        true
    }

    /// Give a conversation an explicit title. Blank titles are ignored.
    pub fn rename_conversation(&mut self, id: &str, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let Some(conversation) = self.conversation_mut(id) else {
            return false;
        };
        conversation.fix_title(title);
        self.commit(StoreEvent::Renamed { id: id.to_string() });
        true
    }

    /// Append the user's message and an empty assistant placeholder. The
    /// first exchange of an untitled conversation also names it.
    pub fn append_user_and_placeholder(&mut self, id: &str, text: &str) -> bool {
        let Some(conversation) = self.conversation_mut(id) else {
            return false;
        };
        if conversation.accepts_derived_title() {
            conversation.fix_title(title_from_message(text));
        }
        conversation.messages.push(Message::user(text));
        conversation.messages.push(Message::placeholder());
        self.commit(StoreEvent::MessagesChanged { id: id.to_string() });
        true
    }

    /// Replace the content of the trailing assistant message. Does nothing
    /// when the last message is not an assistant message.
    pub fn update_last_assistant_content(&mut self, id: &str, full_text: &str) -> bool {
        let Some(last) = self.trailing_assistant_mut(id) else {
            return false;
        };
        if last.content == full_text {
            return true;
        }
        last.content = full_text.to_string();
        self.commit(StoreEvent::MessagesChanged { id: id.to_string() });
        true
    }

    /// Swap the trailing assistant message for a visible error marker.
    pub fn replace_last_assistant_with_error(&mut self, id: &str, error_text: &str) -> bool {
        let Some(last) = self.trailing_assistant_mut(id) else {
            return false;
        };
        last.content = format!("{ERROR_MARKER} {error_text}");
        self.commit(StoreEvent::MessagesChanged { id: id.to_string() });
        true
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.set.conversations.iter_mut().find(|c| c.id == id)
    }

    fn trailing_assistant_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.conversation_mut(id)?
            .messages
            .last_mut()
            .filter(|message| message.is_assistant())
    }

    fn commit(&mut self, event: StoreEvent) {
        if let Err(err) = self.persistence.save(&self.set) {
            warn!(error = %err, "Failed to persist conversations");
        }
        self.notify(event);
    }

    fn notify(&mut self, event: StoreEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
