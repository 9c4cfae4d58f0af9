use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::core::conversation::Conversation;
use crate::core::storage::{Storage, StorageError};

/// Storage key holding the JSON array of conversations.
pub const CONVERSATIONS_KEY: &str = "conversations";

/// Storage key holding the id of the conversation shown on startup.
pub const ACTIVE_CONVERSATION_KEY: &str = "active_conversation";

/// Ordered conversations plus the one currently active.
///
/// A normalized set is never empty and its `active_id` always names one of
/// its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSet {
    pub conversations: Vec<Conversation>,
    pub active_id: String,
}

impl ConversationSet {
    /// A set holding a single fresh conversation.
    pub fn with_default() -> Self {
        let conversation = Conversation::new();
        Self {
            active_id: conversation.id.clone(),
            conversations: vec![conversation],
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.iter().any(|c| c.id == id)
    }

    /// Restore the invariants after loading untrusted data: duplicate ids
    /// are dropped (first one wins), an empty set gains a default
    /// conversation and a dangling active id falls back to the first entry.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.conversations
            .retain(|conversation| seen.insert(conversation.id.clone()));

        if self.conversations.is_empty() {
            *self = Self::with_default();
            return;
        }

        if !self.contains(&self.active_id) {
            self.active_id = self.conversations[0].id.clone();
        }
    }
}

/// Reads and writes a [`ConversationSet`] through a key-value [`Storage`].
pub struct ConversationPersistence {
    storage: Arc<dyn Storage>,
    /// Active id as last read from or written to storage.
    stored_active: Mutex<Option<String>>,
}

impl ConversationPersistence {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            stored_active: Mutex::new(None),
        }
    }

    /// Load the last saved set. Missing or unreadable state yields a single
    /// default conversation rather than an error.
    pub fn load(&self) -> ConversationSet {
        let conversations = match self.storage.get(CONVERSATIONS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Conversation>>(&raw) {
                Ok(conversations) => conversations,
                Err(err) => {
                    warn!(error = %err, "Discarding unreadable conversation list");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "Could not read conversation list");
                Vec::new()
            }
        };

        let stored_active = match self.storage.get(ACTIVE_CONVERSATION_KEY) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "Could not read active conversation");
                None
            }
        };
        let active_id = stored_active.clone().unwrap_or_default();
        if let Ok(mut cached) = self.stored_active.lock() {
            *cached = stored_active;
        }

        let mut set = ConversationSet {
            conversations,
            active_id,
        };
        set.normalize();
        debug!(
            conversations = set.conversations.len(),
            active = %set.active_id,
            "Loaded conversations"
        );
        set
    }

    /// Serialize and overwrite the stored set. The active id is only
    /// rewritten when it differs from the stored one.
    pub fn save(&self, set: &ConversationSet) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(&set.conversations).map_err(StorageError::Encode)?;
        self.storage.set(CONVERSATIONS_KEY, &encoded)?;

        let mut stored_active = self.stored_active.lock()?;
        if stored_active.as_deref() != Some(set.active_id.as_str()) {
            self.storage.set(ACTIVE_CONVERSATION_KEY, &set.active_id)?;
            *stored_active = Some(set.active_id.clone());
        }
        Ok(())
    }
}
