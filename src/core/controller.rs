//! Per-send state machine tying the conversation store to completion streams.
//!
//! A send moves through `Idle -> Sending -> Streaming -> Completed | Failed`.
//! Each conversation has at most one send in flight; different conversations
//! may stream at the same time. Stream output is routed by the conversation
//! id captured when the send started, so switching conversations mid-stream
//! is safe.

use std::collections::HashMap;
use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{ApiClient, CompletionRequest};
use crate::core::chat_stream::{strip_control_markers, StreamError, StreamMessage, StreamParams};
use crate::core::store::ConversationStore;

pub const EMPTY_RESPONSE_TEXT: &str = "Empty response from server.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    EmptyInput,
    /// The target conversation already has a send in flight.
    Busy,
    NotAuthenticated,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::EmptyInput => write!(f, "Nothing to send"),
            SubmitError::Busy => write!(f, "Still waiting for the previous reply"),
            SubmitError::NotAuthenticated => write!(f, "Not logged in"),
        }
    }
}

impl std::error::Error for SubmitError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Completed {
        conversation_id: String,
    },
    Failed {
        conversation_id: String,
        error: StreamError,
    },
}

struct InFlight {
    conversation_id: String,
    state: SendState,
    buffer: String,
    cancel_token: CancellationToken,
}

pub struct ChatController {
    store: ConversationStore,
    inflight: HashMap<u64, InFlight>,
    outcomes: HashMap<String, SendState>,
    next_stream_id: u64,
}

impl ChatController {
    pub fn new(store: ConversationStore) -> Self {
        Self {
            store,
            inflight: HashMap::new(),
            outcomes: HashMap::new(),
            next_stream_id: 1,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.inflight
            .values()
            .any(|send| send.conversation_id == conversation_id)
    }

    pub fn send_state(&self, conversation_id: &str) -> SendState {
        self.inflight
            .values()
            .find(|send| send.conversation_id == conversation_id)
            .map(|send| send.state)
            .or_else(|| self.outcomes.get(conversation_id).copied())
            .unwrap_or(SendState::Idle)
    }

    /// Start a send into the active conversation.
    ///
    /// On success the user message and an empty reply placeholder have been
    /// appended, `input` has been cleared and the returned parameters are
    /// ready for [`ChatStreamService::spawn_stream`](crate::core::chat_stream::ChatStreamService::spawn_stream).
    /// On error nothing has changed.
    pub fn submit(
        &mut self,
        input: &mut String,
        api: &ApiClient,
        token: Option<&str>,
    ) -> Result<StreamParams, SubmitError> {
        let text = input.trim().to_string();
        if text.is_empty() {
            return Err(SubmitError::EmptyInput);
        }
        let token = token.ok_or(SubmitError::NotAuthenticated)?;

        let conversation_id = self.store.active_id().to_string();
        if self.is_busy(&conversation_id) {
            return Err(SubmitError::Busy);
        }

        let history = self
            .store
            .get(&conversation_id)
            .map(|conversation| conversation.messages.clone())
            .unwrap_or_default();
        self.store
            .append_user_and_placeholder(&conversation_id, &text);
        input.clear();

        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;
        let cancel_token = CancellationToken::new();
        self.inflight.insert(
            stream_id,
            InFlight {
                conversation_id: conversation_id.clone(),
                state: SendState::Sending,
                buffer: String::new(),
                cancel_token: cancel_token.clone(),
            },
        );
        self.outcomes.remove(&conversation_id);
        debug!(stream_id, conversation = %conversation_id, history = history.len(), "Send started");

        Ok(StreamParams {
            api: api.clone(),
            token: token.to_string(),
            request: CompletionRequest {
                message: text,
                history,
            },
            conversation_id,
            stream_id,
            cancel_token,
        })
    }

    /// Apply one message from the stream service. Messages for unknown or
    /// finished streams are ignored. Returns the outcome once a send ends.
    pub fn handle_stream_message(
        &mut self,
        stream_id: u64,
        message: StreamMessage,
    ) -> Option<SendOutcome> {
        let send = self.inflight.get_mut(&stream_id)?;

        match message {
            StreamMessage::Started => {
                send.state = SendState::Streaming;
                None
            }
            StreamMessage::Chunk(chunk) => {
                send.state = SendState::Streaming;
                send.buffer.push_str(&chunk);
                let visible = strip_control_markers(&send.buffer);
                let conversation_id = send.conversation_id.clone();
                self.store
                    .update_last_assistant_content(&conversation_id, &visible);
                None
            }
            StreamMessage::End => {
                let send = self.inflight.remove(&stream_id)?;
                let reply = strip_control_markers(&send.buffer);
                let reply = reply.trim();
                if reply.is_empty() {
                    self.store
                        .replace_last_assistant_with_error(&send.conversation_id, EMPTY_RESPONSE_TEXT);
                } else {
                    self.store
                        .update_last_assistant_content(&send.conversation_id, reply);
                }
                info!(stream_id, conversation = %send.conversation_id, chars = reply.chars().count(), "Reply completed");
                self.outcomes
                    .insert(send.conversation_id.clone(), SendState::Completed);
                Some(SendOutcome::Completed {
                    conversation_id: send.conversation_id,
                })
            }
            StreamMessage::Error(error) => {
                let send = self.inflight.remove(&stream_id)?;
                self.store
                    .replace_last_assistant_with_error(&send.conversation_id, &error.to_string());
                info!(stream_id, conversation = %send.conversation_id, error = %error, "Reply failed");
                self.outcomes
                    .insert(send.conversation_id.clone(), SendState::Failed);
                Some(SendOutcome::Failed {
                    conversation_id: send.conversation_id,
                    error,
                })
            }
        }
    }

    /// Delete a conversation, cancelling any reply still streaming into it.
    pub fn delete_conversation(&mut self, conversation_id: &str) -> bool {
        self.inflight.retain(|stream_id, send| {
            if send.conversation_id == conversation_id {
                debug!(stream_id, conversation = %conversation_id, "Cancelling stream of deleted conversation");
                send.cancel_token.cancel();
                false
            } else {
                true
            }
        });
        self.outcomes.remove(conversation_id);
        self.store.delete_conversation(conversation_id)
    }

    /// Ids of conversations with a reply in flight.
    pub fn streaming_conversations(&self) -> impl Iterator<Item = &str> {
        self.inflight
            .values()
            .map(|send| send.conversation_id.as_str())
    }

    /// Cancel every running stream. Used on exit.
    pub fn shutdown(&mut self) {
        for (_, send) in self.inflight.drain() {
            send.cancel_token.cancel();
        }
    }
}
