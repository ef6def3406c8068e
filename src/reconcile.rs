//! Applies decoded stream events to the chat view.
//!
//! A send goes through `begin_send`, then one `apply` per event, then either
//! completes on `done` or is rolled back by `fail`. All in-flight bookkeeping
//! lives in [`PendingSend`] so the transitions can be driven without any I/O.

use crate::error::{ChatError, Result};
use crate::models::{ChatRequest, ConversationId, Message, MessageId};
use crate::state::ChatState;
use crate::stream::StreamEvent;

/// The assistant message currently receiving content, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantProgress {
    Idle,
    Streaming { id: MessageId, text: String },
}

#[derive(Debug, Clone)]
pub struct PendingSend {
    temp_id: MessageId,
    draft: String,
    request: ChatRequest,
    epoch: u64,
    session: u64,
    confirmed: bool,
    settled: bool,
    assistant: AssistantProgress,
}

impl PendingSend {
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }

    pub fn temp_id(&self) -> MessageId {
        self.temp_id
    }

    /// True once the server confirmed the user message via `meta`.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn assistant(&self) -> &AssistantProgress {
        &self.assistant
    }
}

/// What the caller has to do after an event was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// The server created a new conversation and it became the active one.
    ConversationAdopted(ConversationId),
    /// The server created a new conversation but the view moved on; only the
    /// sidebar needs a refresh.
    ConversationCreated(ConversationId),
    Completed,
    Failed(String),
}

impl ChatState {
    /// Appends the composed text as an optimistic user message and enters the
    /// sending state.
    pub fn begin_send(&mut self) -> Result<PendingSend> {
        if self.sending {
            return Err(ChatError::Busy);
        }
        let text = self.input.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let temp_id = MessageId::temporary();
        let request = ChatRequest {
            message: text.to_string(),
            conversation_id: self.current_conversation,
        };
        self.messages.push(Message::user(temp_id, request.message.clone()));
        let draft = std::mem::take(&mut self.input);
        self.sending = true;
        self.error = None;

        Ok(PendingSend {
            temp_id,
            draft,
            request,
            epoch: self.view_epoch,
            session: self.session_epoch,
            confirmed: false,
            settled: false,
            assistant: AssistantProgress::Idle,
        })
    }

    pub fn apply(&mut self, pending: &mut PendingSend, event: StreamEvent) -> Effect {
        if pending.settled {
            log::debug!("Ignoring stream event after send settled: {:?}", event);
            return Effect::None;
        }
        let on_view = self.view_epoch == pending.epoch;

        match event {
            StreamEvent::Meta {
                conversation_id,
                user_message,
            } => {
                if let Some(confirmed) = user_message {
                    if on_view {
                        if let Some(msg) = self.messages.iter_mut().find(|m| m.id == pending.temp_id) {
                            msg.id = MessageId::Server(confirmed.id);
                        }
                    }
                    pending.temp_id = MessageId::Server(confirmed.id);
                    pending.confirmed = true;
                }

                match conversation_id {
                    Some(id) if pending.request.conversation_id.is_none() => {
                        if on_view && self.current_conversation.is_none() {
                            log::info!("Adopting new conversation {}", id);
                            self.current_conversation = Some(id);
                            Effect::ConversationAdopted(id)
                        } else {
                            Effect::ConversationCreated(id)
                        }
                    }
                    _ => Effect::None,
                }
            }
            StreamEvent::Content { content } => {
                self.append_fragment(pending, on_view, content);
                Effect::None
            }
            StreamEvent::Done { ai_message } => {
                if on_view {
                    let streaming = match &pending.assistant {
                        AssistantProgress::Streaming { id, .. } => self.messages.iter().rposition(|m| m.id == *id),
                        AssistantProgress::Idle => None,
                    };
                    match streaming {
                        Some(index) => {
                            let msg = &mut self.messages[index];
                            msg.id = MessageId::Server(ai_message.id);
                            msg.content = ai_message.content;
                            msg.timestamp = ai_message.timestamp;
                        }
                        None => {
                            let mut msg = Message::assistant(MessageId::Server(ai_message.id), ai_message.content);
                            msg.timestamp = ai_message.timestamp;
                            self.messages.push(msg);
                        }
                    }
                }
                pending.assistant = AssistantProgress::Idle;
                pending.settled = true;
                self.sending = false;
                Effect::Completed
            }
            StreamEvent::Error { content } => {
                log::error!("Server reported stream error: {}", content);
                self.fail(pending, &content);
                Effect::Failed(content)
            }
        }
    }

    fn append_fragment(&mut self, pending: &mut PendingSend, on_view: bool, fragment: String) {
        let mut text = String::new();
        if let AssistantProgress::Streaming { id, text: received } = &mut pending.assistant {
            if !on_view {
                received.push_str(&fragment);
                return;
            }
            if let Some(last) = self.messages.last_mut().filter(|m| m.id == *id) {
                received.push_str(&fragment);
                last.content.push_str(&fragment);
                return;
            }
            // Something got appended after the reply; move the reply below it
            // so only one in-progress message exists
            let stale = *id;
            self.messages.retain(|m| m.id != stale);
            text = std::mem::take(received);
        }
        text.push_str(&fragment);

        let id = MessageId::temporary();
        if on_view {
            self.messages.push(Message::assistant(id, text.clone()));
        }
        pending.assistant = AssistantProgress::Streaming { id, text };
    }

    /// Rolls back a send: drops the user message unless the server confirmed
    /// it, drops any partial reply, gives the typed text back and shows
    /// `message`. Calling it on a settled send does nothing.
    ///
    /// A send started before a logout only releases the sending flag.
    pub fn fail(&mut self, pending: &mut PendingSend, message: &str) {
        if pending.settled {
            return;
        }
        pending.settled = true;
        self.sending = false;

        if self.view_epoch == pending.epoch {
            if !pending.confirmed {
                self.messages.retain(|m| m.id != pending.temp_id);
            }
            if let AssistantProgress::Streaming { id, .. } = &pending.assistant {
                self.messages.retain(|m| m.id != *id);
            }
        }
        pending.assistant = AssistantProgress::Idle;

        if self.session_epoch != pending.session {
            log::info!("Dropping failed send from an earlier session: {}", message);
            return;
        }
        let draft = std::mem::take(&mut pending.draft);
        if self.input.is_empty() {
            self.input = draft;
        } else {
            // Text typed meanwhile goes after the restored draft
            self.input = format!("{}\n{}", draft, self.input);
        }
        self.error = Some(message.to_string());
    }

    /// Called when the transport reports end of stream.
    pub fn finish(&mut self, pending: &mut PendingSend) -> Effect {
        if pending.settled {
            return Effect::None;
        }
        let message = ChatError::Incomplete.user_message();
        log::error!("Stream ended without a done event");
        self.fail(pending, &message);
        Effect::Failed(message)
    }
}
