use crate::conversations::{ConversationList, RemovedConversation};
use crate::models::{ConversationId, Message, User};

/// Who is logged in. Loaded from `GET /me` and cleared on logout.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Session {
    pub user: Option<User>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

// Client-side view of the chat: what the UI renders
#[derive(Debug, Default)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub current_conversation: Option<ConversationId>,
    pub conversations: ConversationList,
    pub input: String,
    pub sending: bool,
    pub error: Option<String>,
    // Bumped whenever the displayed message list is swapped out
    pub(crate) view_epoch: u64,
    // Bumped on logout; sends from an older session never write back
    pub(crate) session_epoch: u64,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Starts a fresh chat with no active conversation.
    pub fn new_chat(&mut self) {
        self.show(None, Vec::new());
    }

    /// Makes `id` the active conversation, with `messages` as its history.
    pub fn show(&mut self, id: Option<ConversationId>, messages: Vec<Message>) {
        self.view_epoch += 1;
        self.current_conversation = id;
        self.messages = messages;
        self.error = None;
    }

    pub fn epoch(&self) -> u64 {
        self.view_epoch
    }

    /// Optimistically removes a conversation from the sidebar. If it was the
    /// active one the view is reset; that is not undone if the delete fails.
    pub fn remove_conversation(&mut self, id: ConversationId) -> RemovedConversation {
        if self.current_conversation == Some(id) {
            log::info!("Deleting active conversation {}, clearing view", id);
            self.new_chat();
        }
        self.conversations.remove(id)
    }

    pub fn restore_conversation(&mut self, removed: RemovedConversation) {
        log::warn!("Restoring conversation {} after failed delete", removed.id);
        self.conversations.restore(removed);
    }

    /// Drops everything tied to the logged-in user. A send still in flight
    /// keeps the sending flag until its stream settles.
    pub fn reset(&mut self) {
        let sending = self.sending;
        let view_epoch = self.view_epoch;
        let session_epoch = self.session_epoch;
        *self = ChatState::default();
        self.sending = sending;
        self.view_epoch = view_epoch + 1;
        self.session_epoch = session_epoch + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, MessageId};
    use chrono::Utc;

    fn state_with_active(id: ConversationId) -> ChatState {
        let mut state = ChatState::new();
        state.conversations.replace(
            vec![
                Conversation { id: 2, title: "b".into(), created_at: Utc::now() },
                Conversation { id: 1, title: "a".into(), created_at: Utc::now() },
            ],
            |_| false,
        );
        state.show(Some(id), vec![Message::user(MessageId::Server(10), "hi".into())]);
        state
    }

    #[test]
    fn deleting_active_conversation_clears_view() {
        let mut state = state_with_active(1);
        let epoch = state.epoch();
        let removed = state.remove_conversation(1);
        assert_eq!(state.current_conversation, None);
        assert!(state.messages.is_empty());
        assert!(state.epoch() > epoch);

        // A failed delete puts the entry back but leaves the view cleared
        state.restore_conversation(removed);
        assert!(state.conversations.get(1).is_some());
        assert_eq!(state.current_conversation, None);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn deleting_other_conversation_keeps_view() {
        let mut state = state_with_active(1);
        state.remove_conversation(2);
        assert_eq!(state.current_conversation, Some(1));
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn reset_still_advances_epoch() {
        let mut state = state_with_active(1);
        let epoch = state.epoch();
        state.reset();
        assert!(state.epoch() > epoch);
        assert!(state.conversations.items().is_empty());
    }
}
