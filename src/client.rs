use crate::api::ChatBackend;
use crate::error::{ChatError, Result};
use crate::models::{Conversation, ConversationId, Message};
use crate::reconcile::{Effect, PendingSend};
use crate::state::{ChatState, Session};
use crate::stream::{decode_stream, StreamEvent};
use dashmap::DashSet;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

/// Notifications for whoever renders the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    MessageChunk { delta: String },
    ConversationAdopted { conversation_id: ConversationId },
    ConversationsChanged,
    StreamFinished,
    Error { message: String },
}

// Shared handle to the chat session; clones share the same state
#[derive(Clone)]
pub struct ChatClient {
    backend: Arc<dyn ChatBackend>,
    state: Arc<Mutex<ChatState>>,
    session: Arc<RwLock<Session>>,
    pending_deletes: Arc<DashSet<ConversationId>>,
    events: broadcast::Sender<ClientEvent>,
    idle_timeout: Option<Duration>,
}

impl ChatClient {
    pub fn new(backend: Arc<dyn ChatBackend>, idle_timeout: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            backend,
            state: Arc::new(Mutex::new(ChatState::new())),
            session: Arc::new(RwLock::new(Session::default())),
            pending_deletes: Arc::new(DashSet::new()),
            events,
            idle_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &Arc<Mutex<ChatState>> {
        &self.state
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    // --- Session ---

    pub async fn load_session(&self) -> Result<Session> {
        let user = self.backend.current_user().await?;
        let mut session = self.session.write().await;
        session.user = user;
        Ok(session.clone())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        self.backend.login(username, password).await?;
        let session = self.load_session().await?;
        if !session.is_authenticated() {
            log::warn!("Login accepted but no session user was returned");
            return Err(ChatError::NotAuthenticated);
        }
        Ok(session)
    }

    pub fn federated_login_url(&self) -> String {
        self.backend.federated_login_url()
    }

    /// Ends the session. Local state is cleared even if the server call fails.
    pub async fn logout(&self) -> Result<()> {
        let result = self.backend.logout().await;
        self.session.write().await.user = None;
        self.state.lock().await.reset();
        self.emit(ClientEvent::ConversationsChanged);
        if let Err(e) = &result {
            log::error!("Logout request failed: {:?}", e);
        }
        result
    }

    // --- Conversations ---

    pub async fn refresh_conversations(&self) -> Result<()> {
        log::info!("Refreshing conversation list");
        let conversations = self.backend.list_conversations().await?;
        {
            let mut state = self.state.lock().await;
            let pending = &self.pending_deletes;
            state.conversations.replace(conversations, |id| pending.contains(&id));
        }
        self.emit(ClientEvent::ConversationsChanged);
        Ok(())
    }

    pub async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation> {
        let title = title.unwrap_or(DEFAULT_CONVERSATION_TITLE);
        let conversation = self.backend.create_conversation(title).await?;
        self.state.lock().await.conversations.insert_front(conversation.clone());
        self.emit(ClientEvent::ConversationsChanged);
        Ok(conversation)
    }

    pub async fn select_conversation(&self, id: ConversationId) -> Result<()> {
        let epoch = {
            let mut state = self.state.lock().await;
            state.show(Some(id), Vec::new());
            state.epoch()
        };
        let messages = self.backend.list_messages(id).await;

        let mut state = self.state.lock().await;
        if state.epoch() != epoch {
            log::debug!("View changed while loading conversation {}, dropping result", id);
            return Ok(());
        }
        match messages {
            Ok(messages) => {
                state.messages = messages;
                Ok(())
            }
            Err(e) => {
                state.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    pub async fn new_chat(&self) {
        self.state.lock().await.new_chat();
    }

    /// Removes a conversation right away and deletes it on the server.
    ///
    /// Returns `Ok(false)` without a request if a delete for the same id is
    /// already in flight. On failure the entry is put back in the sidebar.
    pub async fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        if !self.pending_deletes.insert(id) {
            log::debug!("Delete for conversation {} already in flight", id);
            return Ok(false);
        }

        let removed = self.state.lock().await.remove_conversation(id);
        self.emit(ClientEvent::ConversationsChanged);

        log::info!("Deleting conversation {}", id);
        let result = self.backend.delete_conversation(id).await;

        if let Err(e) = &result {
            log::error!("Failed to delete conversation {}: {:?}", id, e);
            let mut state = self.state.lock().await;
            state.restore_conversation(removed);
            state.error = Some(e.user_message());
            drop(state);
            self.emit(ClientEvent::ConversationsChanged);
            self.emit(ClientEvent::Error {
                message: e.user_message(),
            });
        }
        self.pending_deletes.remove(&id);
        result.map(|_| true)
    }

    // --- Chat ---

    pub async fn set_input(&self, text: impl Into<String>) {
        self.state.lock().await.set_input(text);
    }

    /// Sends whatever is in the input box and streams the reply into the
    /// message list. Failures are rolled back before being returned, and so
    /// is a send whose future is dropped before the reply finished.
    pub async fn send_message(&self) -> Result<()> {
        let pending = self.state.lock().await.begin_send()?;
        log::info!("Sending message (conversation: {:?})", pending.request().conversation_id);
        let mut guard = SendGuard {
            state: self.state.clone(),
            pending,
        };
        let pending = &mut guard.pending;

        let outcome = self.stream_reply(pending).await;
        if let Err(e) = &outcome {
            let message = e.user_message();
            self.state.lock().await.fail(pending, &message);
            self.emit(ClientEvent::Error { message });
        }
        outcome
    }

    async fn stream_reply(&self, pending: &mut PendingSend) -> Result<()> {
        let bytes = self.backend.send_chat(pending.request()).await?;
        let mut events = Box::pin(decode_stream(bytes, self.idle_timeout));

        while let Some(event) = events.next().await {
            let event = event?;
            log::debug!("Stream event: {:?}", event);
            if let StreamEvent::Content { content } = &event {
                self.emit(ClientEvent::MessageChunk {
                    delta: content.clone(),
                });
            }

            let effect = self.state.lock().await.apply(pending, event);
            match effect {
                Effect::None => {}
                Effect::ConversationAdopted(conversation_id) => {
                    self.emit(ClientEvent::ConversationAdopted { conversation_id });
                    self.refresh_after_create().await;
                }
                Effect::ConversationCreated(_) => self.refresh_after_create().await,
                Effect::Completed => {
                    self.emit(ClientEvent::StreamFinished);
                    return Ok(());
                }
                Effect::Failed(message) => return Err(ChatError::Server(message)),
            }
        }

        self.state.lock().await.finish(pending);
        Err(ChatError::Incomplete)
    }

    async fn refresh_after_create(&self) {
        if let Err(e) = self.refresh_conversations().await {
            log::warn!("Failed to refresh conversations after create: {:?}", e);
        }
    }

    /// Snapshot of the displayed messages.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }
}

// Rolls back a send that is dropped before it settled
struct SendGuard {
    state: Arc<Mutex<ChatState>>,
    pending: PendingSend,
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        if self.pending.is_settled() {
            return;
        }
        log::warn!("Send dropped before the reply finished, rolling back");
        let message = ChatError::Cancelled.user_message();
        match self.state.try_lock() {
            Ok(mut state) => state.fail(&mut self.pending, &message),
            Err(_) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let state = self.state.clone();
                    let mut pending = self.pending.clone();
                    handle.spawn(async move {
                        state.lock().await.fail(&mut pending, &message);
                    });
                }
                Err(_) => log::error!("No runtime to roll back the dropped send, sending flag stays set"),
            },
        }
    }
}
