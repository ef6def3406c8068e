use crate::error::{ChatError, Result};
use crate::models::{
    ChatRequest, Conversation, ConversationId, ConversationsEnvelope, MeEnvelope, Message,
    MessagesEnvelope, User,
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::pin::Pin;

// Raw body of a chat response, chunked however the transport delivers it
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

// Everything the client needs from the chat backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `None` when the session is not logged in.
    async fn current_user(&self) -> Result<Option<User>>;

    async fn login(&self, username: &str, password: &str) -> Result<()>;

    async fn logout(&self) -> Result<()>;

    /// Where to send the user for federated login.
    fn federated_login_url(&self) -> String;

    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    async fn create_conversation(&self, title: &str) -> Result<Conversation>;

    async fn delete_conversation(&self, id: ConversationId) -> Result<()>;

    async fn list_messages(&self, id: ConversationId) -> Result<Vec<Message>>;

    /// Opens the chat stream. A 401 is reported here, before any body is read.
    async fn send_chat(&self, request: &ChatRequest) -> Result<ByteStream>;
}

#[derive(Serialize, Debug)]
struct LoginForm<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize, Debug)]
struct NewConversation<'a> {
    title: &'a str,
}

// --- HTTP implementation ---

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Session cookies set by the server are kept for all later requests.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

// Maps 401 and other non-2xx responses to errors
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ChatError::NotAuthenticated);
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<Failed to read error body>".to_string());
        log::error!("Request failed with status {}: {}", status, body);
        return Err(ChatError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn current_user(&self) -> Result<Option<User>> {
        let response = self.client.get(self.url("/me")).send().await?;
        match check_status(response).await {
            Ok(response) => Ok(response.json::<MeEnvelope>().await?.user),
            Err(ChatError::NotAuthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        log::info!("Logging in as {}", username);
        let response = self
            .client
            .post(self.url("/auth/login"))
            .form(&LoginForm { username, password })
            .send()
            .await?;
        match check_status(response).await {
            Ok(_) => Ok(()),
            Err(ChatError::NotAuthenticated) => Err(ChatError::LoginRejected),
            Err(e) => Err(e),
        }
    }

    async fn logout(&self) -> Result<()> {
        let response = self.client.post(self.url("/auth/logout")).send().await?;
        check_status(response).await?;
        Ok(())
    }

    fn federated_login_url(&self) -> String {
        self.url("/login")
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let response = self.client.get(self.url("/api/conversations")).send().await?;
        let envelope: ConversationsEnvelope = check_status(response).await?.json().await?;
        Ok(envelope.conversations)
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let response = self
            .client
            .post(self.url("/api/conversations"))
            .json(&NewConversation { title })
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/conversations/{}", id)))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn list_messages(&self, id: ConversationId) -> Result<Vec<Message>> {
        let response = self
            .client
            .get(self.url(&format!("/api/conversations/{}/messages", id)))
            .send()
            .await?;
        let envelope: MessagesEnvelope = check_status(response).await?.json().await?;
        Ok(envelope.messages.into_iter().map(Message::from).collect())
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<ByteStream> {
        log::info!(
            "Opening chat stream (conversation: {:?})",
            request.conversation_id
        );
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ChatError::from));
        Ok(Box::pin(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let backend = HttpBackend::with_client(Client::new(), "http://localhost:8000/");
        assert_eq!(backend.url("/api/chat"), "http://localhost:8000/api/chat");
        assert_eq!(backend.federated_login_url(), "http://localhost:8000/login");
    }
}
