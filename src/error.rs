use std::time::Duration;

/// Errors surfaced by the chat client.
///
/// Every variant maps to a dismissible message via [`ChatError::user_message`];
/// failures during a send are additionally rolled back before they reach the
/// caller.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("login rejected by server")]
    LoginRejected,

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Server(String),

    #[error("stream ended before the response was complete")]
    Incomplete,

    #[error("no data received from server for {0:?}")]
    StreamIdle(Duration),

    #[error("sending was cancelled before the reply finished")]
    Cancelled,

    #[error("a message is already being sent")]
    Busy,

    #[error("message is empty")]
    EmptyMessage,
}

impl ChatError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::NotAuthenticated | ChatError::LoginRejected)
    }

    /// Text shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::NotAuthenticated => "You are not logged in. Please log in and try again.".to_string(),
            ChatError::LoginRejected => "Login failed. Check your username and password.".to_string(),
            ChatError::Transport(e) => format!("Could not reach the server: {}", e),
            ChatError::Status { status, .. } => format!("The server returned an error ({}).", status),
            ChatError::Server(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
