use crate::api::HttpBackend;
use crate::client::{ChatClient, ClientEvent};
use crate::config::{ClientConfig, BASE_URL_VAR, DEFAULT_BASE_URL, DEFAULT_IDLE_SECS, IDLE_SECS_VAR};
use crate::models::{ConversationId, Message, Sender};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(name = "convochat", version, about = "Terminal client for the chat backend")]
pub struct Args {
    /// Backend base URL
    #[arg(long, env = BASE_URL_VAR, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Seconds without stream data before a reply is abandoned, 0 to wait forever
    #[arg(long, env = IDLE_SECS_VAR, default_value_t = DEFAULT_IDLE_SECS)]
    pub idle_secs: u64,
}

impl Args {
    pub fn config(&self) -> Result<ClientConfig> {
        ClientConfig::new(&self.base_url, self.idle_secs)
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Login { username: String, password: String },
    Logout,
    Me,
    List,
    Open(ConversationId),
    New,
    Create(Option<String>),
    Delete(ConversationId),
    Help,
    Quit,
    Send(String),
    Nothing,
    Invalid(String),
}

impl Command {
    fn parse(line: &str) -> Command {
        let line = line.trim();
        if line.is_empty() {
            return Command::Nothing;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Send(line.to_string());
        };

        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        match (name, arg) {
            ("login", Some(arg)) => match arg.split_once(char::is_whitespace) {
                Some((username, password)) => Command::Login {
                    username: username.to_string(),
                    password: password.trim().to_string(),
                },
                None => Command::Invalid("usage: /login <username> <password>".to_string()),
            },
            ("logout", None) => Command::Logout,
            ("me", None) => Command::Me,
            ("list", None) => Command::List,
            ("open", Some(arg)) => parse_id(arg).map_or_else(Command::Invalid, Command::Open),
            ("delete", Some(arg)) => parse_id(arg).map_or_else(Command::Invalid, Command::Delete),
            ("new", None) => Command::New,
            ("create", title) => Command::Create(title.map(str::to_string)),
            ("help", _) => Command::Help,
            ("quit", _) | ("exit", _) => Command::Quit,
            _ => Command::Invalid(format!("unknown command '/{}', try /help", rest)),
        }
    }
}

fn parse_id(raw: &str) -> std::result::Result<ConversationId, String> {
    raw.parse()
        .map_err(|_| format!("'{}' is not a conversation id", raw))
}

const HELP: &str = "\
/login <user> <password>  log in
/logout                   log out
/me                       show the logged-in user
/list                     list conversations
/open <id>                open a conversation
/new                      start a new chat
/create [title]           create an empty conversation
/delete <id>              delete a conversation
/quit                     exit
anything else is sent as a message";

fn print_message(message: &Message) {
    let who = match message.sender {
        Sender::User => "you",
        Sender::Assistant => "assistant",
    };
    println!("[{}] {}: {}", message.timestamp.format("%Y-%m-%d %H:%M"), who, message.content);
}

async fn print_conversations(client: &ChatClient) {
    let state = client.state().lock().await;
    if state.conversations.items().is_empty() {
        println!("No conversations yet.");
        return;
    }
    for convo in state.conversations.items() {
        let marker = if state.current_conversation == Some(convo.id) { '*' } else { ' ' };
        println!(
            "{} {:>5}  {}  {}",
            marker,
            convo.id,
            convo.created_at.format("%Y-%m-%d"),
            convo.title
        );
    }
}

// Prints streamed output as the client publishes it
fn spawn_printer(client: &ChatClient) -> tokio::task::JoinHandle<()> {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::MessageChunk { delta }) => {
                    print!("{}", delta);
                    let _ = std::io::stdout().flush();
                }
                Ok(ClientEvent::StreamFinished) => println!(),
                Ok(ClientEvent::ConversationAdopted { conversation_id }) => {
                    println!("(conversation {})", conversation_id);
                }
                Ok(ClientEvent::Error { message }) => eprintln!("\nerror: {}", message),
                Ok(ClientEvent::ConversationsChanged) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Terminal output fell behind, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn report_session(client: &ChatClient) {
    match client.load_session().await {
        Ok(session) => match session.user {
            Some(user) => println!("Logged in as {}", user.name.unwrap_or(user.email)),
            None => println!(
                "Not logged in. Use /login or sign in at {}",
                client.federated_login_url()
            ),
        },
        Err(e) => eprintln!("error: {}", e.user_message()),
    }
}

pub async fn run(args: Args) -> Result<()> {
    let config = args.config()?;
    log::info!("Connecting to {}", config.base_url);
    let backend = HttpBackend::new(&config.base_url).context("Failed to build HTTP client")?;
    let client = ChatClient::new(Arc::new(backend), config.stream_idle_timeout);
    let printer = spawn_printer(&client);

    report_session(&client).await;
    if client.session().await.is_authenticated() {
        if let Err(e) = client.refresh_conversations().await {
            eprintln!("error: {}", e.user_message());
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read from stdin")? {
        let result = match Command::parse(&line) {
            Command::Nothing => Ok(()),
            Command::Invalid(reason) => {
                eprintln!("{}", reason);
                Ok(())
            }
            Command::Help => {
                println!("{}", HELP);
                Ok(())
            }
            Command::Quit => break,
            Command::Login { username, password } => {
                match client.login(&username, &password).await {
                    Ok(_) => {
                        report_session(&client).await;
                        client.refresh_conversations().await
                    }
                    Err(e) => Err(e),
                }
            }
            Command::Logout => client.logout().await.map(|_| println!("Logged out.")),
            Command::Me => {
                report_session(&client).await;
                Ok(())
            }
            Command::List => match client.refresh_conversations().await {
                Ok(()) => {
                    print_conversations(&client).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::Open(id) => match client.select_conversation(id).await {
                Ok(()) => {
                    client.messages().await.iter().for_each(print_message);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::New => {
                client.new_chat().await;
                println!("Started a new chat.");
                Ok(())
            }
            Command::Create(title) => client
                .create_conversation(title.as_deref())
                .await
                .map(|c| println!("Created conversation {} ({})", c.id, c.title)),
            Command::Delete(id) => client.delete_conversation(id).await.map(|sent| {
                if !sent {
                    println!("Conversation {} is already being deleted.", id);
                }
            }),
            Command::Send(text) => {
                client.set_input(text).await;
                // The printer already reported stream failures
                if let Err(e) = client.send_message().await {
                    log::debug!("Send failed: {:?}", e);
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("error: {}", e.user_message());
        }
    }

    drop(client);
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_build_config() {
        let args = Args::try_parse_from(["convochat", "--base-url", "http://chat.test/", "--idle-secs", "0"]).unwrap();
        let config = args.config().unwrap();
        assert_eq!(config.base_url, "http://chat.test");
        assert_eq!(config.stream_idle_timeout, None);
    }

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(Command::parse("  hello there "), Command::Send("hello there".into()));
        assert_eq!(Command::parse("   "), Command::Nothing);
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            Command::parse("/login alice s3cret pass"),
            Command::Login {
                username: "alice".into(),
                password: "s3cret pass".into()
            }
        );
        assert_eq!(Command::parse("/open 12"), Command::Open(12));
        assert_eq!(Command::parse("/delete 4"), Command::Delete(4));
        assert_eq!(Command::parse("/create"), Command::Create(None));
        assert_eq!(Command::parse("/create Trip plans"), Command::Create(Some("Trip plans".into())));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(Command::parse("/open abc"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/login alice"), Command::Invalid(_)));
        assert!(matches!(Command::parse("/frobnicate"), Command::Invalid(_)));
    }
}
