//! `WireChat` — real-time chat console client.
//!
//! Runs a line-oriented client against a chat backend: sign in, watch
//! conversations update live, and drive everything with slash commands.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/wirechat/config.toml`).
//!
//! ```bash
//! # Sign in from the command line
//! cargo run --bin wirechat -- --ws-url ws://127.0.0.1:4000/ws \
//!     --api-url http://127.0.0.1:4000/api \
//!     --user-id 1 --email me@example.com --token <access-token>
//!
//! # Or via environment variables
//! WIRECHAT_USER_ID=1 WIRECHAT_EMAIL=me@example.com WIRECHAT_TOKEN=... cargo run
//! ```

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use wirechat::client::{ChatClient, ClientEvent, ClientHandles};
use wirechat::config::{CliArgs, ClientConfig};
use wirechat::presence::PresenceEvent;
use wirechat::rest::RestClient;
use wirechat::session::Credentials;
use wirechat::store::{Conversation, DeliveryState, Direction, Message, StoreEvent};
use wirechat::transport::ws::WsConnector;
use wirechat_proto::presence::PresenceStatus;
use wirechat_proto::user::UserId;

type Client = Arc<ChatClient<RestClient, WsConnector>>;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Initialize logging before anything chatty (logs go to file, keeping
    // stdout for the console itself).
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("wirechat starting");

    let (client, handles) = ChatClient::from_config(&config);

    // Sign in up front when the configuration already carries credentials.
    if let Some(login) = config.to_login_config() {
        let credentials = Credentials {
            access_token: login.access_token,
            refresh_token: login.refresh_token.unwrap_or_default(),
        };
        let id = UserId::new(login.user_id);
        match client.login(id, &login.email, credentials).await {
            Ok(()) => println!("Signed in as {} ({id})", login.email),
            Err(e) => println!("Sign-in failed: {e}"),
        }
    } else {
        println!("Not signed in; use /login <id> <email> <token> to connect.");
    }

    let result = run_repl(&client, handles).await;

    tracing::info!("wirechat exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs are written to a file (never stdout, which belongs to the console).
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("wirechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Main console loop: interleave stdin commands with background updates.
async fn run_repl(client: &Client, mut handles: ClientHandles) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();
    prompt()?;

    loop {
        tokio::select! {
            // Step 1: a line of user input.
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_line(client, line.trim()).await {
                    break;
                }
                prompt()?;
            }
            // Step 2: chat state changed in the background.
            Some(event) = handles.store_events.recv() => {
                on_store_event(client, &event);
            }
            // Step 3: a peer's presence or typing state changed.
            Some(event) = handles.presence_events.recv() => {
                on_presence_event(&event);
            }
            // Step 4: connection-level news.
            Some(event) = handles.client_events.recv() => {
                on_client_event(&event);
            }
        }
    }

    client.disconnect();
    Ok(())
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

// ---- command handling ----

/// One parsed console command.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Login { id: i64, email: String, token: String },
    Logout,
    Connect,
    Contacts,
    Open(i64),
    Close,
    Say(String),
    Search(String),
    Chat(i64),
    Read(i64),
    Typing,
    Retry(String),
    Discard(String),
    Status(PresenceStatus),
    Refresh,
    Quit,
}

/// Parse a console line. Anything not starting with `/` is a message for
/// the open conversation.
fn parse_command(line: &str) -> Result<Command, String> {
    if line.is_empty() {
        return Err(String::new());
    }
    if !line.starts_with('/') {
        return Ok(Command::Say(line.to_owned()));
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match name {
        "/help" => Ok(Command::Help),
        "/login" => {
            let mut args = rest.split_whitespace();
            let id = args
                .next()
                .and_then(|raw| raw.parse::<i64>().ok())
                .ok_or("usage: /login <id> <email> <token>")?;
            let email = args.next().ok_or("usage: /login <id> <email> <token>")?;
            let token = args.next().ok_or("usage: /login <id> <email> <token>")?;
            Ok(Command::Login {
                id,
                email: email.to_owned(),
                token: token.to_owned(),
            })
        }
        "/logout" => Ok(Command::Logout),
        "/connect" => Ok(Command::Connect),
        "/contacts" => Ok(Command::Contacts),
        "/open" => parse_peer(rest, "/open").map(Command::Open),
        "/close" => Ok(Command::Close),
        "/search" => {
            if rest.is_empty() {
                Err("usage: /search <name or email>".to_owned())
            } else {
                Ok(Command::Search(rest.to_owned()))
            }
        }
        "/chat" => parse_peer(rest, "/chat").map(Command::Chat),
        "/read" => parse_peer(rest, "/read").map(Command::Read),
        "/typing" => Ok(Command::Typing),
        "/retry" => {
            if rest.is_empty() {
                Err("usage: /retry <message-id>".to_owned())
            } else {
                Ok(Command::Retry(rest.to_owned()))
            }
        }
        "/discard" => {
            if rest.is_empty() {
                Err("usage: /discard <message-id>".to_owned())
            } else {
                Ok(Command::Discard(rest.to_owned()))
            }
        }
        "/status" => match rest {
            "online" => Ok(Command::Status(PresenceStatus::Online)),
            "away" => Ok(Command::Status(PresenceStatus::Away)),
            "busy" => Ok(Command::Status(PresenceStatus::Busy)),
            "invisible" => Ok(Command::Status(PresenceStatus::Invisible)),
            "offline" => Ok(Command::Status(PresenceStatus::Offline)),
            _ => Err("usage: /status online|away|busy|invisible|offline".to_owned()),
        },
        "/refresh" => Ok(Command::Refresh),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {other}; try /help")),
    }
}

fn parse_peer(raw: &str, usage: &str) -> Result<i64, String> {
    raw.parse::<i64>()
        .map_err(|_| format!("usage: {usage} <user-id>"))
}

/// Execute one console line. Returns `false` when the loop should end.
async fn handle_line(client: &Client, line: &str) -> bool {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(message) => {
            if !message.is_empty() {
                println!("{message}");
            }
            return true;
        }
    };

    match command {
        Command::Help => print_help(),
        Command::Login { id, email, token } => {
            let credentials = Credentials {
                access_token: token,
                refresh_token: String::new(),
            };
            match client.login(UserId::new(id), &email, credentials).await {
                Ok(()) => println!("Signed in as {email}"),
                Err(e) => println!("Sign-in failed: {e}"),
            }
        }
        Command::Logout => {
            client.logout().await;
            println!("Signed out.");
        }
        Command::Connect => match client.reconnect().await {
            Ok(()) => {}
            Err(e) => println!("Could not connect: {e}"),
        },
        Command::Contacts => render_conversations(&client.store().conversations()),
        Command::Open(id) => {
            if let Err(e) = client.open_conversation(UserId::new(id)).await {
                println!("Could not load history: {e}");
            }
        }
        Command::Close => client.close_conversation(),
        Command::Say(text) => {
            let Some(peer) = client.store().active_peer() else {
                println!("No open conversation; /open <user-id> first.");
                return true;
            };
            client.send_text(peer, text).await;
        }
        Command::Search(query) => {
            if let Err(e) = client.search(&query).await {
                println!("Search failed: {e}");
            }
        }
        Command::Chat(id) => match client.start_chat(UserId::new(id)).await {
            Ok(conversation) => println!("Chatting with {}.", conversation.peer.name),
            Err(e) => println!("Could not start chat: {e}"),
        },
        Command::Read(id) => {
            if let Err(e) = client.mark_read(UserId::new(id)).await {
                println!("Could not mark as read: {e}");
            }
        }
        Command::Typing => {
            let Some(peer) = client.store().active_peer() else {
                println!("No open conversation; /open <user-id> first.");
                return true;
            };
            client.notify_typing(peer).await;
        }
        Command::Retry(message_id) => {
            let Some(peer) = client.store().active_peer() else {
                println!("No open conversation; /open <user-id> first.");
                return true;
            };
            if let Err(e) = client.store().retry_message(peer, &message_id).await {
                println!("Retry failed: {e}");
            }
        }
        Command::Discard(message_id) => {
            let Some(peer) = client.store().active_peer() else {
                println!("No open conversation; /open <user-id> first.");
                return true;
            };
            client.store().discard_message(peer, &message_id);
        }
        Command::Status(status) => {
            if client.set_status(status).await {
                println!("Status set to {status}.");
            } else {
                println!("Not connected; {} takes effect on reconnect.", client.status());
            }
        }
        Command::Refresh => {
            if let Err(e) = client.refresh_conversations().await {
                println!("Refresh failed: {e}");
            }
        }
        Command::Quit => return false,
    }
    true
}

fn print_help() {
    println!("Commands:");
    println!("  /contacts                 list conversations");
    println!("  /open <user-id>           open a conversation");
    println!("  /close                    leave the open conversation");
    println!("  <text>                    send to the open conversation");
    println!("  /typing                   signal typing in the open conversation");
    println!("  /retry <message-id>       resend a failed message");
    println!("  /discard <message-id>     drop a failed message");
    println!("  /read <user-id>           mark a conversation as read");
    println!("  /search <name or email>   find users");
    println!("  /chat <user-id>           start a chat from a search result");
    println!("  /status <value>           online|away|busy|invisible|offline");
    println!("  /refresh                  reload the conversation list");
    println!("  /connect                  redial after a drop");
    println!("  /login <id> <email> <token>, /logout, /quit");
}

// ---- background event rendering ----

fn on_store_event(client: &Client, event: &StoreEvent) {
    match event {
        StoreEvent::ConversationsUpdated => {
            render_conversations(&client.store().conversations());
        }
        StoreEvent::MessagesUpdated { peer } => {
            // Only the open conversation renders live.
            if client.store().active_peer() == Some(*peer)
                && let Some(message) = client.store().messages_for(*peer).last()
            {
                println!("{}", render_message(message));
            }
        }
        StoreEvent::ActiveChanged { peer } => match peer {
            Some(peer) => {
                let name = client
                    .store()
                    .conversation(*peer)
                    .map_or_else(|| peer.to_string(), |c| c.peer.name);
                println!("-- conversation with {name} --");
                for message in client.store().messages_for(*peer) {
                    println!("{}", render_message(&message));
                }
            }
            None => println!("-- conversation closed --"),
        },
        StoreEvent::SearchUpdated => {
            let results = client.store().search_results();
            if results.is_empty() {
                println!("No users found.");
            } else {
                for profile in results {
                    let marker = if profile.is_online { "*" } else { " " };
                    println!("  {marker} [{}] {}", profile.id, profile.name);
                }
            }
        }
        StoreEvent::Error { message } => println!("Error: {message}"),
    }
}

fn on_presence_event(event: &PresenceEvent) {
    match event {
        PresenceEvent::StatusChanged { user, status } => {
            println!("* user {user} is now {status}");
        }
        PresenceEvent::TypingChanged { user, is_typing } => {
            if *is_typing {
                println!("* user {user} is typing...");
            }
        }
    }
}

fn on_client_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected => println!("* connected"),
        ClientEvent::Disconnected => println!("* disconnected"),
        ClientEvent::SocketError { message } => println!("* connection trouble: {message}"),
        ClientEvent::GroupMessage { .. } => println!("* group message received (not shown)"),
        ClientEvent::SessionExpired => println!("* session expired; sign in again"),
    }
}

// ---- rendering ----

fn render_conversations(conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("No conversations yet; /search to find someone.");
        return;
    }
    println!("Conversations:");
    for conversation in conversations {
        let online = if conversation.peer.is_online { "*" } else { " " };
        let unread = if conversation.unread_count > 0 {
            format!(" ({} unread)", conversation.unread_count)
        } else {
            String::new()
        };
        let preview = conversation.last_message.as_deref().unwrap_or("");
        println!(
            "  {online} [{}] {}{unread}  {preview}",
            conversation.peer.id, conversation.peer.name
        );
    }
}

fn render_message(message: &Message) -> String {
    let who = match message.direction {
        Direction::Mine => "me",
        Direction::Theirs => "them",
    };
    let suffix = match &message.state {
        DeliveryState::Pending => " ...",
        DeliveryState::Failed(_) => " [failed; /retry or /discard]",
        DeliveryState::Delivered => {
            if message.seen {
                " [seen]"
            } else {
                ""
            }
        }
    };
    format!("[{}] {who}: {}{suffix}", message.timestamp, message.text)
}
