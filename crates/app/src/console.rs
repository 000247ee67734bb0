//! Terminal front-end
//!
//! Slash commands and chat text on stdin; room activity and navigation on
//! stdout.

use watchparty_core::{ChatMessage, EpisodePointer, Error, MemberInfo, Result};
use watchparty_net::ServerMessage;

use crate::catalog::EpisodeProvider;
use crate::navigation::{MemoryNavigator, Navigator};
use crate::network::NetworkEvent;
use crate::session::SessionState;

pub const HELP: &str = "\
Commands:
  /create                 create a room
  /join CODE [NICKNAME]   join a room
  /leave                  leave the current room
  /episode ANIME [EP]     move the room to an episode (host only)
  /nick NAME              change nickname for the next create or join
  /who                    list room members
  /status                 show connection and room state
  /help                   show this help
  /quit                   disconnect and exit
Anything else is sent as a chat message.";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create,
    Join {
        code: String,
        nickname: Option<String>,
    },
    Leave,
    Episode {
        anime_id: String,
        episode: Option<String>,
    },
    Nick(String),
    Who,
    Status,
    Help,
    Quit,
    Chat(String),
}

/// Parse a line; `None` for blank input
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(Command::Chat(line.to_string())));
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let command = match parts[0] {
        "/create" => Command::Create,
        "/join" => {
            let code = parts
                .get(1)
                .ok_or_else(|| usage("/join CODE [NICKNAME]"))?;
            let nickname = (parts.len() > 2).then(|| parts[2..].join(" "));
            Command::Join {
                code: code.to_string(),
                nickname,
            }
        }
        "/leave" => Command::Leave,
        "/episode" | "/ep" => {
            let anime_id = parts.get(1).ok_or_else(|| usage("/episode ANIME [EP]"))?;
            Command::Episode {
                anime_id: anime_id.to_string(),
                episode: parts.get(2).map(|s| s.to_string()),
            }
        }
        "/nick" => {
            if parts.len() < 2 {
                return Err(usage("/nick NAME"));
            }
            Command::Nick(parts[1..].join(" "))
        }
        "/who" => Command::Who,
        "/status" => Command::Status,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => {
            return Err(Error::Validation(format!(
                "Unknown command {}, try /help",
                other
            )))
        }
    };
    Ok(Some(command))
}

fn usage(text: &str) -> Error {
    Error::Validation(format!("Usage: {}", text))
}

/// `[HH:MM] <nick> text`, with system notices marked
pub fn render_chat(message: &ChatMessage) -> String {
    if message.is_system {
        format!("[{}] * {}", message.format_timestamp(), message.message)
    } else {
        let marker = if message.is_host { " (host)" } else { "" };
        format!(
            "[{}] <{}{}> {}",
            message.format_timestamp(),
            message.nickname,
            marker,
            message.message
        )
    }
}

/// Member list, oldest first
pub fn render_members(members: &[MemberInfo]) -> String {
    let names: Vec<String> = members
        .iter()
        .map(|m| {
            if m.is_host {
                format!("{} (host)", m.nickname)
            } else {
                m.nickname.clone()
            }
        })
        .collect();
    format!("{} member(s): {}", members.len(), names.join(", "))
}

/// One-line summary of the session
pub fn render_status(state: &SessionState) -> String {
    let connection = if state.is_connected {
        "connected"
    } else {
        "disconnected"
    };
    let mut line = format!("{} as {}", connection, state.nickname);
    if let Some(code) = &state.room_code {
        line.push_str(&format!(", room {}", code));
        if state.is_host {
            line.push_str(" (host)");
        }
    }
    if let Some(episode) = &state.current_episode {
        line.push_str(&format!(
            ", watching {} episode {}",
            episode.anime_id, episode.episode_id
        ));
    }
    if let Some(error) = &state.connection_error {
        line.push_str(&format!(", last error: {}", error));
    }
    line
}

/// Title and episode number when the catalog knows them, else the raw ids
pub fn episode_label(catalog: &dyn EpisodeProvider, episode: &EpisodePointer) -> String {
    let anime = catalog
        .title(&episode.anime_id)
        .unwrap_or(episode.anime_id.as_str());
    match catalog.episode_no(episode) {
        Some(number) => format!("{} episode {}", anime, number),
        None => format!("{} episode {}", anime, episode.episode_id),
    }
}

/// Lines to print for a network event. Room traffic is only shown while
/// `in_room`, checked after the event was reduced.
pub fn describe_event(
    event: &NetworkEvent,
    in_room: bool,
    catalog: &dyn EpisodeProvider,
) -> Vec<String> {
    match event {
        NetworkEvent::StateChanged(_) => Vec::new(),
        NetworkEvent::Connected { .. } => vec!["Connected to server".to_string()],
        NetworkEvent::ConnectionFailed(reason) => vec![format!("Connection failed: {}", reason)],
        NetworkEvent::Disconnected { deliberate: true } => {
            vec!["Disconnected from server".to_string()]
        }
        NetworkEvent::Disconnected { deliberate: false } => {
            vec!["Connection lost, reconnecting...".to_string()]
        }
        NetworkEvent::Message(msg) => describe_message(msg, in_room, catalog),
    }
}

fn describe_message(
    msg: &ServerMessage,
    in_room: bool,
    catalog: &dyn EpisodeProvider,
) -> Vec<String> {
    match msg {
        ServerMessage::RoomCreated { room_code, .. } => vec![format!(
            "Created room {}; share the code to watch together",
            room_code
        )],
        ServerMessage::RoomJoined {
            room_code,
            members,
            chat,
            ..
        } => {
            let mut lines = vec![
                format!("Joined room {}", room_code),
                render_members(members),
            ];
            lines.extend(chat.iter().map(render_chat));
            lines
        }
        ServerMessage::UserJoined { notice, .. }
        | ServerMessage::UserLeft { notice, .. }
        | ServerMessage::NewHost { notice, .. }
            if in_room =>
        {
            vec![render_chat(notice)]
        }
        ServerMessage::ChatMessage(message) if in_room => vec![render_chat(message)],
        ServerMessage::ChangeEpisode {
            episode_id,
            anime_id,
            ..
        } if in_room => match EpisodePointer::new(anime_id, episode_id) {
            Ok(episode) => vec![format!(
                "Host moved the room to {}",
                episode_label(catalog, &episode)
            )],
            Err(_) => Vec::new(),
        },
        ServerMessage::RoomLeft => vec!["Left room".to_string()],
        ServerMessage::Error { message, .. } => vec![format!("Error: {}", message)],
        ServerMessage::ServerShutdown => vec!["Server is shutting down".to_string()],
        _ => Vec::new(),
    }
}

/// Navigator that announces each page change on stdout
#[derive(Debug, Default)]
pub struct TerminalNavigator {
    inner: MemoryNavigator,
}

impl TerminalNavigator {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            inner: MemoryNavigator::new(location),
        }
    }
}

impl Navigator for TerminalNavigator {
    fn location(&self) -> String {
        self.inner.location()
    }

    fn navigate(&mut self, path: &str, replace: bool) {
        self.inner.navigate(path, replace);
        println!("-> {}", path);
    }
}
