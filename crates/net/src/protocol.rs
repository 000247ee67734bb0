//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire, as
//! `{"event": "<name>", "data": {...}}` with camelCase field names. Each
//! direction is a closed set of message kinds; client messages are
//! validated into a [`Request`] before they reach a room.

use serde::{Deserialize, Serialize};
use watchparty_core::{
    normalize_nickname, ChatMessage, ConnectionId, EpisodePointer, Error as RoomError, ErrorKind,
    MemberInfo, ResumeToken, RoomCode, RoomEvent, RoomLimits,
};

/// Messages sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    CreateRoom {
        nickname: String,
    },

    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        nickname: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_token: Option<ResumeToken>,
    },

    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        room_code: String,
    },

    ChatMessage {
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    ChangeEpisode {
        episode_id: String,
        anime_id: String,
        room_code: String,
    },

    /// Reserved: playback is independent per client, so the server
    /// answers this with an `unsupported` error
    VideoAction {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<f64>,
    },

    Ping,
}

/// A client message after boundary validation
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Create {
        nickname: String,
    },
    Join {
        code: RoomCode,
        nickname: String,
        resume: Option<ResumeToken>,
    },
    Leave {
        code: RoomCode,
    },
    Chat {
        message: String,
    },
    ChangeEpisode {
        code: RoomCode,
        episode: EpisodePointer,
    },
    VideoAction,
    Ping,
}

impl ClientMessage {
    /// Validate fields and normalize user input
    pub fn into_request(self) -> watchparty_core::Result<Request> {
        Ok(match self {
            ClientMessage::CreateRoom { nickname } => Request::Create {
                nickname: normalize_nickname(&nickname)?,
            },
            ClientMessage::JoinRoom {
                room_code,
                nickname,
                resume_token,
            } => Request::Join {
                code: RoomCode::parse(&room_code)?,
                nickname: normalize_nickname(&nickname)?,
                resume: resume_token,
            },
            ClientMessage::LeaveRoom { room_code } => Request::Leave {
                code: RoomCode::parse(&room_code)?,
            },
            ClientMessage::ChatMessage { message } => {
                let message = message.trim();
                if message.is_empty() {
                    return Err(RoomError::Validation("Message is empty".into()));
                }
                Request::Chat {
                    message: message.to_string(),
                }
            }
            ClientMessage::ChangeEpisode {
                episode_id,
                anime_id,
                room_code,
            } => Request::ChangeEpisode {
                code: RoomCode::parse(&room_code)?,
                episode: EpisodePointer::new(&anime_id, &episode_id)?,
            },
            ClientMessage::VideoAction { .. } => Request::VideoAction,
            ClientMessage::Ping => Request::Ping,
        })
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection, with the limits this server enforces
    #[serde(rename_all = "camelCase")]
    Welcome {
        connection_id: ConnectionId,
        #[serde(default)]
        limits: RoomLimits,
    },

    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_code: RoomCode,
        is_host: bool,
        members: Vec<MemberInfo>,
        resume_token: ResumeToken,
    },

    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_code: RoomCode,
        is_host: bool,
        members: Vec<MemberInfo>,
        chat: Vec<ChatMessage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_episode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anime_id: Option<String>,
        resume_token: ResumeToken,
    },

    UserJoined {
        members: Vec<MemberInfo>,
        nickname: String,
        notice: ChatMessage,
    },

    UserLeft {
        members: Vec<MemberInfo>,
        nickname: String,
        notice: ChatMessage,
    },

    #[serde(rename_all = "camelCase")]
    NewHost {
        members: Vec<MemberInfo>,
        new_host_id: ConnectionId,
        new_host_nickname: String,
        notice: ChatMessage,
    },

    ChatMessage(ChatMessage),

    #[serde(rename_all = "camelCase")]
    ChangeEpisode {
        episode_id: String,
        anime_id: String,
        room_code: RoomCode,
    },

    RoomLeft,

    Error {
        kind: ErrorKind,
        message: String,
    },

    Pong,

    ServerShutdown,
}

impl ServerMessage {
    /// Error reply for the requesting connection
    pub fn error(err: &RoomError) -> Self {
        ServerMessage::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn protocol_error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            kind: ErrorKind::Protocol,
            message: message.into(),
        }
    }
}

impl From<RoomEvent> for ServerMessage {
    fn from(event: RoomEvent) -> Self {
        match event {
            RoomEvent::Entered(snapshot) if snapshot.created => ServerMessage::RoomCreated {
                room_code: snapshot.code,
                is_host: snapshot.is_host,
                members: snapshot.members,
                resume_token: snapshot.resume_token,
            },
            RoomEvent::Entered(snapshot) => {
                let (anime_id, current_episode) = match snapshot.episode {
                    Some(ep) => (Some(ep.anime_id), Some(ep.episode_id)),
                    None => (None, None),
                };
                ServerMessage::RoomJoined {
                    room_code: snapshot.code,
                    is_host: snapshot.is_host,
                    members: snapshot.members,
                    chat: snapshot.chat,
                    current_episode,
                    anime_id,
                    resume_token: snapshot.resume_token,
                }
            }
            RoomEvent::UserJoined {
                members,
                nickname,
                notice,
            } => ServerMessage::UserJoined {
                members,
                nickname,
                notice,
            },
            RoomEvent::UserLeft {
                members,
                nickname,
                notice,
            } => ServerMessage::UserLeft {
                members,
                nickname,
                notice,
            },
            RoomEvent::NewHost {
                members,
                new_host_id,
                new_host_nickname,
                notice,
            } => ServerMessage::NewHost {
                members,
                new_host_id,
                new_host_nickname,
                notice,
            },
            RoomEvent::Chat(message) => ServerMessage::ChatMessage(message),
            RoomEvent::EpisodeChanged { code, episode } => ServerMessage::ChangeEpisode {
                episode_id: episode.episode_id,
                anime_id: episode.anime_id,
                room_code: code,
            },
            RoomEvent::Left => ServerMessage::RoomLeft,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_wire_format() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "joinRoom",
            "data": { "roomCode": "ab12cd", "nickname": " Yui " }
        }))
        .unwrap();

        let request = msg.into_request().unwrap();
        assert_eq!(
            request,
            Request::Join {
                code: RoomCode::parse("AB12CD").unwrap(),
                nickname: "Yui".into(),
                resume: None,
            }
        );
    }

    #[test]
    fn test_unit_variant_without_data() {
        let msg: ClientMessage = serde_json::from_value(json!({ "event": "ping" })).unwrap();
        assert!(matches!(msg.into_request().unwrap(), Request::Ping));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_value(json!({ "event": "kickUser", "data": {} }));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_at_boundary() {
        let empty_chat = ClientMessage::ChatMessage {
            message: "  ".into(),
        };
        assert!(matches!(
            empty_chat.into_request(),
            Err(RoomError::Validation(_))
        ));

        let no_anime = ClientMessage::ChangeEpisode {
            episode_id: "12".into(),
            anime_id: "".into(),
            room_code: "ABCDEF".into(),
        };
        assert!(no_anime.into_request().is_err());

        let bad_code = ClientMessage::LeaveRoom {
            room_code: "??".into(),
        };
        assert!(bad_code.into_request().is_err());
    }

    #[test]
    fn test_video_action_is_reserved() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "videoAction",
            "data": { "action": "pause", "position": 12.5 }
        }))
        .unwrap();
        assert_eq!(msg.into_request().unwrap(), Request::VideoAction);
    }

    #[test]
    fn test_server_error_shape() {
        let msg = ServerMessage::error(&RoomError::NotHost);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["kind"], "notHost");
    }

    #[test]
    fn test_room_joined_episode_fields() {
        let msg = ServerMessage::ChangeEpisode {
            episode_id: "107257".into(),
            anime_id: "frieren-18542".into(),
            room_code: RoomCode::parse("QWERTY").unwrap(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "changeEpisode");
        assert_eq!(value["data"]["episodeId"], "107257");
        assert_eq!(value["data"]["roomCode"], "QWERTY");
    }

    #[test]
    fn test_welcome_carries_limits() {
        let limits = RoomLimits {
            max_message_len: 2000,
            ..RoomLimits::default()
        };
        let msg = ServerMessage::Welcome {
            connection_id: ConnectionId::new(),
            limits,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["data"]["limits"]["max_message_len"], 2000);

        // A welcome without limits falls back to the defaults
        let bare: ServerMessage = serde_json::from_value(json!({
            "event": "welcome",
            "data": { "connectionId": ConnectionId::new() }
        }))
        .unwrap();
        assert!(matches!(
            bare,
            ServerMessage::Welcome { limits, .. } if limits == RoomLimits::default()
        ));
    }
}
