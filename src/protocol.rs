//! Line protocol definitions
//!
//! Every message is one UTF-8 line with colon-separated fields, command
//! name first. Each command splits its payload into exactly its declared
//! number of fields; the last field keeps any further colons.

use serde::Serialize;

use crate::error::{AppError, CredentialError, PairingError, ProtocolError};
use crate::types::Status;

/// Answer to an invite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Client → Server command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        username: String,
        password: String,
        display_name: String,
    },
    Login {
        username: String,
        password: String,
    },
    Find {
        username: String,
    },
    Invite {
        username: String,
    },
    Response {
        decision: Decision,
        sender: String,
    },
    Message {
        text: String,
    },
    Typing,
    ChatEnd,
    AddContact {
        username: String,
    },
    RemoveContact {
        username: String,
    },
    GetContacts,
    ChangePassword {
        old: String,
        new: String,
        confirm: String,
    },
    Ping,
    Exit,
}

impl Command {
    /// Parse one line (without its terminating newline)
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (name, payload) = match line.split_once(':') {
            Some((name, payload)) => (name, Some(payload)),
            None => (line, None),
        };

        let cmd = match name {
            "REGISTER" => {
                let [username, password, display_name] = fields::<3>("REGISTER", payload)?;
                let display_name = if display_name.is_empty() {
                    username
                } else {
                    display_name
                };
                Command::Register {
                    username: required("REGISTER", username)?,
                    password: required("REGISTER", password)?,
                    display_name: display_name.to_string(),
                }
            }
            "LOGIN" => {
                let [username, password] = fields::<2>("LOGIN", payload)?;
                Command::Login {
                    username: required("LOGIN", username)?,
                    password: required("LOGIN", password)?,
                }
            }
            "FIND" => Command::Find {
                username: single("FIND", payload)?,
            },
            "INVITE" => Command::Invite {
                username: single("INVITE", payload)?,
            },
            "RESPONSE" => {
                let [decision, sender] = fields::<2>("RESPONSE", payload)?;
                let decision = match decision {
                    "ACCEPT" => Decision::Accept,
                    "REJECT" => Decision::Reject,
                    _ => return Err(ProtocolError::InvalidFormat("RESPONSE")),
                };
                Command::Response {
                    decision,
                    sender: required("RESPONSE", sender)?,
                }
            }
            "MESSAGE" => Command::Message {
                text: payload
                    .ok_or(ProtocolError::InvalidFormat("MESSAGE"))?
                    .to_string(),
            },
            "TYPING" => nullary("TYPING", payload, Command::Typing)?,
            "CHAT_END" => nullary("CHAT_END", payload, Command::ChatEnd)?,
            "ADD_CONTACT" => Command::AddContact {
                username: single("ADD_CONTACT", payload)?,
            },
            "REMOVE_CONTACT" => Command::RemoveContact {
                username: single("REMOVE_CONTACT", payload)?,
            },
            "GET_CONTACTS" => nullary("GET_CONTACTS", payload, Command::GetContacts)?,
            "CHANGE_PASSWORD" => {
                let [old, new, confirm] = fields::<3>("CHANGE_PASSWORD", payload)?;
                Command::ChangePassword {
                    old: old.to_string(),
                    new: required("CHANGE_PASSWORD", new)?,
                    confirm: confirm.to_string(),
                }
            }
            "PING" => nullary("PING", payload, Command::Ping)?,
            "EXIT" => nullary("EXIT", payload, Command::Exit)?,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(cmd)
    }

    /// Command name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "REGISTER",
            Command::Login { .. } => "LOGIN",
            Command::Find { .. } => "FIND",
            Command::Invite { .. } => "INVITE",
            Command::Response { .. } => "RESPONSE",
            Command::Message { .. } => "MESSAGE",
            Command::Typing => "TYPING",
            Command::ChatEnd => "CHAT_END",
            Command::AddContact { .. } => "ADD_CONTACT",
            Command::RemoveContact { .. } => "REMOVE_CONTACT",
            Command::GetContacts => "GET_CONTACTS",
            Command::ChangePassword { .. } => "CHANGE_PASSWORD",
            Command::Ping => "PING",
            Command::Exit => "EXIT",
        }
    }
}

/// Split `payload` into exactly `N` fields on the first `N - 1` colons
fn fields<'a, const N: usize>(
    cmd: &'static str,
    payload: Option<&'a str>,
) -> Result<[&'a str; N], ProtocolError> {
    let payload = payload.ok_or(ProtocolError::InvalidFormat(cmd))?;
    let mut out = [""; N];
    let mut parts = payload.splitn(N, ':');
    for slot in out.iter_mut() {
        *slot = parts.next().ok_or(ProtocolError::InvalidFormat(cmd))?;
    }
    Ok(out)
}

fn required(cmd: &'static str, field: &str) -> Result<String, ProtocolError> {
    if field.is_empty() {
        Err(ProtocolError::InvalidFormat(cmd))
    } else {
        Ok(field.to_string())
    }
}

fn single(cmd: &'static str, payload: Option<&str>) -> Result<String, ProtocolError> {
    required(cmd, payload.ok_or(ProtocolError::InvalidFormat(cmd))?)
}

/// Zero-arity commands: bare name or name followed by an empty payload
fn nullary(cmd: &'static str, payload: Option<&str>, value: Command) -> Result<Command, ProtocolError> {
    match payload {
        None | Some("") => Ok(value),
        Some(_) => Err(ProtocolError::InvalidFormat(cmd)),
    }
}

/// One row of a `CONTACTS:` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactEntry {
    pub username: String,
    pub display_name: String,
    pub status: Status,
}

/// Server → Client reply or event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Success(String),
    Error(String),
    NotFound(String),
    Rejected(String),
    Found { display_name: String, status: Status },
    Invite { from_username: String, from_display_name: String },
    InviteSent(String),
    ChatStart { partner_display_name: String },
    ChatEnd { reason: String },
    Message { sender_display_name: String, text: String },
    Typing,
    Pong,
    Contacts(Vec<ContactEntry>),
}

impl ServerMessage {
    pub fn success(text: impl Into<String>) -> Self {
        ServerMessage::Success(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        ServerMessage::Error(text.into())
    }

    /// Encode as a wire line without the trailing newline
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let line = match self {
            ServerMessage::Success(text) => format!("SUCCESS:{}", text),
            ServerMessage::Error(text) => format!("ERROR:{}", text),
            ServerMessage::NotFound(text) => format!("NOT_FOUND:{}", text),
            ServerMessage::Rejected(text) => format!("REJECTED:{}", text),
            ServerMessage::Found {
                display_name,
                status,
            } => format!("FOUND:{}:{}", display_name, status),
            ServerMessage::Invite {
                from_username,
                from_display_name,
            } => format!("INVITE:{}:{}", from_username, from_display_name),
            ServerMessage::InviteSent(text) => format!("INVITE_SENT:{}", text),
            ServerMessage::ChatStart {
                partner_display_name,
            } => format!("CHAT_START:{}", partner_display_name),
            ServerMessage::ChatEnd { reason } => format!("CHAT_END:{}", reason),
            ServerMessage::Message {
                sender_display_name,
                text,
            } => format!("MESSAGE:{}:{}", sender_display_name, text),
            ServerMessage::Typing => "TYPING:".to_string(),
            ServerMessage::Pong => "PONG:".to_string(),
            ServerMessage::Contacts(entries) => {
                format!("CONTACTS:{}", serde_json::to_string(entries)?)
            }
        };
        Ok(line)
    }
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        match &err {
            AppError::Protocol(ProtocolError::UnknownCommand(name)) => {
                ServerMessage::error(format!("Unknown command: {}", name))
            }
            AppError::Protocol(ProtocolError::LineTooLong) => ServerMessage::error("Line too long"),
            AppError::Protocol(_) => ServerMessage::error("Invalid command format"),
            AppError::Credential(e) => match e {
                CredentialError::AlreadyExists => ServerMessage::error("Username already exists"),
                CredentialError::InvalidCredentials => ServerMessage::error("Invalid credentials"),
                CredentialError::Mismatch => ServerMessage::error("New passwords do not match"),
                CredentialError::InvalidOldPassword => ServerMessage::error("Invalid old password"),
                CredentialError::TargetNotFound => ServerMessage::error("User not found"),
                CredentialError::SelfContact => {
                    ServerMessage::error("Cannot add yourself as a contact")
                }
                CredentialError::ContactNotFound => ServerMessage::error("Contact not found"),
                CredentialError::UnknownUser => ServerMessage::error("Invalid user"),
                CredentialError::Persist(_) => ServerMessage::error("Internal error"),
            },
            AppError::Pairing(PairingError::AlreadyPaired(_)) => {
                ServerMessage::error("User is already in a chat")
            }
            AppError::Pairing(PairingError::SelfPairing) => {
                ServerMessage::error("Cannot chat with yourself")
            }
            AppError::NotAuthenticated => ServerMessage::error("Not logged in"),
            AppError::AlreadyAuthenticated => ServerMessage::error("Already logged in"),
            AppError::NotInChat => ServerMessage::error("You are not in a chat"),
            AppError::AlreadyInChat => ServerMessage::error("You are already in a chat"),
            AppError::UserNotFound(_) => ServerMessage::NotFound("User not found".to_string()),
            AppError::UserOffline(_) => ServerMessage::error("User offline"),
            AppError::SelfInvite => ServerMessage::error("Cannot invite yourself"),
            AppError::NoPendingInvite(sender) => {
                ServerMessage::error(format!("No pending invite from {}", sender))
            }
            // Fatal errors are not typically converted (connection closes)
            _ => ServerMessage::error("Internal error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register() {
        assert_eq!(
            Command::parse("REGISTER:alice:pw1:Alice").unwrap(),
            Command::Register {
                username: "alice".to_string(),
                password: "pw1".to_string(),
                display_name: "Alice".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_register_display_name_keeps_colons() {
        match Command::parse("REGISTER:alice:pw1:Alice: the first").unwrap() {
            Command::Register { display_name, .. } => assert_eq!(display_name, "Alice: the first"),
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_register_empty_display_name_defaults() {
        match Command::parse("REGISTER:alice:pw1:").unwrap() {
            Command::Register { display_name, .. } => assert_eq!(display_name, "alice"),
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_short_payloads() {
        assert_eq!(
            Command::parse("REGISTER:alice:pw1"),
            Err(ProtocolError::InvalidFormat("REGISTER"))
        );
        assert_eq!(
            Command::parse("LOGIN:alice"),
            Err(ProtocolError::InvalidFormat("LOGIN"))
        );
        assert_eq!(Command::parse("FIND"), Err(ProtocolError::InvalidFormat("FIND")));
        assert_eq!(Command::parse("INVITE:"), Err(ProtocolError::InvalidFormat("INVITE")));
        assert_eq!(
            Command::parse("CHANGE_PASSWORD:a:b"),
            Err(ProtocolError::InvalidFormat("CHANGE_PASSWORD"))
        );
    }

    #[test]
    fn test_parse_login_password_keeps_colons() {
        assert_eq!(
            Command::parse("LOGIN:alice:p:w").unwrap(),
            Command::Login {
                username: "alice".to_string(),
                password: "p:w".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(
            Command::parse("RESPONSE:ACCEPT:alice").unwrap(),
            Command::Response {
                decision: Decision::Accept,
                sender: "alice".to_string(),
            }
        );
        assert_eq!(
            Command::parse("RESPONSE:REJECT:alice").unwrap(),
            Command::Response {
                decision: Decision::Reject,
                sender: "alice".to_string(),
            }
        );
        assert_eq!(
            Command::parse("RESPONSE:MAYBE:alice"),
            Err(ProtocolError::InvalidFormat("RESPONSE"))
        );
    }

    #[test]
    fn test_parse_message_captures_whole_text() {
        assert_eq!(
            Command::parse("MESSAGE:see you at 10:30: ok?").unwrap(),
            Command::Message {
                text: "see you at 10:30: ok?".to_string()
            }
        );
    }

    #[test]
    fn test_parse_nullary_forms() {
        assert_eq!(Command::parse("PING").unwrap(), Command::Ping);
        assert_eq!(Command::parse("PING:").unwrap(), Command::Ping);
        assert_eq!(Command::parse("EXIT:\r").unwrap(), Command::Exit);
        assert_eq!(Command::parse("CHAT_END:").unwrap(), Command::ChatEnd);
        assert_eq!(Command::parse("TYPING").unwrap(), Command::Typing);
        assert_eq!(
            Command::parse("PING:now"),
            Err(ProtocolError::InvalidFormat("PING"))
        );
    }

    #[test]
    fn test_parse_unknown_and_empty() {
        assert_eq!(
            Command::parse("DANCE:now"),
            Err(ProtocolError::UnknownCommand("DANCE".to_string()))
        );
        assert_eq!(Command::parse(""), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_encode_events() {
        let msg = ServerMessage::Message {
            sender_display_name: "Alice".to_string(),
            text: "hi: there".to_string(),
        };
        assert_eq!(msg.encode().unwrap(), "MESSAGE:Alice:hi: there");
        assert_eq!(ServerMessage::Pong.encode().unwrap(), "PONG:");
        assert_eq!(ServerMessage::Typing.encode().unwrap(), "TYPING:");
        assert_eq!(
            ServerMessage::Found {
                display_name: "Bob".to_string(),
                status: Status::Offline
            }
            .encode()
            .unwrap(),
            "FOUND:Bob:OFFLINE"
        );
    }

    #[test]
    fn test_encode_contacts() {
        let msg = ServerMessage::Contacts(vec![ContactEntry {
            username: "bob".to_string(),
            display_name: "Bob".to_string(),
            status: Status::Online,
        }]);
        assert_eq!(
            msg.encode().unwrap(),
            r#"CONTACTS:[{"username":"bob","display_name":"Bob","status":"ONLINE"}]"#
        );
        assert_eq!(ServerMessage::Contacts(vec![]).encode().unwrap(), "CONTACTS:[]");
    }

    #[test]
    fn test_error_conversion() {
        let msg: ServerMessage = AppError::UserNotFound("carol".to_string()).into();
        assert_eq!(msg.encode().unwrap(), "NOT_FOUND:User not found");

        let msg: ServerMessage = AppError::from(ProtocolError::UnknownCommand("X".into())).into();
        assert_eq!(msg.encode().unwrap(), "ERROR:Unknown command: X");

        let msg: ServerMessage = AppError::from(ProtocolError::LineTooLong).into();
        assert_eq!(msg.encode().unwrap(), "ERROR:Line too long");

        let msg: ServerMessage = AppError::from(CredentialError::AlreadyExists).into();
        assert_eq!(msg.encode().unwrap(), "ERROR:Username already exists");
    }
}
