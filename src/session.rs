//! Session struct definition
//!
//! Runtime state of one live connection, owned by the relay actor.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SendError;
use crate::protocol::ServerMessage;
use crate::types::ClientId;

/// Inbound chat proposal held by the recipient's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    pub from_username: String,
    pub from_display_name: String,
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Idle,
    InvitedIn,
    InChat,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, SessionState::Unauthenticated)
    }
}

/// Connected session information
///
/// The chat partner lives in the pairing table, keyed by username, so
/// `state` needs to be told whether this session is paired.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Logged-in username (None before login)
    pub username: Option<String>,
    /// Latest unanswered invite; a newer one replaces it
    pub pending_invite: Option<Invite>,
    /// Server → Client message channel
    sender: mpsc::Sender<ServerMessage>,
}

impl Session {
    /// Create a new session with the given ID and sender channel
    pub fn new(id: ClientId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            username: None,
            pending_invite: None,
            sender,
        }
    }

    /// Queue a message for this connection without waiting.
    ///
    /// Fails if the connection is gone or not draining its outbox.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::ChannelFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Mark this session as logged in
    pub fn authenticate(&mut self, username: String) {
        self.username = Some(username);
    }

    /// Store an invite, replacing any earlier one
    pub fn receive_invite(&mut self, invite: Invite) {
        self.pending_invite = Some(invite);
    }

    /// Take the pending invite if it came from `sender`
    pub fn take_invite_from(&mut self, sender: &str) -> Option<Invite> {
        match &self.pending_invite {
            Some(invite) if invite.from_username == sender => self.pending_invite.take(),
            _ => None,
        }
    }

    pub fn state(&self, paired: bool) -> SessionState {
        if !self.is_authenticated() {
            SessionState::Unauthenticated
        } else if paired {
            SessionState::InChat
        } else if self.pending_invite.is_some() {
            SessionState::InvitedIn
        } else {
            SessionState::Idle
        }
    }
}
