//! ChatServer Actor implementation
//!
//! The central actor that owns all shared state: sessions, the credential
//! store, the presence registry and the pairing table. Connection handlers
//! reach it only through its command channel, so every read-modify-write
//! runs to completion before the next command is looked at.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::credentials::{ContactAdded, CredentialStore};
use crate::error::{AppError, CredentialError, ProtocolError, SendError};
use crate::pairing::PairingTable;
use crate::password::PasswordHash;
use crate::presence::PresenceRegistry;
use crate::protocol::{ContactEntry, Decision, ServerMessage};
use crate::session::{Invite, Session, SessionState};
use crate::types::ClientId;

/// Reason sent to the partner when a chat ends by disconnection
pub const REASON_DISCONNECTED: &str = "User disconnected";

/// Reason sent to the partner when a chat is ended explicitly
pub const REASON_PARTNER_LEFT: &str = "Partner left the chat";

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        client_id: ClientId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Connection closed (any reason)
    Disconnect {
        client_id: ClientId,
    },
    Register {
        client_id: ClientId,
        username: String,
        password: PasswordHash,
        display_name: String,
    },
    Login {
        client_id: ClientId,
        username: String,
        password: PasswordHash,
    },
    Find {
        client_id: ClientId,
        username: String,
    },
    Invite {
        client_id: ClientId,
        username: String,
    },
    Respond {
        client_id: ClientId,
        decision: Decision,
        sender: String,
    },
    Message {
        client_id: ClientId,
        text: String,
    },
    Typing {
        client_id: ClientId,
    },
    EndChat {
        client_id: ClientId,
    },
    AddContact {
        client_id: ClientId,
        username: String,
    },
    RemoveContact {
        client_id: ClientId,
        username: String,
    },
    GetContacts {
        client_id: ClientId,
    },
    ChangePassword {
        client_id: ClientId,
        old: PasswordHash,
        new: PasswordHash,
        confirm: PasswordHash,
    },
    Ping {
        client_id: ClientId,
    },
    /// Line the handler could not turn into a command
    Malformed {
        client_id: ClientId,
        error: ProtocolError,
    },
}

impl ServerCommand {
    /// Connection the command came from
    pub fn client_id(&self) -> ClientId {
        match self {
            ServerCommand::Connect { client_id, .. }
            | ServerCommand::Disconnect { client_id }
            | ServerCommand::Register { client_id, .. }
            | ServerCommand::Login { client_id, .. }
            | ServerCommand::Find { client_id, .. }
            | ServerCommand::Invite { client_id, .. }
            | ServerCommand::Respond { client_id, .. }
            | ServerCommand::Message { client_id, .. }
            | ServerCommand::Typing { client_id }
            | ServerCommand::EndChat { client_id }
            | ServerCommand::AddContact { client_id, .. }
            | ServerCommand::RemoveContact { client_id, .. }
            | ServerCommand::GetContacts { client_id }
            | ServerCommand::ChangePassword { client_id, .. }
            | ServerCommand::Ping { client_id }
            | ServerCommand::Malformed { client_id, .. } => *client_id,
        }
    }
}

/// The main ChatServer actor
pub struct ChatServer {
    /// All live connections: ClientId -> Session
    sessions: HashMap<ClientId, Session>,
    /// Durable user records
    credentials: CredentialStore,
    /// Username -> serving connection
    presence: PresenceRegistry,
    /// Username <-> partner username
    pairings: PairingTable,
    /// Connections whose outbox overflowed during the current command
    lagging: Vec<ClientId>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver and store
    pub fn new(receiver: mpsc::Receiver<ServerCommand>, credentials: CredentialStore) -> Self {
        Self {
            sessions: HashMap::new(),
            credentials,
            presence: PresenceRegistry::new(),
            pairings: PairingTable::new(),
            lagging: Vec::new(),
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        let client_id = cmd.client_id();
        let result = match cmd {
            ServerCommand::Connect { client_id, sender } => {
                self.handle_connect(client_id, sender);
                Ok(())
            }
            ServerCommand::Disconnect { client_id } => {
                self.handle_disconnect(client_id);
                Ok(())
            }
            ServerCommand::Register {
                client_id,
                username,
                password,
                display_name,
            } => self.handle_register(client_id, username, password, display_name),
            ServerCommand::Login {
                client_id,
                username,
                password,
            } => self.handle_login(client_id, username, password),
            ServerCommand::Find { client_id, username } => self.handle_find(client_id, &username),
            ServerCommand::Invite { client_id, username } => {
                self.handle_invite(client_id, username)
            }
            ServerCommand::Respond {
                client_id,
                decision,
                sender,
            } => self.handle_respond(client_id, decision, sender),
            ServerCommand::Message { client_id, text } => self.handle_message(client_id, text),
            ServerCommand::Typing { client_id } => self.handle_typing(client_id),
            ServerCommand::EndChat { client_id } => self.handle_end_chat(client_id),
            ServerCommand::AddContact { client_id, username } => {
                self.handle_add_contact(client_id, &username)
            }
            ServerCommand::RemoveContact { client_id, username } => {
                self.handle_remove_contact(client_id, &username)
            }
            ServerCommand::GetContacts { client_id } => self.handle_get_contacts(client_id),
            ServerCommand::ChangePassword {
                client_id,
                old,
                new,
                confirm,
            } => self.handle_change_password(client_id, old, new, confirm),
            ServerCommand::Ping { client_id } => {
                self.send_to(client_id, ServerMessage::Pong);
                Ok(())
            }
            ServerCommand::Malformed { error, .. } => Err(error.into()),
        };

        if let Err(err) = result {
            match &err {
                AppError::Credential(CredentialError::Persist(e)) => {
                    error!("Failed to persist users for {}: {}", client_id, e);
                }
                _ => debug!("Command from {} rejected: {}", client_id, err),
            }
            self.send_to(client_id, err.into());
        }

        self.drop_lagging();
    }

    /// Tear down every connection that stopped draining its outbox
    ///
    /// A lost CHAT_END or CHAT_START would leave the two sides disagreeing
    /// about the pairing, so a full outbox counts as a dead peer.
    fn drop_lagging(&mut self) {
        while let Some(client_id) = self.lagging.pop() {
            if self.sessions.contains_key(&client_id) {
                warn!("Client {} is not reading its messages, disconnecting", client_id);
                self.handle_disconnect(client_id);
            }
        }
    }

    /// Handle new connection
    fn handle_connect(&mut self, client_id: ClientId, sender: mpsc::Sender<ServerMessage>) {
        debug!("Client {} connected", client_id);
        self.sessions.insert(client_id, Session::new(client_id, sender));
        debug!(
            "Total sessions: {}, online: {}, pairings: {}",
            self.sessions.len(),
            self.presence.len(),
            self.pairings.pair_count()
        );
    }

    /// Handle connection teardown: presence, pairing, partner notification
    fn handle_disconnect(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.remove(&client_id) else {
            return;
        };

        if let Some(username) = session.username {
            if self.presence.release(&username, client_id) {
                self.end_chat(&username, REASON_DISCONNECTED);
            }
            info!("User '{}' disconnected ({})", username, client_id);
        } else {
            debug!("Client {} disconnected", client_id);
        }

        debug!(
            "Total sessions: {}, online: {}, pairings: {}",
            self.sessions.len(),
            self.presence.len(),
            self.pairings.pair_count()
        );
    }

    fn handle_register(
        &mut self,
        client_id: ClientId,
        username: String,
        password: PasswordHash,
        display_name: String,
    ) -> Result<(), AppError> {
        if self.state_of(client_id).is_authenticated() {
            return Err(AppError::AlreadyAuthenticated);
        }

        self.credentials.register(&username, password, &display_name)?;
        info!("Registered user '{}'", username);

        self.send_to(client_id, ServerMessage::success("Registered successfully"));
        Ok(())
    }

    fn handle_login(
        &mut self,
        client_id: ClientId,
        username: String,
        password: PasswordHash,
    ) -> Result<(), AppError> {
        if self.state_of(client_id).is_authenticated() {
            return Err(AppError::AlreadyAuthenticated);
        }

        let display_name = self
            .credentials
            .authenticate(&username, &password)?
            .display_name
            .clone();

        if let Some(previous) = self.presence.lookup(&username) {
            if previous != client_id {
                self.evict(previous, &username);
            }
        }

        let Some(session) = self.sessions.get_mut(&client_id) else {
            return Ok(());
        };
        session.authenticate(username.clone());
        self.presence.mark_online(&username, client_id);
        info!("User '{}' logged in ({})", username, client_id);

        self.send_to(
            client_id,
            ServerMessage::success(format!("Logged in:{}", display_name)),
        );
        let contacts = self.contacts_message(&username);
        self.send_to(client_id, contacts);
        Ok(())
    }

    /// Close an older session of a user who just logged in elsewhere
    fn evict(&mut self, previous: ClientId, username: &str) {
        info!("User '{}' logged in again, evicting {}", username, previous);
        self.end_chat(username, REASON_DISCONNECTED);
        self.presence.release(username, previous);
        self.send_to(
            previous,
            ServerMessage::error("Logged in from another connection"),
        );
        // Dropping the session drops its sender, which closes the connection
        self.sessions.remove(&previous);
    }

    fn handle_find(&mut self, client_id: ClientId, target: &str) -> Result<(), AppError> {
        let username = self.require_user(client_id)?;

        let Some(display_name) = self.credentials.display_name(target) else {
            debug!("'{}' searched for '{}': not found", username, target);
            return Err(AppError::UserNotFound(target.to_string()));
        };
        let reply = ServerMessage::Found {
            display_name: display_name.to_string(),
            status: self.presence.status(target),
        };
        debug!("'{}' searched for '{}': found", username, target);

        self.send_to(client_id, reply);
        Ok(())
    }

    fn handle_invite(&mut self, client_id: ClientId, target: String) -> Result<(), AppError> {
        let username = self.require_user(client_id)?;
        if self.state_of(client_id) == SessionState::InChat {
            return Err(AppError::AlreadyInChat);
        }
        if target == username {
            return Err(AppError::SelfInvite);
        }

        let target_id = self
            .presence
            .lookup(&target)
            .ok_or_else(|| AppError::UserOffline(target.clone()))?;

        let invite = Invite {
            from_username: username.clone(),
            from_display_name: self.display_name_of(&username),
        };
        let event = ServerMessage::Invite {
            from_username: invite.from_username.clone(),
            from_display_name: invite.from_display_name.clone(),
        };
        if let Some(target_session) = self.sessions.get_mut(&target_id) {
            target_session.receive_invite(invite);
        }
        self.send_to(target_id, event);
        info!("Invite from '{}' to '{}'", username, target);

        self.send_to(client_id, ServerMessage::InviteSent("Request sent".to_string()));
        Ok(())
    }

    fn handle_respond(
        &mut self,
        client_id: ClientId,
        decision: Decision,
        sender: String,
    ) -> Result<(), AppError> {
        let username = self.require_user(client_id)?;
        if decision == Decision::Accept && self.pairings.is_paired(&username) {
            return Err(AppError::AlreadyInChat);
        }

        let invite = self
            .sessions
            .get_mut(&client_id)
            .and_then(|s| s.take_invite_from(&sender))
            .ok_or_else(|| AppError::NoPendingInvite(sender.clone()))?;
        info!("'{}' answered '{}': {:?}", username, sender, decision);

        match decision {
            Decision::Accept => {
                let Some(sender_id) = self.presence.lookup(&sender) else {
                    return Err(AppError::UserOffline(sender));
                };
                self.pairings.pair(&sender, &username)?;

                for id in [sender_id, client_id] {
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.pending_invite = None;
                    }
                }

                let responder_name = self.display_name_of(&username);
                self.send_to(
                    sender_id,
                    ServerMessage::ChatStart {
                        partner_display_name: responder_name,
                    },
                );
                self.send_to(
                    client_id,
                    ServerMessage::ChatStart {
                        partner_display_name: invite.from_display_name,
                    },
                );
                info!("Chat started between '{}' and '{}'", sender, username);
            }
            Decision::Reject => {
                self.send_to_user(
                    &sender,
                    ServerMessage::Rejected("Chat request rejected".to_string()),
                );
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, client_id: ClientId, text: String) -> Result<(), AppError> {
        let (username, partner) = self.require_chat(client_id)?;

        let msg = ServerMessage::Message {
            sender_display_name: self.display_name_of(&username),
            text,
        };
        if self.send_to_user(&partner, msg) {
            debug!("Message from '{}' to '{}'", username, partner);
        } else {
            debug!("Partner '{}' of '{}' is gone, message dropped", partner, username);
        }
        Ok(())
    }

    fn handle_typing(&mut self, client_id: ClientId) -> Result<(), AppError> {
        let (_, partner) = self.require_chat(client_id)?;
        self.send_to_user(&partner, ServerMessage::Typing);
        Ok(())
    }

    fn handle_end_chat(&mut self, client_id: ClientId) -> Result<(), AppError> {
        let (username, _) = self.require_chat(client_id)?;
        self.end_chat(&username, REASON_PARTNER_LEFT);
        self.send_to(client_id, ServerMessage::success("Chat ended"));
        Ok(())
    }

    fn handle_add_contact(&mut self, client_id: ClientId, target: &str) -> Result<(), AppError> {
        let username = self.require_user(client_id)?;

        match self.credentials.add_contact(&username, target)? {
            ContactAdded::Added => {
                info!("'{}' added contact '{}'", username, target);
                let contacts = self.contacts_message(&username);
                self.send_to(client_id, contacts);
                self.send_to(client_id, ServerMessage::success("Contact added"));
            }
            ContactAdded::AlreadyPresent => {
                self.send_to(client_id, ServerMessage::success("Contact already exists"));
            }
        }
        Ok(())
    }

    fn handle_remove_contact(&mut self, client_id: ClientId, target: &str) -> Result<(), AppError> {
        let username = self.require_user(client_id)?;

        self.credentials.remove_contact(&username, target)?;
        info!("'{}' removed contact '{}'", username, target);

        let contacts = self.contacts_message(&username);
        self.send_to(client_id, contacts);
        self.send_to(client_id, ServerMessage::success("Contact removed"));
        Ok(())
    }

    fn handle_get_contacts(&mut self, client_id: ClientId) -> Result<(), AppError> {
        let username = self.require_user(client_id)?;
        let contacts = self.contacts_message(&username);
        self.send_to(client_id, contacts);
        Ok(())
    }

    fn handle_change_password(
        &mut self,
        client_id: ClientId,
        old: PasswordHash,
        new: PasswordHash,
        confirm: PasswordHash,
    ) -> Result<(), AppError> {
        let username = self.require_user(client_id)?;

        self.credentials
            .change_password(&username, &old, new, &confirm)?;
        info!("'{}' changed password", username);

        self.send_to(client_id, ServerMessage::success("Password changed"));
        Ok(())
    }

    /// Helper: dissolve `username`'s pairing and tell the partner why
    fn end_chat(&mut self, username: &str, reason: &str) -> bool {
        let Some(partner) = self.pairings.unpair(username) else {
            return false;
        };
        info!("Chat between '{}' and '{}' ended: {}", username, partner, reason);
        self.send_to_user(
            &partner,
            ServerMessage::ChatEnd {
                reason: reason.to_string(),
            },
        );
        true
    }

    /// Helper: lifecycle state of a connection
    fn state_of(&self, client_id: ClientId) -> SessionState {
        match self.sessions.get(&client_id) {
            Some(session) => {
                let paired = session
                    .username()
                    .is_some_and(|u| self.pairings.is_paired(u));
                session.state(paired)
            }
            None => SessionState::Unauthenticated,
        }
    }

    /// Helper: username of a logged-in connection
    fn require_user(&self, client_id: ClientId) -> Result<String, AppError> {
        self.sessions
            .get(&client_id)
            .and_then(Session::username)
            .map(str::to_string)
            .ok_or(AppError::NotAuthenticated)
    }

    /// Helper: username and partner of a connection that is chatting
    fn require_chat(&self, client_id: ClientId) -> Result<(String, String), AppError> {
        let username = self.require_user(client_id)?;
        let partner = self
            .pairings
            .partner_of(&username)
            .ok_or(AppError::NotInChat)?
            .to_string();
        Ok((username, partner))
    }

    /// Helper: display name, falling back to the username if the record is gone
    fn display_name_of(&self, username: &str) -> String {
        match self.credentials.display_name(username) {
            Some(name) => name.to_string(),
            None => {
                warn!("No credential record for '{}', using username", username);
                username.to_string()
            }
        }
    }

    /// Helper: the caller's contact list annotated with live status
    fn contacts_message(&self, username: &str) -> ServerMessage {
        let resolved = self.credentials.resolved_contacts(username);
        let statuses = self
            .presence
            .snapshot_status(resolved.iter().map(|(contact, _)| *contact));

        let entries = resolved
            .into_iter()
            .map(|(contact, display_name)| ContactEntry {
                username: contact.to_string(),
                display_name: display_name.to_string(),
                status: statuses[contact],
            })
            .collect();
        ServerMessage::Contacts(entries)
    }

    /// Helper: queue a message for one connection
    ///
    /// A connection whose outbox is full is queued for teardown.
    fn send_to(&mut self, client_id: ClientId, msg: ServerMessage) -> bool {
        let Some(session) = self.sessions.get(&client_id) else {
            return false;
        };
        match session.send(msg) {
            Ok(()) => true,
            Err(SendError::ChannelFull) => {
                warn!("Outbox of {} is full, dropping the connection", client_id);
                if !self.lagging.contains(&client_id) {
                    self.lagging.push(client_id);
                }
                false
            }
            Err(e) => {
                warn!("Dropping message for {}: {}", client_id, e);
                false
            }
        }
    }

    /// Helper: queue a message for whichever connection serves `username`
    fn send_to_user(&mut self, username: &str, msg: ServerMessage) -> bool {
        match self.presence.lookup(username) {
            Some(client_id) => self.send_to(client_id, msg),
            None => false,
        }
    }
}
