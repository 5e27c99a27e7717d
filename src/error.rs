//! Error types for the relay
//!
//! Defines application-level errors, the per-component error enums and
//! message send errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send error message to client).
#[derive(Debug, Error)]
pub enum AppError {
    /// Line framing error (fatal)
    #[error("Codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task failed (fatal)
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Persistent state could not be loaded at startup (fatal)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Malformed or unknown command line
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Credential store rejected the operation
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Pairing table rejected the operation
    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Command requires a logged-in session
    #[error("Not logged in")]
    NotAuthenticated,

    /// REGISTER/LOGIN on an already logged-in session
    #[error("Already logged in")]
    AlreadyAuthenticated,

    /// Chat command outside of an active chat
    #[error("Not in chat")]
    NotInChat,

    /// Invite while already chatting
    #[error("Already in chat")]
    AlreadyInChat,

    /// FIND target is not registered
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Target user has no live session
    #[error("User offline: {0}")]
    UserOffline(String),

    /// Invite addressed to the sender
    #[error("Cannot invite yourself")]
    SelfInvite,

    /// RESPONSE names a user with no pending invite
    #[error("No pending invite from {0}")]
    NoPendingInvite(String),
}

/// Persistence errors for the credential table and salt file
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The salt file exists but holds no bytes; stored hashes cannot be verified
    #[error("salt file is empty")]
    EmptySalt,
}

/// Credential store outcomes other than success
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("username already exists")]
    AlreadyExists,

    /// Unknown user or wrong password; deliberately indistinguishable
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("new passwords do not match")]
    Mismatch,

    #[error("invalid old password")]
    InvalidOldPassword,

    #[error("contact target not found")]
    TargetNotFound,

    #[error("cannot add yourself as a contact")]
    SelfContact,

    #[error("contact not found")]
    ContactNotFound,

    /// Acting user has no credential record
    #[error("unknown user")]
    UnknownUser,

    #[error("failed to persist users: {0}")]
    Persist(#[from] StoreError),
}

/// Pairing table errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("{0} is already paired")]
    AlreadyPaired(String),

    #[error("cannot pair a user with itself")]
    SelfPairing,
}

/// Protocol-format errors, reported to the offending connection only
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Missing fields, empty fields, or unexpected payload
    #[error("invalid format for {0}")]
    InvalidFormat(&'static str),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("empty command")]
    Empty,

    /// Line exceeded the framing limit
    #[error("line too long")]
    LineTooLong,
}

/// Message send errors
///
/// Occurs when delivering to a session outbox that cannot take the message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The outbox is full; the peer is not draining it
    #[error("Channel full")]
    ChannelFull,
}
