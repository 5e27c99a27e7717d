//! Line-protocol chat relay library
//!
//! A TCP relay for one-to-one text chat: clients register and log in,
//! look each other up, exchange invites, and once paired relay messages
//! and typing notices through the server.
//!
//! # Features
//! - Accounts with PBKDF2-derived password hashes under a global salt
//! - Contact lists annotated with live presence
//! - Invite / accept / reject negotiation
//! - Paired message and typing relay
//! - Liveness reaping of silent connections
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning sessions, credentials,
//!   presence and pairings
//! - Each connection has a `handler` task that frames lines, derives
//!   password hashes off the actor, and forwards commands
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use chat_relay::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::from_env();
//!     let listener = TcpListener::bind(&config.bind_addr).await.unwrap();
//!     serve(listener, config).await.unwrap();
//! }
//! ```

pub mod acceptor;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod pairing;
pub mod password;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use acceptor::serve;
pub use config::ServerConfig;
pub use credentials::{CredentialStore, User};
pub use error::{AppError, CredentialError, PairingError, ProtocolError, SendError, StoreError};
pub use handler::handle_connection;
pub use pairing::PairingTable;
pub use password::{PasswordHash, PasswordHasher, Salt};
pub use presence::PresenceRegistry;
pub use protocol::{Command, ContactEntry, Decision, ServerMessage};
pub use server::{ChatServer, ServerCommand};
pub use session::{Invite, Session, SessionState};
pub use types::{ClientId, Status};
