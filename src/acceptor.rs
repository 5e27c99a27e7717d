//! Connection acceptor
//!
//! Loads the persistent state, starts the ChatServer actor, and spawns one
//! handler task per accepted connection.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::credentials::CredentialStore;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::password::{PasswordHasher, Salt};
use crate::server::ChatServer;

/// Serve the relay on `listener` until the process exits.
///
/// Fails only during startup, when the salt cannot be loaded or created.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> Result<(), AppError> {
    let salt = Salt::load_or_create(&config.salt_file, &config.users_file)?;
    let hasher = Arc::new(PasswordHasher::new(salt, config.pbkdf2_iterations));
    let credentials = CredentialStore::open(&config.users_file);

    // Create ChatServer actor channel and start
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
    tokio::spawn(ChatServer::new(cmd_rx, credentials).run());
    info!("ChatServer actor started");

    let config = Arc::new(config);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let cmd_tx = cmd_tx.clone();
                let hasher = Arc::clone(&hasher);
                let config = Arc::clone(&config);

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx, hasher, config).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
