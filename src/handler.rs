//! TCP connection handler
//!
//! Handles individual client connections: line framing, command parsing,
//! liveness reaping, and bidirectional communication with the ChatServer.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, ProtocolError};
use crate::password::{PasswordHash, PasswordHasher};
use crate::protocol::{Command, ServerMessage};
use crate::server::ServerCommand;
use crate::types::ClientId;

type LineWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// Upper bound on flushing queued replies once a session has ended
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a new TCP connection
///
/// Registers the connection with the ChatServer, pumps lines in both
/// directions until the peer leaves, goes silent, or is evicted, and
/// always reports the disconnect so the relay can tear the session down.
///
/// Every reply, including format errors, is produced by the relay and
/// comes back through the outbox, so replies keep command order.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
    hasher: Arc<PasswordHasher>,
    config: Arc<ServerConfig>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(config.max_line_length),
    );
    let mut writer = FramedWrite::new(write_half, LinesCodec::new());

    let client_id = ClientId::new();
    info!("Client {} connected from {}", client_id, peer_addr);

    // Server -> client queue, drained by the loop below
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbox_capacity);

    if cmd_tx
        .send(ServerCommand::Connect {
            client_id,
            sender: msg_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register client {} - server closed", client_id);
        return Err(AppError::ChannelSend);
    }

    let result = run_session(
        client_id,
        &mut reader,
        &mut writer,
        &mut msg_rx,
        &cmd_tx,
        &hasher,
        &config,
    )
    .await;

    // Teardown runs whatever ended the session. The relay drops the
    // session's sender once it has handled Disconnect, which ends the flush.
    let _ = cmd_tx.send(ServerCommand::Disconnect { client_id }).await;
    match tokio::time::timeout(FLUSH_TIMEOUT, flush_outbox(&mut writer, &mut msg_rx)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Flush for {} failed: {}", client_id, e),
        Err(_) => debug!("Flush for {} timed out", client_id),
    }
    let _ = SinkExt::<String>::close(&mut writer).await;

    info!("Client {} disconnected", client_id);

    result
}

async fn run_session(
    client_id: ClientId,
    reader: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, LinesCodec>,
    writer: &mut LineWriter,
    msg_rx: &mut mpsc::Receiver<ServerMessage>,
    cmd_tx: &mpsc::Sender<ServerCommand>,
    hasher: &Arc<PasswordHasher>,
    config: &ServerConfig,
) -> Result<(), AppError> {
    let mut liveness = tokio::time::interval(config.liveness_interval);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = reader.next() => {
                let line = match frame {
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        // The codec cannot resync after this, so the session ends
                        warn!("Client {} exceeded the line limit", client_id);
                        forward(cmd_tx, ServerCommand::Malformed {
                            client_id,
                            error: ProtocolError::LineTooLong,
                        })
                        .await?;
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        debug!("Client {} closed the connection", client_id);
                        return Ok(());
                    }
                };
                last_seen = Instant::now();

                let server_cmd = match Command::parse(&line) {
                    Ok(cmd) => {
                        debug!("Client {} sent {}", client_id, cmd.name());
                        match to_server_command(client_id, cmd, hasher).await? {
                            Some(server_cmd) => server_cmd,
                            None => return Ok(()),
                        }
                    }
                    Err(ProtocolError::Empty) => continue,
                    Err(error) => {
                        debug!("Bad line from {}: {}", client_id, error);
                        ServerCommand::Malformed { client_id, error }
                    }
                };
                forward(cmd_tx, server_cmd).await?;
            }
            msg = msg_rx.recv() => {
                match msg {
                    Some(msg) => send_line(writer, &msg).await?,
                    None => {
                        debug!("Relay dropped session {}", client_id);
                        return Ok(());
                    }
                }
            }
            _ = liveness.tick() => {
                if last_seen.elapsed() > config.idle_timeout {
                    warn!("Client {} idle for {:?}, closing", client_id, config.idle_timeout);
                    return Ok(());
                }
            }
        }
    }
}

/// Hand a command to the relay actor
async fn forward(cmd_tx: &mpsc::Sender<ServerCommand>, cmd: ServerCommand) -> Result<(), AppError> {
    let client_id = cmd.client_id();
    cmd_tx.send(cmd).await.map_err(|_| {
        debug!("Server closed, ending session for {}", client_id);
        AppError::ChannelSend
    })
}

/// Write out everything still queued until the relay drops the sender
async fn flush_outbox(
    writer: &mut LineWriter,
    msg_rx: &mut mpsc::Receiver<ServerMessage>,
) -> Result<(), AppError> {
    while let Some(msg) = msg_rx.recv().await {
        send_line(writer, &msg).await?;
    }
    Ok(())
}

/// Write one message as a line
async fn send_line(writer: &mut LineWriter, msg: &ServerMessage) -> Result<(), AppError> {
    match msg.encode() {
        Ok(line) => writer.send(line).await?,
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            // Continue - don't break on serialization errors
        }
    }
    Ok(())
}

/// Derive password hashes on the blocking pool
async fn derive<const N: usize>(
    hasher: &Arc<PasswordHasher>,
    passwords: [String; N],
) -> Result<[PasswordHash; N], AppError> {
    let hasher = Arc::clone(hasher);
    let hashes =
        tokio::task::spawn_blocking(move || passwords.map(|pw| hasher.hash(&pw))).await?;
    Ok(hashes)
}

/// Convert a parsed Command to a ServerCommand
///
/// `None` means the client asked to leave (`EXIT`).
async fn to_server_command(
    client_id: ClientId,
    cmd: Command,
    hasher: &Arc<PasswordHasher>,
) -> Result<Option<ServerCommand>, AppError> {
    let server_cmd = match cmd {
        Command::Register {
            username,
            password,
            display_name,
        } => {
            let [password] = derive(hasher, [password]).await?;
            ServerCommand::Register {
                client_id,
                username,
                password,
                display_name,
            }
        }
        Command::Login { username, password } => {
            let [password] = derive(hasher, [password]).await?;
            ServerCommand::Login {
                client_id,
                username,
                password,
            }
        }
        Command::ChangePassword { old, new, confirm } => {
            let [old, new, confirm] = derive(hasher, [old, new, confirm]).await?;
            ServerCommand::ChangePassword {
                client_id,
                old,
                new,
                confirm,
            }
        }
        Command::Find { username } => ServerCommand::Find { client_id, username },
        Command::Invite { username } => ServerCommand::Invite { client_id, username },
        Command::Response { decision, sender } => ServerCommand::Respond {
            client_id,
            decision,
            sender,
        },
        Command::Message { text } => ServerCommand::Message { client_id, text },
        Command::Typing => ServerCommand::Typing { client_id },
        Command::ChatEnd => ServerCommand::EndChat { client_id },
        Command::AddContact { username } => ServerCommand::AddContact { client_id, username },
        Command::RemoveContact { username } => ServerCommand::RemoveContact { client_id, username },
        Command::GetContacts => ServerCommand::GetContacts { client_id },
        Command::Ping => ServerCommand::Ping { client_id },
        Command::Exit => return Ok(None),
    };
    Ok(Some(server_cmd))
}
