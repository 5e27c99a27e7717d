//! Relay configuration loaded from environment variables.
//!
//! Every setting has a default so the relay starts with zero configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address to listen on.
    /// Env: `RELAY_ADDR`
    /// Default: `0.0.0.0:5555`
    pub bind_addr: String,

    /// Credential table (JSON).
    /// Env: `RELAY_USERS_FILE`
    /// Default: `users.json`
    pub users_file: PathBuf,

    /// Global password salt, generated on first start.
    /// Env: `RELAY_SALT_FILE`
    /// Default: `server.salt`
    pub salt_file: PathBuf,

    /// PBKDF2 iteration count. Changing it invalidates stored hashes.
    /// Env: `RELAY_PBKDF2_ITERATIONS`
    /// Default: `100000`
    pub pbkdf2_iterations: u32,

    /// Longest accepted protocol line in bytes.
    /// Env: `RELAY_MAX_LINE_LENGTH`
    pub max_line_length: usize,

    /// A connection silent for this long is reaped.
    /// Env: `RELAY_IDLE_TIMEOUT_SECS`
    pub idle_timeout: Duration,

    /// How often each session checks its own liveness.
    /// Env: `RELAY_LIVENESS_INTERVAL_SECS`
    pub liveness_interval: Duration,

    /// Per-session outbound queue size.
    /// Env: `RELAY_OUTBOX_CAPACITY`
    pub outbox_capacity: usize,

    /// Command channel size between sessions and the relay actor.
    /// Env: `RELAY_COMMAND_BUFFER`
    pub command_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5555".to_string(),
            users_file: PathBuf::from("users.json"),
            salt_file: PathBuf::from("server.salt"),
            pbkdf2_iterations: 100_000,
            max_line_length: 64 * 1024,
            idle_timeout: Duration::from_secs(60),
            liveness_interval: Duration::from_secs(10),
            outbox_capacity: 128,
            command_buffer: 256,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RELAY_ADDR") {
            config.bind_addr = addr;
        }

        if let Ok(path) = std::env::var("RELAY_USERS_FILE") {
            config.users_file = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("RELAY_SALT_FILE") {
            config.salt_file = PathBuf::from(path);
        }

        if let Some(n) = parse_var::<u32>("RELAY_PBKDF2_ITERATIONS") {
            if n > 0 {
                config.pbkdf2_iterations = n;
            } else {
                tracing::warn!("RELAY_PBKDF2_ITERATIONS must be positive, using default");
            }
        }

        if let Some(n) = parse_var::<usize>("RELAY_MAX_LINE_LENGTH") {
            config.max_line_length = n;
        }

        if let Some(secs) = parse_var::<u64>("RELAY_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>("RELAY_LIVENESS_INTERVAL_SECS") {
            config.liveness_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(n) = parse_var::<usize>("RELAY_OUTBOX_CAPACITY") {
            config.outbox_capacity = n.max(1);
        }

        if let Some(n) = parse_var::<usize>("RELAY_COMMAND_BUFFER") {
            config.command_buffer = n.max(1);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

/// Read and parse one variable; unparsable values are logged and ignored.
fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match parse_value(&raw) {
        Some(v) => Some(v),
        None => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse::<T>().ok()
}
