use thiserror::Error;

/// Fatal setup/config errors — never a protocol-level outcome (those are data:
/// see `protocol::outbound::OutboundFrame::Error`).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Failure from a `WakeExecutor` attempt (spec §6 collaborator contract).
#[derive(Error, Debug)]
pub enum WakeError {
    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),
    #[error("webhook responded with non-success status {0}")]
    WebhookStatus(u16),
    #[error("spawn command exited with non-zero status: {0}")]
    SpawnNonZero(i32),
    #[error("spawn command failed to start: {0}")]
    SpawnIo(#[from] std::io::Error),
    #[error("wake attempt exceeded its deadline")]
    Timeout,
}

/// Errors from maintaining a federation peer link (spec §4.11).
#[derive(Error, Debug)]
pub enum FederationError {
    #[error("failed to connect to parent router: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("peer sent a frame that failed to parse: {0}")]
    BadFrame(#[from] serde_json::Error),
}
