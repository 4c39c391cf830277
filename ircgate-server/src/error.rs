//! Error types shared across the gateway.
//!
//! Protocol and permission failures are not Rust errors: the session
//! answers them with numeric replies and keeps the connection open.

/// Refusal to create a session at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("'{0}' is not a valid server hostname")]
    InvalidHostname(String),
    #[error("'{0}' is not a valid status channel name")]
    InvalidStatusChannel(String),
    #[error("'{0}' is not a valid service nickname")]
    InvalidRootNick(String),
}

/// Registry collisions and lookups of names that are not there.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("nickname {0} is already in use")]
    NickInUse(String),
    #[error("no such nick {0}")]
    NoSuchNick(String),
    #[error("channel {0} already exists")]
    ChannelExists(String),
    #[error("no such channel {0}")]
    NoSuchChannel(String),
    #[error("{nick} is already on {channel}")]
    AlreadyOnChannel { nick: String, channel: String },
    #[error("{nick} is not on {channel}")]
    NotOnChannel { nick: String, channel: String },
}

/// Failures reported by a backend operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("unknown account {0}")]
    UnknownAccount(String),
    #[error("account {0} is not connected")]
    NotConnected(String),
    #[error("unknown buddy {buddy} on {account}")]
    UnknownBuddy { account: String, buddy: String },
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("credential store error: {0}")]
    Store(String),
}

/// Reasons a session is torn down. The display text is the reason sent in
/// the final `ERROR :Closing Link` line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Password is too short (at least {0} characters) or contains spaces")]
    WeakPassword(usize),
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error("Unable to initialize backend: {0}")]
    Backend(#[from] BackendError),
    #[error("Ping timeout")]
    PingTimeout,
}
