//! Listener collaborator: whoever accepted the connection and owns the
//! session's lifetime.

/// Requests a session hands over to other instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forward {
    Wallops { sender: String, text: String },
    Die { sender: String },
}

pub trait Listener: Send + Sync {
    /// Reload configuration for every session.
    fn rehash(&self);

    /// Hand `request` to peer instances. Returns true if one accepted it.
    fn forward(&self, session_id: &str, request: Forward) -> bool;

    fn shutdown(&self);

    /// The session is finished; drop it.
    fn dispose(&self, session_id: &str);
}
