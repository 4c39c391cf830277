//! Backend collaborator: the pluggable provider of remote identities.
//!
//! A session owns one backend instance. Requests flow through the
//! [`Backend`] trait; anything the backend learns asynchronously comes back
//! as a [`BackendEvent`] handed to `Session::handle_event`.

pub mod memory;

use std::net::SocketAddr;

use crate::dcc::{DccId, DccOffer, DccUpdate};
use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Short unique id, also the server name its buddies appear on.
    pub id: String,
    pub protocol: String,
    pub username: String,
    pub state: AccountState,
}

pub trait Backend: Send {
    /// Load (or create) the stored state of `identity`.
    fn load_identity(&mut self, identity: &str) -> Result<(), BackendError>;
    fn stored_password(&self, identity: &str) -> Option<String>;
    fn set_password(&mut self, identity: &str, password: &str) -> Result<(), BackendError>;

    fn accounts(&self) -> Vec<Account>;
    fn account_state(&self, account: &str) -> Option<AccountState> {
        self.accounts()
            .into_iter()
            .find(|a| a.id == account)
            .map(|a| a.state)
    }
    fn connect(&mut self, account: &str) -> Result<(), BackendError>;
    fn disconnect(&mut self, account: &str) -> Result<(), BackendError>;

    fn join_conversation(&mut self, account: &str, conversation: &str) -> Result<(), BackendError>;
    fn leave_conversation(&mut self, account: &str, conversation: &str) -> Result<(), BackendError>;

    fn add_buddy(&mut self, account: &str, buddy: &str) -> Result<(), BackendError>;
    fn remove_buddy(&mut self, account: &str, buddy: &str) -> Result<(), BackendError>;
    fn alias_buddy(&mut self, account: &str, buddy: &str, alias: &str) -> Result<(), BackendError>;

    fn send_im(&mut self, account: &str, buddy: &str, text: &str) -> Result<(), BackendError>;
    fn send_chat(&mut self, account: &str, conversation: &str, text: &str) -> Result<(), BackendError>;
    fn set_topic(&mut self, account: &str, conversation: &str, topic: &str) -> Result<(), BackendError>;

    /// Take over a file the client offers to `buddy`. Returns the transfer
    /// id later used in [`BackendEvent::TransferUpdated`].
    fn accept_file(&mut self, account: &str, buddy: &str, offer: &DccOffer) -> Result<DccId, BackendError>;

    /// Propagate the user's away/status message to every account.
    fn set_status_message(&mut self, message: Option<&str>);

    /// Start fetching extra info about a buddy. Returns true when the
    /// result will arrive later as [`BackendEvent::WhoisInfo`].
    fn fetch_info(&mut self, account: &str, buddy: &str) -> bool;

    /// Release everything before the session goes away.
    fn shutdown(&mut self) -> Result<(), BackendError>;
}

/// Everything a backend reports back to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    AccountConnected {
        account: String,
    },
    AccountDisconnected {
        account: String,
        reason: String,
    },
    BuddyOnline {
        account: String,
        buddy: String,
        alias: Option<String>,
        realname: String,
    },
    BuddyOffline {
        account: String,
        buddy: String,
    },
    BuddyAway {
        account: String,
        buddy: String,
        message: Option<String>,
    },
    /// Message from a buddy, to the user or to a conversation.
    Message {
        account: String,
        buddy: String,
        conversation: Option<String>,
        text: String,
        notice: bool,
    },
    ConversationJoined {
        account: String,
        conversation: String,
        members: Vec<String>,
        topic: Option<String>,
    },
    ConversationLeft {
        account: String,
        conversation: String,
    },
    WhoisInfo {
        account: String,
        buddy: String,
        lines: Vec<String>,
    },
    FileOffer {
        id: DccId,
        account: String,
        buddy: String,
        filename: String,
        size: u64,
        addr: SocketAddr,
    },
    TransferUpdated {
        id: DccId,
        update: DccUpdate,
    },
    /// Informational text for the user (account errors and the like).
    Notice {
        text: String,
    },
}
