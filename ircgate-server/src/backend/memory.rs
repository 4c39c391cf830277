//! In-process backend.
//!
//! Accounts, buddy lists and joined conversations live in memory; only
//! credentials are persisted, as a JSON map under the data directory.
//! Cloning a [`MemoryBackend`] yields another handle to the same state, so
//! the owner of a session can still look inside after handing it over.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Account, AccountState, Backend, BackendEvent};
use crate::dcc::{DccId, DccOffer};
use crate::error::BackendError;

#[derive(Debug)]
struct AccountEntry {
    account: Account,
    buddies: BTreeMap<String, Option<String>>,
    conversations: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    store_path: Option<PathBuf>,
    credentials: HashMap<String, String>,
    identity: Option<String>,
    accounts: Vec<AccountEntry>,
    status_message: Option<String>,
    deferred_info: bool,
    fail_identity: bool,
    events: Option<mpsc::UnboundedSender<BackendEvent>>,
    outgoing: Vec<String>,
    next_transfer: u64,
}

impl Inner {
    fn entry(&self, account: &str) -> Result<&AccountEntry, BackendError> {
        self.accounts
            .iter()
            .find(|a| a.account.id == account)
            .ok_or_else(|| BackendError::UnknownAccount(account.to_string()))
    }

    fn entry_mut(&mut self, account: &str) -> Result<&mut AccountEntry, BackendError> {
        self.accounts
            .iter_mut()
            .find(|a| a.account.id == account)
            .ok_or_else(|| BackendError::UnknownAccount(account.to_string()))
    }

    fn connected_entry_mut(&mut self, account: &str) -> Result<&mut AccountEntry, BackendError> {
        let entry = self.entry_mut(account)?;
        if entry.account.state != AccountState::Connected {
            return Err(BackendError::NotConnected(account.to_string()));
        }
        Ok(entry)
    }

    fn emit(&self, event: BackendEvent) {
        if let Some(ref tx) = self.events {
            if tx.send(event).is_err() {
                tracing::debug!("Backend event dropped, session is gone");
            }
        }
    }

    fn persist(&self) -> Result<(), BackendError> {
        let Some(ref path) = self.store_path else {
            return Ok(());
        };
        // Other sessions share the file; merge rather than overwrite.
        let mut merged = read_store(path)?;
        merged.extend(self.credentials.iter().map(|(k, v)| (k.clone(), v.clone())));
        let json = serde_json::to_string_pretty(&merged)
            .map_err(|e| BackendError::Store(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| BackendError::Store(format!("{}: {e}", path.display())))
    }
}

fn read_store(path: &Path) -> Result<HashMap<String, String>, BackendError> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| BackendError::Store(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(BackendError::Store(format!("{}: {e}", path.display()))),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist credentials as JSON at `path`, loading whatever is there.
    pub fn with_store(path: &Path) -> Result<Self, BackendError> {
        let credentials = read_store(path)?;
        let backend = Self::new();
        {
            let mut inner = backend.inner.lock();
            inner.store_path = Some(path.to_path_buf());
            inner.credentials = credentials;
        }
        Ok(backend)
    }

    pub fn add_account(&self, id: &str, protocol: &str, username: &str) {
        self.inner.lock().accounts.push(AccountEntry {
            account: Account {
                id: id.to_string(),
                protocol: protocol.to_string(),
                username: username.to_string(),
                state: AccountState::Disconnected,
            },
            buddies: BTreeMap::new(),
            conversations: BTreeSet::new(),
        });
    }

    /// Route asynchronous results to a session's event channel.
    pub fn attach_events(&self, tx: mpsc::UnboundedSender<BackendEvent>) {
        self.inner.lock().events = Some(tx);
    }

    pub fn set_state(&self, account: &str, state: AccountState) {
        if let Ok(entry) = self.inner.lock().entry_mut(account) {
            entry.account.state = state;
        }
    }

    /// Make `fetch_info` report results asynchronously.
    pub fn set_deferred_info(&self, deferred: bool) {
        self.inner.lock().deferred_info = deferred;
    }

    pub fn set_fail_identity(&self, fail: bool) {
        self.inner.lock().fail_identity = fail;
    }

    pub fn buddies(&self, account: &str) -> Vec<String> {
        self.inner
            .lock()
            .entry(account)
            .map(|e| e.buddies.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn alias_of(&self, account: &str, buddy: &str) -> Option<String> {
        self.inner
            .lock()
            .entry(account)
            .ok()
            .and_then(|e| e.buddies.get(buddy).cloned().flatten())
    }

    pub fn conversations(&self, account: &str) -> Vec<String> {
        self.inner
            .lock()
            .entry(account)
            .map(|e| e.conversations.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn status_message(&self) -> Option<String> {
        self.inner.lock().status_message.clone()
    }

    pub fn identity(&self) -> Option<String> {
        self.inner.lock().identity.clone()
    }

    /// Everything sent through `send_im`/`send_chat`, as `target: text`.
    pub fn outgoing(&self) -> Vec<String> {
        self.inner.lock().outgoing.clone()
    }
}

impl Backend for MemoryBackend {
    fn load_identity(&mut self, identity: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if inner.fail_identity || identity.is_empty() || identity.contains(['/', '\\', '.']) {
            return Err(BackendError::Rejected(format!("cannot load identity {identity}")));
        }
        inner.identity = Some(identity.to_string());
        tracing::debug!(identity, "Identity loaded");
        Ok(())
    }

    fn stored_password(&self, identity: &str) -> Option<String> {
        self.inner.lock().credentials.get(identity).cloned()
    }

    fn set_password(&mut self, identity: &str, password: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner.credentials.insert(identity.to_string(), password.to_string());
        inner.persist()
    }

    fn accounts(&self) -> Vec<Account> {
        self.inner.lock().accounts.iter().map(|a| a.account.clone()).collect()
    }

    fn connect(&mut self, account: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(account)?;
        if entry.account.state == AccountState::Connected {
            return Ok(());
        }
        entry.account.state = AccountState::Connected;
        let buddies: Vec<(String, Option<String>)> =
            entry.buddies.iter().map(|(b, a)| (b.clone(), a.clone())).collect();
        inner.emit(BackendEvent::AccountConnected { account: account.to_string() });
        for (buddy, alias) in buddies {
            inner.emit(BackendEvent::BuddyOnline {
                account: account.to_string(),
                realname: buddy.clone(),
                buddy,
                alias,
            });
        }
        Ok(())
    }

    fn disconnect(&mut self, account: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(account)?;
        entry.account.state = AccountState::Disconnected;
        entry.conversations.clear();
        inner.emit(BackendEvent::AccountDisconnected {
            account: account.to_string(),
            reason: "Disconnected by user".to_string(),
        });
        Ok(())
    }

    fn join_conversation(&mut self, account: &str, conversation: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let entry = inner.connected_entry_mut(account)?;
        entry.conversations.insert(conversation.to_string());
        inner.emit(BackendEvent::ConversationJoined {
            account: account.to_string(),
            conversation: conversation.to_string(),
            members: Vec::new(),
            topic: None,
        });
        Ok(())
    }

    fn leave_conversation(&mut self, account: &str, conversation: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner.entry_mut(account)?.conversations.remove(conversation);
        Ok(())
    }

    fn add_buddy(&mut self, account: &str, buddy: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(account)?;
        entry.buddies.entry(buddy.to_string()).or_insert(None);
        let online = entry.account.state == AccountState::Connected;
        if online {
            inner.emit(BackendEvent::BuddyOnline {
                account: account.to_string(),
                buddy: buddy.to_string(),
                alias: None,
                realname: buddy.to_string(),
            });
        }
        Ok(())
    }

    fn remove_buddy(&mut self, account: &str, buddy: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(account)?;
        entry.buddies.remove(buddy).ok_or_else(|| BackendError::UnknownBuddy {
            account: account.to_string(),
            buddy: buddy.to_string(),
        })?;
        Ok(())
    }

    fn alias_buddy(&mut self, account: &str, buddy: &str, alias: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(account)?;
        let slot = entry.buddies.get_mut(buddy).ok_or_else(|| BackendError::UnknownBuddy {
            account: account.to_string(),
            buddy: buddy.to_string(),
        })?;
        *slot = Some(alias.to_string());
        Ok(())
    }

    fn send_im(&mut self, account: &str, buddy: &str, text: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        inner.connected_entry_mut(account)?;
        inner.outgoing.push(format!("{buddy}: {text}"));
        Ok(())
    }

    fn send_chat(&mut self, account: &str, conversation: &str, text: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let entry = inner.connected_entry_mut(account)?;
        if !entry.conversations.contains(conversation) {
            return Err(BackendError::Rejected(format!("not in conversation {conversation}")));
        }
        inner.outgoing.push(format!("{conversation}: {text}"));
        Ok(())
    }

    fn set_topic(&mut self, account: &str, conversation: &str, _topic: &str) -> Result<(), BackendError> {
        let inner = self.inner.lock();
        let entry = inner.entry(account)?;
        if entry.conversations.contains(conversation) {
            Ok(())
        } else {
            Err(BackendError::Rejected(format!("not in conversation {conversation}")))
        }
    }

    fn accept_file(&mut self, account: &str, buddy: &str, offer: &DccOffer) -> Result<DccId, BackendError> {
        let mut inner = self.inner.lock();
        inner.connected_entry_mut(account)?;
        inner.next_transfer += 1;
        let id = format!("{account}-{}", inner.next_transfer);
        tracing::debug!(%id, buddy, file = %offer.filename, "Accepted file offer");
        Ok(id)
    }

    fn set_status_message(&mut self, message: Option<&str>) {
        self.inner.lock().status_message = message.map(str::to_string);
    }

    fn fetch_info(&mut self, account: &str, buddy: &str) -> bool {
        let inner = self.inner.lock();
        if !inner.deferred_info {
            return false;
        }
        let protocol = inner
            .entry(account)
            .map(|e| e.account.protocol.clone())
            .unwrap_or_default();
        inner.emit(BackendEvent::WhoisInfo {
            account: account.to_string(),
            buddy: buddy.to_string(),
            lines: vec![format!("Protocol: {protocol}")],
        });
        true
    }

    fn shutdown(&mut self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        for entry in inner.accounts.iter_mut() {
            entry.account.state = AccountState::Disconnected;
            entry.conversations.clear();
        }
        inner.events = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        let b = MemoryBackend::new();
        b.add_account("jabber0", "jabber", "me@example.org");
        b
    }

    #[test]
    fn credentials_persist_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let mut b = MemoryBackend::with_store(&path).unwrap();
        assert_eq!(b.stored_password("bob"), None);
        b.set_password("bob", "longenoughpw").unwrap();

        let reloaded = MemoryBackend::with_store(&path).unwrap();
        assert_eq!(reloaded.stored_password("bob").as_deref(), Some("longenoughpw"));
    }

    #[test]
    fn join_requires_connection() {
        let mut b = backend();
        assert_eq!(
            b.join_conversation("jabber0", "room"),
            Err(BackendError::NotConnected("jabber0".into()))
        );
        b.connect("jabber0").unwrap();
        b.join_conversation("jabber0", "room").unwrap();
        assert_eq!(b.conversations("jabber0"), vec!["room".to_string()]);
        assert!(matches!(
            b.join_conversation("nope", "room"),
            Err(BackendError::UnknownAccount(_))
        ));
    }

    #[test]
    fn connect_reports_buddies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut b = backend();
        b.attach_events(tx);
        b.add_buddy("jabber0", "alice@example.org").unwrap();
        b.connect("jabber0").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendEvent::AccountConnected { account: "jabber0".into() }
        );
        assert!(matches!(rx.try_recv().unwrap(), BackendEvent::BuddyOnline { .. }));
    }

    #[test]
    fn buddy_bookkeeping() {
        let mut b = backend();
        b.add_buddy("jabber0", "alice@example.org").unwrap();
        b.alias_buddy("jabber0", "alice@example.org", "ally").unwrap();
        assert_eq!(b.alias_of("jabber0", "alice@example.org").as_deref(), Some("ally"));
        b.remove_buddy("jabber0", "alice@example.org").unwrap();
        assert!(b.buddies("jabber0").is_empty());
        assert!(b.remove_buddy("jabber0", "alice@example.org").is_err());
    }

    #[test]
    fn identity_validation() {
        let mut b = backend();
        assert!(b.load_identity("../etc").is_err());
        b.load_identity("bob").unwrap();
        assert_eq!(b.identity().as_deref(), Some("bob"));
    }
}
