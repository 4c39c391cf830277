//! Per-session registries of nicks, channels and servers.
//!
//! Memberships are stored as [`NickId`]s inside each [`Channel`] and as
//! channel keys inside each [`Nick`], and are resolved through the
//! directory at use time. Every mutation that touches one side touches the
//! other in the same call, so a [`ChanUser`] exists exactly while its nick
//! is a member of its channel.

pub mod channel;
pub mod nick;

use std::collections::{BTreeMap, HashMap, VecDeque};

pub use channel::{ChanStatus, ChanUser, Channel, ChannelKind};
pub use nick::{BuddyHandle, Nick, NickFlags, NickId};

use crate::error::DirectoryError;
use crate::irc::Message;

/// How many departed nicks WHOWAS remembers.
pub const WHOWAS_HISTORY: usize = 64;

/// A server entry: the gateway itself or one backend account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub name: String,
    pub info: String,
}

/// Snapshot of a nick taken when it left the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhowasEntry {
    pub name: String,
    pub ident: String,
    pub host: String,
    pub realname: String,
    pub server: String,
}

/// Sink for messages addressed to a nick.
pub trait Deliver {
    fn deliver(&mut self, to: &Nick, msg: &Message);
}

/// RFC 1459 case mapping.
pub fn irc_lower(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct Directory {
    next_id: u64,
    nicks: BTreeMap<NickId, Nick>,
    nick_index: HashMap<String, NickId>,
    channels: BTreeMap<String, Channel>,
    servers: BTreeMap<String, Server>,
    whowas: VecDeque<WhowasEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Nicks ───────────────────────────────────────────────────────

    pub fn add_nick(&mut self, mut nick: Nick) -> Result<NickId, DirectoryError> {
        let key = irc_lower(&nick.name);
        if self.nick_index.contains_key(&key) {
            return Err(DirectoryError::NickInUse(nick.name));
        }
        self.next_id += 1;
        let id = NickId(self.next_id);
        nick.id = id;
        nick.channels.clear();
        self.nick_index.insert(key, id);
        self.nicks.insert(id, nick);
        Ok(id)
    }

    /// Case-insensitive lookup.
    pub fn find_nick(&self, name: &str) -> Option<NickId> {
        self.nick_index.get(&irc_lower(name)).copied()
    }

    /// Lookup that optionally insists on the exact spelling.
    pub fn find_nick_cased(&self, name: &str, case_sensitive: bool) -> Option<NickId> {
        let id = self.find_nick(name)?;
        if case_sensitive && self.nicks.get(&id)?.name != name {
            return None;
        }
        Some(id)
    }

    pub fn nick(&self, id: NickId) -> Option<&Nick> {
        self.nicks.get(&id)
    }

    pub fn nick_mut(&mut self, id: NickId) -> Option<&mut Nick> {
        self.nicks.get_mut(&id)
    }

    pub fn nick_by_name(&self, name: &str) -> Option<&Nick> {
        self.find_nick(name).and_then(|id| self.nicks.get(&id))
    }

    pub fn nick_name(&self, id: NickId) -> Option<&str> {
        self.nicks.get(&id).map(|n| n.name.as_str())
    }

    /// All nicks in creation order.
    pub fn nicks(&self) -> impl Iterator<Item = &Nick> {
        self.nicks.values()
    }

    pub fn find_buddy(&self, handle: &BuddyHandle) -> Option<NickId> {
        self.nicks
            .values()
            .find(|n| n.buddy() == Some(handle))
            .map(|n| n.id)
    }

    pub fn nicks_on_server(&self, server: &str) -> Vec<NickId> {
        self.nicks
            .values()
            .filter(|n| n.server == server)
            .map(|n| n.id)
            .collect()
    }

    /// First free spelling of `base`, appending `_` as needed.
    pub fn free_nickname(&self, base: &str) -> String {
        let mut candidate = base.to_string();
        while self.find_nick(&candidate).is_some() {
            candidate.push('_');
        }
        candidate
    }

    /// Move a nick to a new name. The new key is inserted before the old
    /// one is dropped; memberships are keyed by id and stay untouched.
    /// Returns the previous spelling.
    pub fn rename_nick(&mut self, id: NickId, new_name: &str) -> Result<String, DirectoryError> {
        let new_key = irc_lower(new_name);
        match self.nick_index.get(&new_key) {
            Some(existing) if *existing != id => {
                return Err(DirectoryError::NickInUse(new_name.to_string()));
            }
            _ => {}
        }
        let nick = self
            .nicks
            .get_mut(&id)
            .ok_or_else(|| DirectoryError::NoSuchNick(new_name.to_string()))?;
        let old_key = irc_lower(&nick.name);
        self.nick_index.insert(new_key.clone(), id);
        if old_key != new_key {
            self.nick_index.remove(&old_key);
        }
        Ok(std::mem::replace(&mut nick.name, new_name.to_string()))
    }

    /// Remove a nick and every membership it holds.
    pub fn remove_nick(&mut self, id: NickId) -> Option<Nick> {
        let nick = self.nicks.remove(&id)?;
        self.nick_index.remove(&irc_lower(&nick.name));
        for key in &nick.channels {
            if let Some(chan) = self.channels.get_mut(key) {
                chan.members.retain(|m| m.nick != id);
            }
        }
        self.whowas.push_front(WhowasEntry {
            name: nick.name.clone(),
            ident: nick.ident.clone(),
            host: nick.host.clone(),
            realname: nick.realname.clone(),
            server: nick.server.clone(),
        });
        self.whowas.truncate(WHOWAS_HISTORY);
        Some(nick)
    }

    pub fn whowas(&self, name: &str) -> Vec<&WhowasEntry> {
        let key = irc_lower(name);
        self.whowas.iter().filter(|e| irc_lower(&e.name) == key).collect()
    }

    // ── Channels ────────────────────────────────────────────────────

    pub fn add_channel(&mut self, channel: Channel) -> Result<(), DirectoryError> {
        let key = irc_lower(channel.name());
        if self.channels.contains_key(&key) {
            return Err(DirectoryError::ChannelExists(channel.name().to_string()));
        }
        self.channels.insert(key, channel);
        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&irc_lower(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&irc_lower(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Remove a channel and drop it from every member's channel list.
    pub fn remove_channel(&mut self, name: &str) -> Option<Channel> {
        let key = irc_lower(name);
        let channel = self.channels.remove(&key)?;
        for member in &channel.members {
            if let Some(nick) = self.nicks.get_mut(&member.nick) {
                nick.channels.retain(|c| *c != key);
            }
        }
        Some(channel)
    }

    pub fn join(&mut self, channel: &str, id: NickId, status: ChanStatus) -> Result<(), DirectoryError> {
        let key = irc_lower(channel);
        let nick = self
            .nicks
            .get_mut(&id)
            .ok_or_else(|| DirectoryError::NoSuchNick(format!("{id:?}")))?;
        let chan = self
            .channels
            .get_mut(&key)
            .ok_or_else(|| DirectoryError::NoSuchChannel(channel.to_string()))?;
        if chan.has_member(id) {
            return Err(DirectoryError::AlreadyOnChannel {
                nick: nick.name.clone(),
                channel: chan.name().to_string(),
            });
        }
        chan.members.push(ChanUser { nick: id, status });
        nick.channels.push(key);
        Ok(())
    }

    pub fn part(&mut self, channel: &str, id: NickId) -> Result<ChanUser, DirectoryError> {
        let key = irc_lower(channel);
        let chan = self
            .channels
            .get_mut(&key)
            .ok_or_else(|| DirectoryError::NoSuchChannel(channel.to_string()))?;
        let nick = self
            .nicks
            .get_mut(&id)
            .ok_or_else(|| DirectoryError::NoSuchNick(format!("{id:?}")))?;
        let Some(pos) = chan.members.iter().position(|m| m.nick == id) else {
            return Err(DirectoryError::NotOnChannel {
                nick: nick.name.clone(),
                channel: chan.name().to_string(),
            });
        };
        nick.channels.retain(|c| *c != key);
        Ok(chan.members.remove(pos))
    }

    /// Grant or revoke status bits. Returns the bits that actually changed.
    pub fn set_status(
        &mut self,
        channel: &str,
        id: NickId,
        bits: ChanStatus,
        add: bool,
    ) -> Result<ChanStatus, DirectoryError> {
        let nick_name = self.nick_name(id).unwrap_or("*").to_string();
        let chan = self
            .channels
            .get_mut(&irc_lower(channel))
            .ok_or_else(|| DirectoryError::NoSuchChannel(channel.to_string()))?;
        let chan_name = chan.name().to_string();
        let member = chan.member_mut(id).ok_or(DirectoryError::NotOnChannel {
            nick: nick_name,
            channel: chan_name,
        })?;
        let changed = if add {
            bits - member.status
        } else {
            bits & member.status
        };
        if add {
            member.status.insert(changed);
        } else {
            member.status.remove(changed);
        }
        Ok(changed)
    }

    /// Deliver `msg` to every member of `channel` in membership order,
    /// skipping `except`. Returns the number of members visited.
    pub fn broadcast(
        &self,
        channel: &str,
        out: &mut dyn Deliver,
        msg: &Message,
        except: Option<NickId>,
    ) -> usize {
        let Some(chan) = self.channel(channel) else {
            return 0;
        };
        let mut visited = 0;
        for member in chan.members() {
            if Some(member.nick) == except {
                continue;
            }
            if let Some(nick) = self.nicks.get(&member.nick) {
                out.deliver(nick, msg);
                visited += 1;
            }
        }
        visited
    }

    // ── Servers ─────────────────────────────────────────────────────

    pub fn add_server(&mut self, server: Server) {
        self.servers.insert(server.name.clone(), server);
    }

    pub fn server(&self, name: &str) -> Option<&Server> {
        self.servers.get(name)
    }

    pub fn remove_server(&mut self, name: &str) -> Option<Server> {
        self.servers.remove(name)
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }
}
