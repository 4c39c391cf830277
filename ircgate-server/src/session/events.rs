//! Entry points for backend-originated events.
//!
//! Backends report through [`BackendEvent`]s which the connection task
//! hands to [`Session::handle_event`]. Each event is mapped onto the
//! directory and shown to the user as ordinary IRC traffic.

use std::net::SocketAddr;

use crate::backend::BackendEvent;
use crate::dcc::{DccCallback, DccEvent, DccOffer, DccUpdate};
use crate::directory::{BuddyHandle, ChanStatus, Channel, ChannelKind, Nick, NickId, Server};
use crate::directory::nick::sanitize_nickname;
use crate::irc::{self, Message};

use super::Session;
use super::channel::{join_channel, set_member_status};
use super::queries::finish_whois;

impl Session {
    pub fn handle_event(&mut self, event: BackendEvent) {
        if self.closed {
            return;
        }
        tracing::trace!(session_id = %self.id, ?event, "Backend event");
        match event {
            BackendEvent::AccountConnected { account } => self.account_connected(&account),
            BackendEvent::AccountDisconnected { account, reason } => {
                self.account_disconnected(&account, &reason)
            }
            BackendEvent::BuddyOnline {
                account,
                buddy,
                alias,
                realname,
            } => {
                self.buddy_online(&account, &buddy, alias.as_deref(), &realname);
            }
            BackendEvent::BuddyOffline { account, buddy } => self.buddy_offline(&account, &buddy),
            BackendEvent::BuddyAway {
                account,
                buddy,
                message,
            } => self.buddy_away(&account, &buddy, message),
            BackendEvent::Message {
                account,
                buddy,
                conversation,
                text,
                notice,
            } => {
                if notice {
                    self.notice(&account, &buddy, conversation.as_deref(), &text);
                } else {
                    self.privmsg(&account, &buddy, conversation.as_deref(), &text);
                }
            }
            BackendEvent::ConversationJoined {
                account,
                conversation,
                members,
                topic,
            } => self.conversation_joined(&account, &conversation, &members, topic),
            BackendEvent::ConversationLeft {
                account,
                conversation,
            } => self.conversation_left(&account, &conversation),
            BackendEvent::WhoisInfo {
                account,
                buddy,
                lines,
            } => finish_whois(self, &account, &buddy, &lines),
            BackendEvent::FileOffer {
                id,
                account,
                buddy,
                filename,
                size,
                addr,
            } => {
                let handle = BuddyHandle { account, buddy };
                match self.dir.find_buddy(&handle) {
                    Some(peer) => self.create_dcc_send(&id, peer, &filename, size, addr),
                    None => tracing::warn!(
                        session_id = %self.id,
                        account = %handle.account,
                        buddy = %handle.buddy,
                        "Dropping file offer from unknown buddy"
                    ),
                }
            }
            BackendEvent::TransferUpdated { id, update } => self.update_dcc(&id, update),
            BackendEvent::Notice { text } => self.status_notice(&text),
        }
    }

    // ── Accounts ────────────────────────────────────────────────────

    /// The account shows up as a server; conversations the user asked for
    /// while it was connecting are joined now.
    pub fn account_connected(&mut self, account: &str) {
        let info = self
            .backend
            .accounts()
            .into_iter()
            .find(|a| a.id == account)
            .map(|a| format!("{} ({})", a.username, a.protocol))
            .unwrap_or_default();
        self.dir.add_server(Server {
            name: account.to_string(),
            info,
        });
        tracing::info!(session_id = %self.id, account, "Account connected");
        self.status_notice(&format!("{account}: connected"));

        for conversation in self.pending_joins.remove(account).unwrap_or_default() {
            if let Err(e) = self.backend.join_conversation(account, &conversation) {
                let name = Channel::conversation_name(account, &conversation);
                self.status_notice(&format!("Unable to join {name}: {e}"));
            }
        }
    }

    /// Drop everything the account brought in: its conversations, its
    /// buddies and its server entry.
    pub fn account_disconnected(&mut self, account: &str, reason: &str) {
        let channels: Vec<String> = self
            .dir
            .channels()
            .filter(|c| matches!(c.kind(), ChannelKind::Conversation { account: a, .. } if a == account))
            .map(|c| c.name().to_string())
            .collect();
        for name in channels {
            self.drop_conversation(&name, Some(reason));
        }
        for id in self.dir.nicks_on_server(account) {
            self.remove_nick(id, reason);
        }
        self.dir.remove_server(account);
        self.pending_joins.remove(account);
        self.pending_whois.retain(|p| p.handle.account != account);

        tracing::info!(session_id = %self.id, account, reason, "Account disconnected");
        self.status_notice(&format!("{account}: disconnected ({reason})"));
    }

    // ── Buddies ─────────────────────────────────────────────────────

    /// Give a buddy a nick and voice it in the status channel.
    pub fn buddy_online(&mut self, account: &str, buddy: &str, alias: Option<&str>, realname: &str) {
        let handle = BuddyHandle {
            account: account.to_string(),
            buddy: buddy.to_string(),
        };
        let id = match self.dir.find_buddy(&handle) {
            Some(id) => {
                if let Some(nick) = self.dir.nick_mut(id) {
                    nick.realname = realname.to_string();
                }
                id
            }
            None => match self.add_buddy_nick(handle, alias, realname) {
                Some(id) => id,
                None => return,
            },
        };
        // Nicks first seen in a conversation or a private message, or kicked
        // earlier, are not seated in the status channel yet.
        let status = self.status_channel.clone();
        if self.dir.channel(&status).is_some_and(|c| c.has_member(id)) {
            return;
        }
        let voice = match self.dir.nick(id) {
            Some(nick) if nick.is_away() => ChanStatus::empty(),
            _ => ChanStatus::VOICE,
        };
        join_channel(self, &status, id, voice);
    }

    pub fn buddy_offline(&mut self, account: &str, buddy: &str) {
        let handle = BuddyHandle {
            account: account.to_string(),
            buddy: buddy.to_string(),
        };
        if let Some(id) = self.dir.find_buddy(&handle) {
            self.remove_nick(id, "Offline");
        }
    }

    /// Away buddies lose their voice in the status channel.
    pub fn buddy_away(&mut self, account: &str, buddy: &str, message: Option<String>) {
        let handle = BuddyHandle {
            account: account.to_string(),
            buddy: buddy.to_string(),
        };
        let Some(id) = self.dir.find_buddy(&handle) else {
            return;
        };
        let back = message.is_none();
        if let Some(nick) = self.dir.nick_mut(id) {
            nick.set_away(message);
        }
        let status = self.status_channel.clone();
        let server = self.server_name.clone();
        set_member_status(self, &server, &status, id, ChanStatus::VOICE, back);
    }

    fn add_buddy_nick(&mut self, handle: BuddyHandle, alias: Option<&str>, realname: &str) -> Option<NickId> {
        let base = sanitize_nickname(alias.unwrap_or(&handle.buddy));
        let name = self.dir.free_nickname(&base);
        let account = handle.account.clone();
        match self.dir.add_nick(Nick::remote(&name, handle, realname)) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(session_id = %self.id, %account, "Cannot add buddy nick: {e}");
                None
            }
        }
    }

    /// Existing nick for a buddy, or a new one outside any channel.
    fn ensure_buddy_nick(&mut self, account: &str, buddy: &str) -> Option<NickId> {
        let handle = BuddyHandle {
            account: account.to_string(),
            buddy: buddy.to_string(),
        };
        match self.dir.find_buddy(&handle) {
            Some(id) => Some(id),
            None => self.add_buddy_nick(handle, None, buddy),
        }
    }

    // ── Messages ────────────────────────────────────────────────────

    pub fn privmsg(&mut self, account: &str, buddy: &str, conversation: Option<&str>, text: &str) {
        self.relay_incoming("PRIVMSG", account, buddy, conversation, text);
    }

    pub fn notice(&mut self, account: &str, buddy: &str, conversation: Option<&str>, text: &str) {
        self.relay_incoming("NOTICE", account, buddy, conversation, text);
    }

    fn relay_incoming(
        &mut self,
        command: &str,
        account: &str,
        buddy: &str,
        conversation: Option<&str>,
        text: &str,
    ) {
        let Some(from) = self.ensure_buddy_nick(account, buddy) else {
            return;
        };
        let Some(mask) = self.dir.nick(from).map(Nick::hostmask) else {
            return;
        };
        match conversation {
            Some(conversation) => {
                let name = Channel::conversation_name(account, conversation);
                let Some(chan) = self.dir.channel(&name) else {
                    tracing::debug!(session_id = %self.id, channel = %name, "Message for unknown conversation");
                    return;
                };
                let name = chan.name().to_string();
                if !chan.has_member(from) {
                    join_channel(self, &name, from, ChanStatus::empty());
                }
                let msg = Message::new(command)
                    .with_prefix(mask)
                    .to(name.clone())
                    .trailing_arg(text);
                self.broadcast(&name, &msg, Some(from));
            }
            None => {
                let msg = Message::new(command)
                    .with_prefix(mask)
                    .to(self.user_name())
                    .trailing_arg(text);
                self.send(&msg);
            }
        }
    }

    // ── Conversations ───────────────────────────────────────────────

    /// Mirror a conversation as a channel: members first, then the user so
    /// that the NAMES listing is complete.
    pub fn conversation_joined(
        &mut self,
        account: &str,
        conversation: &str,
        members: &[String],
        topic: Option<String>,
    ) {
        let name = Channel::conversation_name(account, conversation);
        if self.dir.channel(&name).is_none() {
            if let Err(e) = self.dir.add_channel(Channel::conversation(account, conversation)) {
                tracing::warn!(session_id = %self.id, channel = %name, "Cannot add conversation: {e}");
                return;
            }
        }
        if let Some(chan) = self.dir.channel_mut(&name) {
            if topic.is_some() {
                chan.topic = topic;
            }
        }

        for member in members {
            let Some(id) = self.ensure_buddy_nick(account, member) else {
                continue;
            };
            if !self.dir.channel(&name).is_some_and(|c| c.has_member(id)) {
                join_channel(self, &name, id, ChanStatus::empty());
            }
        }
        let me = self.user;
        if !self.dir.channel(&name).is_some_and(|c| c.has_member(me)) {
            join_channel(self, &name, me, ChanStatus::empty());
        }
    }

    pub fn conversation_left(&mut self, account: &str, conversation: &str) {
        let name = Channel::conversation_name(account, conversation);
        self.drop_conversation(&name, None);
    }

    /// Show the user leaving a conversation channel and forget it.
    fn drop_conversation(&mut self, name: &str, reason: Option<&str>) {
        let me = self.user;
        let Some(chan) = self.dir.channel(name) else {
            return;
        };
        let name = chan.name().to_string();
        if chan.has_member(me) {
            let mut part = Message::new("PART").with_prefix(self.user_mask()).to(name.clone());
            if let Some(reason) = reason {
                part = part.trailing_arg(reason);
            }
            self.send(&part);
        }
        self.remove_conversation(&name);
    }

    // ── File transfers ──────────────────────────────────────────────

    /// A buddy offers the user a file: record it and show the client a
    /// regular DCC SEND from that buddy.
    pub fn create_dcc_send(&mut self, id: &str, peer: NickId, filename: &str, size: u64, addr: SocketAddr) {
        let Some(mask) = self.dir.nick(peer).map(Nick::hostmask) else {
            return;
        };
        self.dcc.create_send(id, peer, filename, size, addr);
        let offer = DccOffer {
            filename: filename.to_string(),
            addr,
            size,
        };
        let msg = Message::new("PRIVMSG")
            .with_prefix(mask)
            .to(self.user_name())
            .trailing_arg(irc::ctcp(&offer.to_ctcp()));
        tracing::info!(session_id = %self.id, transfer = id, file = filename, size, "DCC offer");
        self.send(&msg);
    }

    /// The client offered a file which the backend is now fetching.
    pub fn create_dcc_get(
        &mut self,
        id: &str,
        peer: NickId,
        filename: &str,
        size: u64,
        addr: Option<SocketAddr>,
        on_complete: DccCallback,
    ) {
        tracing::info!(session_id = %self.id, transfer = id, file = filename, size, "DCC get");
        self.dcc.create_get(id, peer, filename, size, addr, on_complete);
    }

    pub fn update_dcc(&mut self, id: &str, update: DccUpdate) {
        let filename = self.dcc.get(id).map(|t| t.filename.clone());
        match (self.dcc.update(id, update), filename) {
            (Some(DccEvent::Progress { transferred, size }), _) => {
                tracing::trace!(session_id = %self.id, transfer = id, transferred, size, "DCC progress");
            }
            (Some(DccEvent::Finished), Some(file)) => {
                self.status_notice(&format!("Transfer of {file} finished"));
            }
            (Some(DccEvent::Destroyed), Some(file)) => {
                self.status_notice(&format!("Transfer of {file} closed"));
            }
            _ => {
                tracing::debug!(session_id = %self.id, transfer = id, "Update for unknown transfer");
            }
        }
    }
}
