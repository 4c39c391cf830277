//! Per-connection protocol engine.
//!
//! A [`Session`] is driven by exactly one task: raw bytes come in through
//! [`Session::feed`], backend results through [`Session::handle_event`] and
//! timer ticks through [`Session::check_liveness`]. Handlers run one at a
//! time and write their replies straight to the transport.
//!
//! The handlers are split into submodules:
//! - [`registration`]: PASS, NICK, USER, QUIT, PING, PONG and the welcome burst
//! - [`messaging`]: PRIVMSG, NOTICE and DCC offers from the client
//! - [`channel`]: JOIN, PART, NAMES, LIST, TOPIC, MODE, INVITE, KICK
//! - [`queries`]: WHO, WHOIS, WHOWAS, AWAY, ISON, MOTD, VERSION, ADMIN, STATS
//! - [`admin`]: OPER, KILL, SVSNICK, CONNECT, SQUIT, REHASH, DIE, WALLOPS
//! - [`events`]: entry points for backend-originated events

mod admin;
mod channel;
mod commands;
mod events;
mod messaging;
mod queries;
mod registration;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crate::backend::Backend;
use crate::config::SessionConfig;
use crate::dcc::DccList;
use crate::directory::{
    BuddyHandle, ChanStatus, Channel, Deliver, Directory, Nick, NickFlags, NickId, Server, irc_lower,
};
use crate::error::{AuthError, BackendError, SessionError};
use crate::irc::{self, Message};
use crate::listener::Listener;
use crate::transport::{Subscription, Transport};

pub use commands::command_names;

/// Longest line accepted from the client, terminator included.
pub const MAX_LINE_LEN: usize = 8192;
pub const MIN_PASSWORD_LEN: usize = 8;

/// WHOIS waiting for backend info before its end reply.
#[derive(Debug, Clone)]
struct PendingWhois {
    handle: BuddyHandle,
    nick: String,
}

pub struct Session {
    id: String,
    config: Arc<SessionConfig>,
    server_name: String,
    transport: Box<dyn Transport>,
    backend: Box<dyn Backend>,
    listener: Option<Arc<dyn Listener>>,
    dir: Directory,
    user: NickId,
    root: NickId,
    status_channel: String,
    password: Option<String>,
    closed: bool,
    line_buf: Vec<u8>,
    /// Dropping input until the next line terminator.
    overflow: bool,
    last_activity: Instant,
    usage: BTreeMap<&'static str, u64>,
    dcc: DccList,
    /// Conversations to join once their account finishes connecting.
    pending_joins: HashMap<String, Vec<String>>,
    pending_whois: Vec<PendingWhois>,
    subscriptions: Vec<Subscription>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        config: Arc<SessionConfig>,
        transport: Box<dyn Transport>,
        backend: Box<dyn Backend>,
        listener: Option<Arc<dyn Listener>>,
    ) -> Result<Self, AuthError> {
        let id = id.into();
        let hostname = config.hostname.trim();
        let server_name = if hostname.is_empty() {
            transport.local_hostname()
        } else if config.hostname.contains(' ') {
            tracing::error!(session_id = %id, "'{}' is not a valid server hostname", config.hostname);
            return Err(AuthError::InvalidHostname(config.hostname.clone()));
        } else {
            config.hostname.clone()
        };

        let status_channel = config.status_channel.clone();
        if !Channel::is_status_name(&status_channel) {
            tracing::error!(session_id = %id, "'{status_channel}' is not a valid status channel name");
            return Err(AuthError::InvalidStatusChannel(status_channel));
        }
        if !crate::directory::nick::is_valid_nickname(&config.root_nick) {
            return Err(AuthError::InvalidRootNick(config.root_nick.clone()));
        }

        let mut dir = Directory::new();
        dir.add_server(Server {
            name: server_name.clone(),
            info: "IRC gateway".to_string(),
        });
        let root_err = |_| AuthError::InvalidRootNick(config.root_nick.clone());
        let root = dir
            .add_nick(Nick::service(&config.root_nick, &server_name))
            .map_err(root_err)?;
        let user = dir
            .add_nick(Nick::local("*", "", &transport.peer_hostname(), &server_name))
            .map_err(root_err)?;
        let chan_err = |_| AuthError::InvalidStatusChannel(status_channel.clone());
        dir.add_channel(Channel::status(&status_channel)).map_err(chan_err)?;
        dir.join(&status_channel, root, ChanStatus::OP).map_err(chan_err)?;

        let mut session = Self {
            id,
            config,
            server_name,
            transport,
            backend,
            listener,
            dir,
            user,
            root,
            status_channel,
            password: None,
            closed: false,
            line_buf: Vec::new(),
            overflow: false,
            last_activity: Instant::now(),
            usage: BTreeMap::new(),
            dcc: DccList::new(),
            pending_joins: HashMap::new(),
            pending_whois: Vec::new(),
            subscriptions: Vec::new(),
        };
        tracing::info!(session_id = %session.id, server = %session.server_name, "New session");

        let notice = Message::new("NOTICE")
            .with_prefix(session.server_name.clone())
            .to("AUTH")
            .trailing_arg("ircgate initialized, please go on");
        session.send(&notice);
        Ok(session)
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn status_channel(&self) -> &str {
        &self.status_channel
    }

    pub fn directory(&self) -> &Directory {
        &self.dir
    }

    pub fn user(&self) -> NickId {
        self.user
    }

    pub fn root(&self) -> NickId {
        self.root
    }

    pub fn dcc(&self) -> &DccList {
        &self.dcc
    }

    pub fn is_registered(&self) -> bool {
        self.user_has(NickFlags::REGISTERED)
    }

    pub fn is_operator(&self) -> bool {
        self.user_has(NickFlags::OPERATOR)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Authorized invocations of `command` so far.
    pub fn usage(&self, command: &str) -> u64 {
        self.usage.get(command).copied().unwrap_or(0)
    }

    /// Register a callback source released at teardown.
    pub fn add_subscription(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn reconfigure(&mut self, config: Arc<SessionConfig>) {
        tracing::debug!(session_id = %self.id, "Configuration reloaded");
        self.config = config;
    }

    fn user_has(&self, flag: NickFlags) -> bool {
        self.dir.nick(self.user).is_some_and(|n| n.has_flag(flag))
    }

    fn user_nick(&self) -> Option<&Nick> {
        self.dir.nick(self.user)
    }

    fn user_name(&self) -> String {
        self.dir.nick_name(self.user).unwrap_or("*").to_string()
    }

    fn user_mask(&self) -> String {
        self.user_nick().map(Nick::hostmask).unwrap_or_else(|| "*".to_string())
    }

    // ── Input ───────────────────────────────────────────────────────

    /// Feed bytes read from the transport. Complete lines are handled
    /// immediately; a partial line waits for more data.
    pub fn feed(&mut self, data: &[u8]) {
        self.line_buf.extend_from_slice(data);
        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.line_buf.drain(..=pos).collect();
            if self.closed {
                continue;
            }
            if std::mem::take(&mut self.overflow) {
                continue;
            }
            if raw.len() > MAX_LINE_LEN {
                self.reject_long_line(raw.len());
                continue;
            }
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.handle_line(&line);
        }
        if self.line_buf.len() > MAX_LINE_LEN {
            let len = self.line_buf.len();
            self.line_buf.clear();
            if !self.overflow && !self.closed {
                self.overflow = true;
                self.reject_long_line(len);
            }
        }
    }

    fn reject_long_line(&mut self, len: usize) {
        tracing::warn!(session_id = %self.id, len, "Line too long, dropping");
        self.touch();
        self.reply(irc::ERR_INPUTTOOLONG, &["Input line was too long"]);
    }

    /// Handle one line without its terminator.
    pub fn handle_line(&mut self, line: &str) {
        if self.closed {
            return;
        }
        self.touch();
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return;
        }
        tracing::debug!(session_id = %self.id, "<- {line}");
        match Message::parse(line) {
            Ok(msg) => self.dispatch(&msg),
            Err(e) => tracing::debug!(session_id = %self.id, "Ignoring line: {e}"),
        }
    }

    /// Any inbound traffic counts as proof of life.
    fn touch(&mut self) {
        self.last_activity = Instant::now();
        if let Some(user) = self.dir.nick_mut(self.user) {
            user.del_flag(NickFlags::PING_PENDING);
        }
    }

    /// Periodic liveness check: probe an idle client, drop one that never
    /// answered the previous probe.
    pub fn check_liveness(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        if self.user_has(NickFlags::PING_PENDING) {
            self.fail(SessionError::PingTimeout);
            return;
        }
        if now.saturating_duration_since(self.last_activity) >= self.config.ping_interval {
            let ping = Message::new("PING").trailing_arg(self.server_name.clone());
            self.send(&ping);
            if let Some(user) = self.dir.nick_mut(self.user) {
                user.set_flag(NickFlags::PING_PENDING);
            }
        }
    }

    // ── Output ──────────────────────────────────────────────────────

    fn send(&mut self, msg: &Message) {
        if self.transport.is_closed() {
            return;
        }
        let line = msg.to_wire();
        tracing::trace!(session_id = %self.id, "-> {line}");
        self.transport.write(&line);
    }

    /// Numeric reply addressed to the user.
    fn reply(&mut self, code: &str, params: &[&str]) {
        let nick = self.user_name();
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(nick.as_str());
        all.extend_from_slice(params);
        let msg = Message::from_server(&self.server_name, code, all);
        self.send(&msg);
    }

    fn server_notice(&mut self, text: &str) {
        let msg = Message::new("NOTICE")
            .with_prefix(self.server_name.clone())
            .to(self.user_name())
            .trailing_arg(text);
        self.send(&msg);
    }

    /// Informational text from the root nick, in the status channel once
    /// the user sits there.
    pub fn status_notice(&mut self, text: &str) {
        let in_status = self
            .dir
            .channel(&self.status_channel)
            .is_some_and(|c| c.has_member(self.user));
        if !in_status {
            self.server_notice(text);
            return;
        }
        let root_mask = self.dir.nick(self.root).map(Nick::hostmask).unwrap_or_default();
        let msg = Message::new("PRIVMSG")
            .with_prefix(root_mask)
            .to(self.status_channel.clone())
            .trailing_arg(text);
        self.send(&msg);
    }

    /// Deliver to every member of `channel` except `except`.
    fn broadcast(&mut self, channel: &str, msg: &Message, except: Option<NickId>) -> usize {
        let mut out = Outbound::new(self.user, self.transport.as_mut(), self.backend.as_mut());
        let visited = self.dir.broadcast(channel, &mut out, msg, except);
        let failures = out.failures;
        self.report_failures(failures);
        visited
    }

    fn deliver_to(&mut self, id: NickId, msg: &Message) {
        let Some(nick) = self.dir.nick(id) else {
            return;
        };
        let mut out = Outbound::new(self.user, self.transport.as_mut(), self.backend.as_mut());
        out.deliver(nick, msg);
        let failures = out.failures;
        self.report_failures(failures);
    }

    fn report_failures(&mut self, failures: Vec<(String, BackendError)>) {
        for (nick, err) in failures {
            tracing::warn!(session_id = %self.id, %nick, "Backend delivery failed: {err}");
            self.server_notice(&format!("Unable to deliver message to {nick}: {err}"));
        }
    }

    // ── Directory helpers ───────────────────────────────────────────

    /// Remove a nick other than the user or root. The user sees a QUIT if
    /// they shared a channel; transfers with this peer lose their reference.
    fn remove_nick(&mut self, id: NickId, reason: &str) {
        if id == self.user || id == self.root {
            return;
        }
        let Some(nick) = self.dir.nick(id) else {
            return;
        };
        let shares_channel = nick
            .channels()
            .iter()
            .any(|key| self.dir.channel(key).is_some_and(|c| c.has_member(self.user)));
        let quit = Message::new("QUIT")
            .with_prefix(nick.hostmask())
            .trailing_arg(reason);
        if shares_channel {
            self.send(&quit);
        }
        self.dcc.peer_removed(id);
        if let Some(removed) = self.dir.remove_nick(id) {
            tracing::debug!(session_id = %self.id, nick = removed.name(), "Nick removed");
        }
    }

    /// Drop a buddy nick that no longer sits in any channel.
    fn forget_if_unseated(&mut self, id: NickId) {
        let unseated = self
            .dir
            .nick(id)
            .is_some_and(|n| n.is_remote_backed() && n.channels().is_empty());
        if unseated {
            self.remove_nick(id, "Left all channels");
        }
    }

    /// Forget a conversation channel along with the buddies only seen there.
    fn remove_conversation(&mut self, name: &str) {
        let Some(chan) = self.dir.remove_channel(name) else {
            return;
        };
        for member in chan.members() {
            self.forget_if_unseated(member.nick);
        }
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Terminate the session: one final ERROR line, then the callback
    /// subscriptions are released, the transport closed and the listener
    /// asked to dispose of us. Idempotent.
    pub fn quit(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        tracing::info!(session_id = %self.id, reason, "Closing session");
        let error = Message::new("ERROR").trailing_arg(format!("Closing Link: {reason}"));
        self.send(&error);
        self.closed = true;

        for subscription in &mut self.subscriptions {
            subscription.release();
        }
        self.subscriptions.clear();
        self.transport.close();
        if let Some(listener) = self.listener.clone() {
            listener.dispose(&self.id);
        }
    }

    fn fail(&mut self, err: SessionError) {
        tracing::warn!(session_id = %self.id, "Fatal session error: {err}");
        self.quit(&err.to_string());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.release();
        }
        self.dcc.clear();
        if let Err(e) = self.backend.shutdown() {
            tracing::debug!(session_id = %self.id, "Backend shutdown failed: {e}");
        }
    }
}

/// Routes directory deliveries: the user gets the line on the transport,
/// remote-backed nicks get messages addressed to them through the backend,
/// everybody else ignores it.
struct Outbound<'a> {
    user: NickId,
    transport: &'a mut dyn Transport,
    backend: &'a mut dyn Backend,
    failures: Vec<(String, BackendError)>,
}

impl<'a> Outbound<'a> {
    fn new(user: NickId, transport: &'a mut dyn Transport, backend: &'a mut dyn Backend) -> Self {
        Self {
            user,
            transport,
            backend,
            failures: Vec::new(),
        }
    }
}

impl Deliver for Outbound<'_> {
    fn deliver(&mut self, to: &Nick, msg: &Message) {
        if to.id() == self.user {
            if !self.transport.is_closed() {
                let line = msg.to_wire();
                tracing::trace!("-> {line}");
                self.transport.write(&line);
            }
            return;
        }
        let Some(handle) = to.buddy() else {
            return;
        };
        if !matches!(msg.command.as_str(), "PRIVMSG" | "NOTICE") {
            return;
        }
        let addressed = msg
            .receiver
            .as_deref()
            .is_some_and(|r| irc_lower(r) == irc_lower(to.name()));
        if !addressed {
            return;
        }
        let text = msg.param(0).unwrap_or_default();
        if let Err(e) = self.backend.send_im(&handle.account, &handle.buddy, text) {
            self.failures.push((to.name().to_string(), e));
        }
    }
}
