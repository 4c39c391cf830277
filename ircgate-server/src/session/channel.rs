//! Channel commands: JOIN, PART, NAMES, LIST, TOPIC, MODE, INVITE, KICK.

use crate::backend::AccountState;
use crate::directory::{ChanStatus, Channel, ChannelKind, NickFlags, NickId};
use crate::error::BackendError;
use crate::irc::{self, Message};

use super::Session;

// ── Shared helpers ──────────────────────────────────────────────────

/// Add `id` to `channel` with `status` already set and announce it. The
/// other members see the status as a MODE line from the server; the user
/// also receives the topic and the NAMES listing.
pub(super) fn join_channel(
    session: &mut Session,
    channel: &str,
    id: NickId,
    status: ChanStatus,
) -> bool {
    if let Err(e) = session.dir.join(channel, id, status) {
        tracing::debug!(session_id = %session.id, "Join refused: {e}");
        return false;
    }
    let (Some(chan), Some(nick)) = (session.dir.channel(channel), session.dir.nick(id)) else {
        return false;
    };
    let name = chan.name().to_string();
    let join = Message::new("JOIN")
        .with_prefix(nick.hostmask())
        .trailing_arg(name.clone());
    let mode = (!status.is_empty())
        .then(|| chan.mode_message(&session.server_name, nick.name(), true, status));
    session.broadcast(&name, &join, None);
    if let Some(mode) = mode {
        session.broadcast(&name, &mode, Some(id));
    }
    if id == session.user {
        send_topic(session, &name, false);
        send_names(session, &name);
    }
    true
}

/// Grant or revoke status bits and show the change to every member as a
/// MODE line from `sender`.
pub(super) fn set_member_status(
    session: &mut Session,
    sender: &str,
    channel: &str,
    id: NickId,
    bits: ChanStatus,
    add: bool,
) -> ChanStatus {
    let changed = match session.dir.set_status(channel, id, bits, add) {
        Ok(changed) => changed,
        Err(e) => {
            tracing::debug!(session_id = %session.id, "Status change refused: {e}");
            return ChanStatus::empty();
        }
    };
    if changed.is_empty() {
        return changed;
    }
    let (Some(chan), Some(target)) = (session.dir.channel(channel), session.dir.nick_name(id)) else {
        return changed;
    };
    let mode = chan.mode_message(sender, target, add, changed);
    let name = chan.name().to_string();
    session.broadcast(&name, &mode, None);
    changed
}

fn send_topic(session: &mut Session, channel: &str, reply_if_unset: bool) {
    let Some(chan) = session.dir.channel(channel) else {
        return;
    };
    let name = chan.name().to_string();
    match chan.topic.clone() {
        Some(topic) => session.reply(irc::RPL_TOPIC, &[&name, &topic]),
        None if reply_if_unset => session.reply(irc::RPL_NOTOPIC, &[&name, "No topic is set"]),
        None => {}
    }
}

fn send_names(session: &mut Session, channel: &str) {
    let Some(chan) = session.dir.channel(channel) else {
        session.reply(irc::RPL_ENDOFNAMES, &[channel, "End of /NAMES list"]);
        return;
    };
    let name = chan.name().to_string();
    let listing = chan.names_listing(|id| session.dir.nick_name(id)).join(" ");
    session.reply(irc::RPL_NAMREPLY, &["=", &name, &listing]);
    session.reply(irc::RPL_ENDOFNAMES, &[&name, "End of /NAMES list"]);
}

/// Remove the user from a channel. Conversation channels are dropped with
/// their last local member.
fn part_user(session: &mut Session, channel: &str, reason: Option<&str>) {
    let me = session.user;
    let mask = session.user_mask();
    let Some(chan) = session.dir.channel(channel) else {
        return;
    };
    let name = chan.name().to_string();
    let kind = chan.kind().clone();

    let mut part = Message::new("PART").with_prefix(mask).to(name.clone());
    if let Some(reason) = reason {
        part = part.trailing_arg(reason);
    }
    session.broadcast(&name, &part, None);
    if let Err(e) = session.dir.part(&name, me) {
        tracing::debug!(session_id = %session.id, "Part failed: {e}");
        return;
    }

    if let ChannelKind::Conversation { account, conversation } = kind {
        if let Err(e) = session.backend.leave_conversation(&account, &conversation) {
            tracing::warn!(session_id = %session.id, %account, "Leaving {conversation} failed: {e}");
        }
        session.remove_conversation(&name);
    }
}

// ── Handlers ────────────────────────────────────────────────────────

/// JOIN channel{,channel}
pub(super) fn handle_join(session: &mut Session, msg: &Message) {
    let targets = msg.param(0).unwrap_or_default();
    for name in targets.split(',').filter(|n| !n.is_empty()) {
        if name.starts_with('&') {
            join_status_channel(session, name);
        } else if let Some((account, conversation)) = Channel::parse_conversation_name(name) {
            join_conversation(session, name, account, conversation);
        } else {
            session.reply(irc::ERR_NOSUCHCHANNEL, &[name, "No such channel"]);
        }
    }
}

fn join_status_channel(session: &mut Session, name: &str) {
    let me = session.user;
    match session.dir.channel(name) {
        None => session.reply(irc::ERR_NOSUCHCHANNEL, &[name, "No such channel"]),
        Some(chan) if chan.has_member(me) => {}
        Some(chan) => {
            let name = chan.name().to_string();
            join_channel(session, &name, me, ChanStatus::OP);
        }
    }
}

fn join_conversation(session: &mut Session, name: &str, account: &str, conversation: &str) {
    let me = session.user;
    if session.dir.channel(name).is_some_and(|c| c.has_member(me)) {
        return;
    }
    match session.backend.account_state(account) {
        None => {
            session.reply(irc::ERR_NOSUCHCHANNEL, &[name, "No such channel"]);
        }
        Some(AccountState::Connecting) => {
            tracing::debug!(session_id = %session.id, account, conversation, "Queueing join");
            let queue = session.pending_joins.entry(account.to_string()).or_default();
            if !queue.iter().any(|c| c == conversation) {
                queue.push(conversation.to_string());
            }
            session.status_notice(&format!(
                "{account} is still connecting, {name} will be joined once it is online"
            ));
        }
        Some(_) => {
            if let Err(e) = session.backend.join_conversation(account, conversation) {
                tracing::debug!(session_id = %session.id, account, "Join rejected: {e}");
                session.reply(irc::ERR_NOSUCHCHANNEL, &[name, "No such channel"]);
            }
        }
    }
}

/// PART channel{,channel} [reason]
pub(super) fn handle_part(session: &mut Session, msg: &Message) {
    let me = session.user;
    let targets = msg.param(0).unwrap_or_default();
    let reason = msg.param(1);
    for name in targets.split(',').filter(|n| !n.is_empty()) {
        match session.dir.channel(name) {
            None => session.reply(irc::ERR_NOSUCHCHANNEL, &[name, "No such channel"]),
            Some(chan) if !chan.has_member(me) => {
                session.reply(irc::ERR_NOTONCHANNEL, &[name, "You're not on that channel"]);
            }
            Some(_) => part_user(session, name, reason),
        }
    }
}

/// NAMES [channel{,channel}]
pub(super) fn handle_names(session: &mut Session, msg: &Message) {
    let names: Vec<String> = match msg.param(0) {
        Some(list) => list.split(',').filter(|n| !n.is_empty()).map(str::to_string).collect(),
        None => {
            let me = session.user;
            session
                .dir
                .channels()
                .filter(|c| c.has_member(me))
                .map(|c| c.name().to_string())
                .collect()
        }
    };
    for name in names {
        send_names(session, &name);
    }
}

/// LIST
pub(super) fn handle_list(session: &mut Session, _msg: &Message) {
    let rows: Vec<(String, String, String)> = session
        .dir
        .channels()
        .map(|c| {
            (
                c.name().to_string(),
                c.members().len().to_string(),
                c.topic.clone().unwrap_or_default(),
            )
        })
        .collect();
    for (name, count, topic) in rows {
        session.reply(irc::RPL_LIST, &[&name, &count, &topic]);
    }
    session.reply(irc::RPL_LISTEND, &["End of /LIST"]);
}

/// TOPIC channel [topic]
pub(super) fn handle_topic(session: &mut Session, msg: &Message) {
    let target = msg.param(0).unwrap_or_default();
    let Some(chan) = session.dir.channel(target) else {
        session.reply(irc::ERR_NOSUCHCHANNEL, &[target, "No such channel"]);
        return;
    };
    let name = chan.name().to_string();
    let kind = chan.kind().clone();
    let Some(topic) = msg.param(1) else {
        send_topic(session, &name, true);
        return;
    };

    let ChannelKind::Conversation { account, conversation } = kind else {
        session.reply(irc::ERR_CHANOPRIVSNEEDED, &[&name, "The status channel topic is fixed"]);
        return;
    };
    if let Err(e) = session.backend.set_topic(&account, &conversation, topic) {
        let text = format!("Cannot change topic: {e}");
        session.reply(irc::ERR_CHANOPRIVSNEEDED, &[&name, &text]);
        return;
    }
    if let Some(chan) = session.dir.channel_mut(&name) {
        chan.topic = (!topic.is_empty()).then(|| topic.to_string());
    }
    let update = Message::new("TOPIC")
        .with_prefix(session.user_mask())
        .to(name.clone())
        .trailing_arg(topic);
    session.broadcast(&name, &update, None);
}

/// MODE target [modes [args...]]
pub(super) fn handle_mode(session: &mut Session, msg: &Message) {
    let target = msg.param(0).unwrap_or_default();
    let args = &msg.params[1..];
    if Channel::is_channel_name(target) {
        channel_mode(session, target, args);
    } else {
        user_mode(session, target, args);
    }
}

fn channel_mode(session: &mut Session, target: &str, args: &[String]) {
    let me = session.user;
    let Some(chan) = session.dir.channel(target) else {
        session.reply(irc::ERR_NOSUCHCHANNEL, &[target, "No such channel"]);
        return;
    };
    let name = chan.name().to_string();
    let created = chan.created_at.to_string();
    let is_op = chan.member(me).is_some_and(|m| m.has_status(ChanStatus::OP));

    let Some(modes) = args.first() else {
        session.reply(irc::RPL_CHANNELMODEIS, &[&name, "+"]);
        session.reply(irc::RPL_CREATIONTIME, &[&name, &created]);
        return;
    };
    if modes.trim_start_matches('+') == "b" {
        session.reply(irc::RPL_ENDOFBANLIST, &[&name, "End of channel ban list"]);
        return;
    }
    if !is_op {
        session.reply(irc::ERR_CHANOPRIVSNEEDED, &[&name, "You're not channel operator"]);
        return;
    }

    let mask = session.user_mask();
    let mut nicks = args[1..].iter();
    let mut add = true;
    for letter in modes.chars() {
        match letter {
            '+' => add = true,
            '-' => add = false,
            letter => {
                let Some(bits) = ChanStatus::from_letter(letter) else {
                    let unknown = letter.to_string();
                    session.reply(irc::ERR_UNKNOWNMODE, &[&unknown, "is unknown mode char to me"]);
                    continue;
                };
                let Some(nick) = nicks.next() else {
                    session.reply(irc::ERR_NEEDMOREPARAMS, &["MODE", "Not enough parameters"]);
                    return;
                };
                let Some(id) = session.dir.find_nick(nick) else {
                    session.reply(irc::ERR_NOSUCHNICK, &[nick, "No such nick/channel"]);
                    continue;
                };
                let on_channel = session.dir.channel(&name).is_some_and(|c| c.has_member(id));
                if !on_channel {
                    session.reply(
                        irc::ERR_USERNOTINCHANNEL,
                        &[nick, &name, "They aren't on that channel"],
                    );
                    continue;
                }
                set_member_status(session, &mask, &name, id, bits, add);
            }
        }
    }
}

fn user_mode(session: &mut Session, target: &str, args: &[String]) {
    let Some(id) = session.dir.find_nick(target) else {
        session.reply(irc::ERR_NOSUCHNICK, &[target, "No such nick/channel"]);
        return;
    };
    if id != session.user {
        session.reply(irc::ERR_USERSDONTMATCH, &["Can't change mode for other users"]);
        return;
    }
    let Some(modes) = args.first() else {
        let current = if session.is_operator() { "+o" } else { "+" };
        session.reply(irc::RPL_UMODEIS, &[current]);
        return;
    };

    let mut add = true;
    for letter in modes.chars() {
        match letter {
            '+' => add = true,
            '-' => add = false,
            'o' if !add && session.is_operator() => {
                if let Some(user) = session.dir.nick_mut(id) {
                    user.del_flag(NickFlags::OPERATOR);
                }
                let nick = session.user_name();
                let change = Message::new("MODE")
                    .with_prefix(session.user_mask())
                    .to(nick)
                    .trailing_arg("-o");
                session.send(&change);
            }
            // Operator status is only granted through OPER.
            'o' => {}
            _ => session.reply(irc::ERR_UMODEUNKNOWNFLAG, &["Unknown MODE flag"]),
        }
    }
}

/// INVITE buddy:account channel
///
/// Adds a buddy to the account's list. Only the status channel takes
/// invitations; the buddy shows up there once the backend reports it.
pub(super) fn handle_invite(session: &mut Session, msg: &Message) {
    let who = msg.param(0).unwrap_or_default();
    let target = msg.param(1).unwrap_or_default();
    let Some(chan) = session.dir.channel(target) else {
        session.reply(irc::ERR_NOSUCHCHANNEL, &[target, "No such channel"]);
        return;
    };
    let name = chan.name().to_string();
    if !chan.is_status() {
        session.reply(irc::ERR_CHANOPRIVSNEEDED, &[&name, "Invite buddies to the status channel"]);
        return;
    }
    let Some((buddy, account)) = who.rsplit_once(':').filter(|(b, a)| !b.is_empty() && !a.is_empty())
    else {
        session.reply(irc::ERR_NOSUCHNICK, &[who, "Use buddy:account"]);
        return;
    };
    match session.backend.add_buddy(account, buddy) {
        Ok(()) => session.reply(irc::RPL_INVITING, &[who, &name]),
        Err(BackendError::UnknownAccount(_)) => {
            session.reply(irc::ERR_NOSUCHSERVER, &[account, "No such server"]);
        }
        Err(e) => session.server_notice(&format!("Unable to add {buddy}: {e}")),
    }
}

/// KICK channel nick [reason]
///
/// Only remote-backed nicks can be kicked; the buddy is also dropped from
/// the account's list.
pub(super) fn handle_kick(session: &mut Session, msg: &Message) {
    let target = msg.param(0).unwrap_or_default();
    let who = msg.param(1).unwrap_or_default();
    let reason = msg.param(2).unwrap_or(who);

    let Some(chan) = session.dir.channel(target) else {
        session.reply(irc::ERR_NOSUCHCHANNEL, &[target, "No such channel"]);
        return;
    };
    let name = chan.name().to_string();
    let Some(id) = session.dir.find_nick(who) else {
        session.reply(irc::ERR_NOSUCHNICK, &[who, "No such nick/channel"]);
        return;
    };
    let Some(handle) = session.dir.nick(id).and_then(|n| n.buddy()).cloned() else {
        session.reply(irc::ERR_NOPRIVILEGES, &["Permission Denied- only buddies can be kicked"]);
        return;
    };
    let on_channel = session.dir.channel(&name).is_some_and(|c| c.has_member(id));
    if !on_channel {
        session.reply(irc::ERR_USERNOTINCHANNEL, &[who, &name, "They aren't on that channel"]);
        return;
    }

    let nick = session.dir.nick_name(id).unwrap_or(who).to_string();
    let kick = Message::new("KICK")
        .with_prefix(session.user_mask())
        .to(name.clone())
        .arg(nick)
        .trailing_arg(reason);
    session.broadcast(&name, &kick, None);
    if let Err(e) = session.dir.part(&name, id) {
        tracing::debug!(session_id = %session.id, "Kick part failed: {e}");
    }
    if let Err(e) = session.backend.remove_buddy(&handle.account, &handle.buddy) {
        session.server_notice(&format!("Unable to remove {}: {e}", handle.buddy));
    }
    session.forget_if_unseated(id);
}
