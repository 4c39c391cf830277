//! Directory and server queries: WHO, WHOIS, WHOWAS, AWAY, ISON, MOTD,
//! VERSION, ADMIN, STATS.

use crate::directory::{Channel, Nick, NickFlags, NickId, irc_lower};
use crate::irc::{self, Message};

use super::commands::COMMANDS;
use super::{PendingWhois, Session};

pub(super) fn send_motd(session: &mut Session) {
    let Some(motd) = session.config.motd.clone() else {
        session.reply(irc::ERR_NOMOTD, &["MOTD File is missing"]);
        return;
    };
    let start = format!("- {} Message of the day -", session.server_name);
    session.reply(irc::RPL_MOTDSTART, &[&start]);
    for line in motd.lines() {
        session.reply(irc::RPL_MOTD, &[&format!("- {line}")]);
    }
    session.reply(irc::RPL_ENDOFMOTD, &["End of /MOTD command"]);
}

/// `H`/`G`, then `*` for operators, then the channel prefix.
fn who_flags(nick: &Nick, prefix: &str) -> String {
    let mut flags = String::from(if nick.is_away() { "G" } else { "H" });
    if nick.has_flag(NickFlags::OPERATOR) {
        flags.push('*');
    }
    flags.push_str(prefix);
    flags
}

/// WHO [mask]
///
/// The mask is a channel name, a nickname, or a substring of a server name.
pub(super) fn handle_who(session: &mut Session, msg: &Message) {
    let mask = msg.param(0).unwrap_or("*").to_string();
    let rows: Vec<[String; 7]> = if Channel::is_channel_name(&mask) {
        match session.dir.channel(&mask) {
            Some(chan) => chan
                .members()
                .iter()
                .filter_map(|m| {
                    let nick = session.dir.nick(m.nick)?;
                    Some(who_row(session, nick, chan.name(), m.status.prefix()))
                })
                .collect(),
            None => Vec::new(),
        }
    } else {
        let lowered = irc_lower(&mask);
        session
            .dir
            .nicks()
            .filter(|n| {
                mask == "*" || irc_lower(n.name()) == lowered || n.server.contains(mask.as_str())
            })
            .map(|n| who_row(session, n, "*", ""))
            .collect()
    };

    for row in rows {
        let fields: Vec<&str> = row.iter().map(String::as_str).collect();
        session.reply(irc::RPL_WHOREPLY, &fields);
    }
    session.reply(irc::RPL_ENDOFWHO, &[&mask, "End of WHO list"]);
}

fn who_row(session: &Session, nick: &Nick, channel: &str, prefix: &str) -> [String; 7] {
    [
        channel.to_string(),
        nick.ident.clone(),
        nick.host.clone(),
        nick.server.clone(),
        nick.name().to_string(),
        who_flags(nick, prefix),
        format!("{} {}", hops(session, nick), nick.realname),
    ]
}

fn hops(session: &Session, nick: &Nick) -> u8 {
    u8::from(nick.server != session.server_name)
}

/// WHOIS [server] nick
///
/// For buddies the backend may look up extra details; the end reply then
/// waits for them.
pub(super) fn handle_whois(session: &mut Session, msg: &Message) {
    let target = msg.params.last().map(String::as_str).unwrap_or_default();
    let Some(id) = session.dir.find_nick(target) else {
        session.reply(irc::ERR_NOSUCHNICK, &[target, "No such nick/channel"]);
        session.reply(irc::RPL_ENDOFWHOIS, &[target, "End of /WHOIS list"]);
        return;
    };
    let Some(nick) = session.dir.nick(id) else {
        return;
    };
    let name = nick.name().to_string();
    let ident = nick.ident.clone();
    let host = nick.host.clone();
    let realname = nick.realname.clone();
    let server = nick.server.clone();
    let away = nick.away.clone().filter(|_| nick.is_away());
    let oper = nick.has_flag(NickFlags::OPERATOR);
    let handle = nick.buddy().cloned();
    let channels = whois_channels(session, id);
    let server_info = session
        .dir
        .server(&server)
        .map(|s| s.info.clone())
        .unwrap_or_default();

    session.reply(irc::RPL_WHOISUSER, &[&name, &ident, &host, "*", &realname]);
    if !channels.is_empty() {
        session.reply(irc::RPL_WHOISCHANNELS, &[&name, &channels]);
    }
    session.reply(irc::RPL_WHOISSERVER, &[&name, &server, &server_info]);
    if let Some(away) = away {
        session.reply(irc::RPL_AWAY, &[&name, &away]);
    }
    if oper {
        session.reply(irc::RPL_WHOISOPERATOR, &[&name, "is an IRC operator"]);
    }

    if let Some(handle) = handle {
        if session.backend.fetch_info(&handle.account, &handle.buddy) {
            tracing::debug!(session_id = %session.id, nick = %name, "WHOIS waiting for backend");
            session.pending_whois.push(PendingWhois { handle, nick: name });
            return;
        }
    }
    session.reply(irc::RPL_ENDOFWHOIS, &[&name, "End of /WHOIS list"]);
}

fn whois_channels(session: &Session, id: NickId) -> String {
    let Some(nick) = session.dir.nick(id) else {
        return String::new();
    };
    nick.channels()
        .iter()
        .filter_map(|key| session.dir.channel(key))
        .filter_map(|chan| {
            let member = chan.member(id)?;
            Some(format!("{}{}", member.status.prefix(), chan.name()))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Complete WHOIS replies that waited for `lines` about a buddy.
pub(super) fn finish_whois(session: &mut Session, account: &str, buddy: &str, lines: &[String]) {
    let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut session.pending_whois)
        .into_iter()
        .partition(|p| p.handle.account == account && p.handle.buddy == buddy);
    session.pending_whois = waiting;
    for pending in done {
        for line in lines {
            session.reply(irc::RPL_WHOISSPECIAL, &[&pending.nick, line]);
        }
        session.reply(irc::RPL_ENDOFWHOIS, &[&pending.nick, "End of /WHOIS list"]);
    }
}

/// WHOWAS nick
pub(super) fn handle_whowas(session: &mut Session, msg: &Message) {
    let target = msg.param(0).unwrap_or_default();
    let entries: Vec<[String; 4]> = session
        .dir
        .whowas(target)
        .into_iter()
        .map(|e| [e.name.clone(), e.ident.clone(), e.host.clone(), e.realname.clone()])
        .collect();
    if entries.is_empty() {
        session.reply(irc::ERR_WASNOSUCHNICK, &[target, "There was no such nickname"]);
    }
    for [name, ident, host, realname] in entries {
        session.reply(irc::RPL_WHOWASUSER, &[&name, &ident, &host, "*", &realname]);
    }
    session.reply(irc::RPL_ENDOFWHOWAS, &[target, "End of WHOWAS"]);
}

/// AWAY [message]
pub(super) fn handle_away(session: &mut Session, msg: &Message) {
    let message = msg.param(0).filter(|m| !m.is_empty()).map(str::to_string);
    let me = session.user;
    if let Some(user) = session.dir.nick_mut(me) {
        user.set_away(message.clone());
    }
    session.backend.set_status_message(message.as_deref());
    match message {
        Some(_) => session.reply(irc::RPL_NOWAWAY, &["You have been marked as being away"]),
        None => session.reply(irc::RPL_UNAWAY, &["You are no longer marked as being away"]),
    }
}

/// ISON nick [nick...]
pub(super) fn handle_ison(session: &mut Session, msg: &Message) {
    let present: Vec<String> = msg
        .params
        .iter()
        .flat_map(|p| p.split_whitespace())
        .filter_map(|n| session.dir.nick_by_name(n))
        .map(|n| n.name().to_string())
        .collect();
    session.reply(irc::RPL_ISON, &[&present.join(" ")]);
}

/// MOTD
pub(super) fn handle_motd(session: &mut Session, _msg: &Message) {
    send_motd(session);
}

/// VERSION
pub(super) fn handle_version(session: &mut Session, _msg: &Message) {
    let version = format!("ircgate-{}", env!("CARGO_PKG_VERSION"));
    let server = session.server_name.clone();
    session.reply(irc::RPL_VERSION, &[&version, &server, "IRC gateway to instant messaging"]);
}

/// ADMIN
pub(super) fn handle_admin(session: &mut Session, _msg: &Message) {
    let settings = session.config.settings.clone();
    let server = session.server_name.clone();
    let name = settings.get_or("admin/name", "Unknown administrator");
    let location = settings.get_or("admin/location", "Unknown location");
    let email = settings.get_or("admin/email", "Unknown email");
    session.reply(irc::RPL_ADMINME, &[&server, "Administrative info"]);
    session.reply(irc::RPL_ADMINLOC1, &[&name]);
    session.reply(irc::RPL_ADMINLOC2, &[&location]);
    session.reply(irc::RPL_ADMINEMAIL, &[&email]);
}

/// STATS [letter]
///
/// `m`: usage counters of the commands used so far. `o`: operator names.
pub(super) fn handle_stats(session: &mut Session, msg: &Message) {
    let letter = msg
        .param(0)
        .and_then(|p| p.chars().next())
        .unwrap_or('*');
    match letter {
        'm' => {
            let used: Vec<(&str, String)> = COMMANDS
                .iter()
                .filter_map(|c| {
                    let count = session.usage(c.name);
                    (count > 0).then(|| (c.name, count.to_string()))
                })
                .collect();
            for (name, count) in used {
                session.reply(irc::RPL_STATSCOMMANDS, &[name, &count]);
            }
        }
        'o' => {
            let opers: Vec<String> = session.config.opers.iter().map(|o| o.name.clone()).collect();
            for name in opers {
                session.reply(irc::RPL_STATSOLINE, &["O", "*", "*", &name]);
            }
        }
        _ => {}
    }
    let letter = letter.to_string();
    session.reply(irc::RPL_ENDOFSTATS, &[&letter, "End of /STATS report"]);
}
