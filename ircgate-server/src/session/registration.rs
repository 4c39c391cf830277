//! Registration: PASS/NICK/USER until the identity is complete, then the
//! welcome burst. Also QUIT and the PING/PONG pair.

use crate::backend::AccountState;
use crate::directory::nick::is_valid_nickname;
use crate::directory::{ChanStatus, NickFlags};
use crate::error::{DirectoryError, SessionError};
use crate::irc::{self, Message};

use super::channel::join_channel;
use super::queries::send_motd;
use super::{MIN_PASSWORD_LEN, Session};

/// PASS password
pub(super) fn handle_pass(session: &mut Session, msg: &Message) {
    if session.is_registered() {
        session.reply(irc::ERR_ALREADYREGISTRED, &["You may not reregister"]);
        return;
    }
    let password = msg.param(0).unwrap_or_default();
    // Can never become valid, so no point in keeping the connection.
    if password.len() < MIN_PASSWORD_LEN || password.contains(' ') {
        session.fail(SessionError::WeakPassword(MIN_PASSWORD_LEN));
        return;
    }
    session.password = Some(password.to_string());
    try_complete_registration(session);
}

/// NICK nickname
pub(super) fn handle_nick(session: &mut Session, msg: &Message) {
    let Some(nick) = msg.param(0).filter(|n| !n.is_empty()) else {
        session.reply(irc::ERR_NONICKNAMEGIVEN, &["No nickname given"]);
        return;
    };
    if session.is_registered() {
        session.reply(irc::ERR_NONICKCHANGE, &["Can't change nickname while registered"]);
        return;
    }
    if !is_valid_nickname(nick) {
        session.reply(irc::ERR_ERRONEUSNICKNAME, &[nick, "Erroneous nickname"]);
        return;
    }
    let me = session.user;
    match session.dir.rename_nick(me, nick) {
        Ok(_) => {}
        Err(DirectoryError::NickInUse(_)) => {
            session.reply(irc::ERR_NICKNAMEINUSE, &[nick, "Nickname is already in use"]);
            return;
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id, "Rename failed: {e}");
            return;
        }
    }
    try_complete_registration(session);
}

/// USER ident mode unused :realname
pub(super) fn handle_user(session: &mut Session, msg: &Message) {
    if session.is_registered() {
        session.reply(irc::ERR_ALREADYREGISTRED, &["Please register only once per session"]);
        return;
    }
    let ident = msg.param(0).unwrap_or_default().to_string();
    let realname = msg.param(3).unwrap_or_default().to_string();
    if let Some(user) = session.dir.nick_mut(session.user) {
        user.ident = ident;
        user.realname = realname;
    }
    try_complete_registration(session);
}

/// QUIT [reason]
pub(super) fn handle_quit(session: &mut Session, msg: &Message) {
    let reason = msg.param(0).unwrap_or("Leaving...").to_string();
    session.quit(&reason);
}

/// PING token
pub(super) fn handle_ping(session: &mut Session, msg: &Message) {
    let token = msg.param(0).unwrap_or_default();
    let pong = Message::new("PONG")
        .with_prefix(session.server_name.clone())
        .arg(session.server_name.clone())
        .trailing_arg(token);
    session.send(&pong);
}

/// Liveness is refreshed for every inbound line; nothing left to do.
pub(super) fn handle_pong(_session: &mut Session, _msg: &Message) {}

/// Finish registration once nickname, identity and password are all known.
/// The password is checked against the backend's stored one; a first-time
/// identity adopts it, provided it passes the server password gate.
pub(super) fn try_complete_registration(session: &mut Session) {
    if session.closed || session.is_registered() {
        return;
    }
    let Some(user) = session.user_nick() else {
        return;
    };
    let nick = user.name().to_string();
    if nick == "*" || user.ident.is_empty() {
        return;
    }
    let Some(password) = session.password.clone() else {
        return;
    };

    if let Err(e) = session.backend.load_identity(&nick) {
        session.fail(SessionError::Backend(e));
        return;
    }
    match session.backend.stored_password(&nick) {
        Some(stored) if stored == password => {}
        Some(_) => {
            session.fail(SessionError::IncorrectPassword);
            return;
        }
        None => {
            let gate_ok = session
                .config
                .server_password
                .as_deref()
                .is_none_or(|gate| gate == password);
            if !gate_ok {
                session.fail(SessionError::IncorrectPassword);
                return;
            }
            if let Err(e) = session.backend.set_password(&nick, &password) {
                session.fail(SessionError::Backend(e));
                return;
            }
            tracing::info!(session_id = %session.id, %nick, "Created new identity");
        }
    }

    if let Some(user) = session.dir.nick_mut(session.user) {
        user.set_flag(NickFlags::REGISTERED);
    }
    tracing::info!(session_id = %session.id, %nick, "Client registered");

    send_welcome(session, &nick);
    send_motd(session);

    let status = session.status_channel.clone();
    let me = session.user;
    join_channel(session, &status, me, ChanStatus::OP);

    connect_accounts(session);
}

fn send_welcome(session: &mut Session, nick: &str) {
    let server = session.server_name.clone();
    let version = env!("CARGO_PKG_VERSION");
    let created = session.config.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let welcome = format!("Welcome to the {server} IRC gateway, {nick}!");
    let yourhost = format!("Your host is {server}, running ircgate {version}");
    let created = format!("This server was created {created}");
    let daemon = format!("ircgate-{version}");

    session.reply(irc::RPL_WELCOME, &[&welcome]);
    session.reply(irc::RPL_YOURHOST, &[&yourhost]);
    session.reply(irc::RPL_CREATED, &[&created]);
    session.reply(irc::RPL_MYINFO, &[&server, &daemon, "o", "ov"]);
}

/// Bring every idle account online after registration.
fn connect_accounts(session: &mut Session) {
    for account in session.backend.accounts() {
        if account.state != AccountState::Disconnected {
            continue;
        }
        tracing::debug!(session_id = %session.id, account = %account.id, "Connecting account");
        if let Err(e) = session.backend.connect(&account.id) {
            session.status_notice(&format!("{}: unable to connect: {e}", account.id));
        }
    }
}
