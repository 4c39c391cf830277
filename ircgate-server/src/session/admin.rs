//! Operator and account-control commands: OPER, KILL, SVSNICK, CONNECT,
//! SQUIT, REHASH, DIE, WALLOPS.

use crate::backend::AccountState;
use crate::directory::NickFlags;
use crate::directory::nick::is_valid_nickname;
use crate::error::DirectoryError;
use crate::irc::{self, Message};
use crate::listener::Forward;

use super::Session;

/// OPER name password
pub(super) fn handle_oper(session: &mut Session, msg: &Message) {
    let name = msg.param(0).unwrap_or_default();
    let password = msg.param(1).unwrap_or_default();
    let granted = session
        .config
        .opers
        .iter()
        .any(|o| o.name == name && o.password == password);
    if !granted {
        tracing::warn!(session_id = %session.id, oper = name, "Failed OPER attempt");
        session.reply(irc::ERR_PASSWDMISMATCH, &["Password incorrect"]);
        return;
    }

    let me = session.user;
    if let Some(user) = session.dir.nick_mut(me) {
        user.set_flag(NickFlags::OPERATOR);
    }
    tracing::info!(session_id = %session.id, oper = name, "Operator privileges granted");
    session.reply(irc::RPL_YOUREOPER, &["You are now an IRC operator"]);
    let change = Message::new("MODE")
        .with_prefix(session.user_mask())
        .to(session.user_name())
        .trailing_arg("+o");
    session.send(&change);
}

/// KILL nick [reason]
///
/// Removes a buddy from its account's list.
pub(super) fn handle_kill(session: &mut Session, msg: &Message) {
    let target = msg.param(0).unwrap_or_default();
    let Some(id) = session.dir.find_nick(target) else {
        session.reply(irc::ERR_NOSUCHNICK, &[target, "No such nick/channel"]);
        return;
    };
    let Some(handle) = session.dir.nick(id).and_then(|n| n.buddy()).cloned() else {
        session.reply(irc::ERR_NOPRIVILEGES, &["Permission Denied- You can't kill this nick"]);
        return;
    };
    let reason = msg.param(1).unwrap_or_default();

    if let Err(e) = session.backend.remove_buddy(&handle.account, &handle.buddy) {
        session.server_notice(&format!("Unable to remove {target}: {e}"));
        return;
    }
    let by = format!("Killed by {} ({reason})", session.user_name());
    tracing::info!(session_id = %session.id, account = %handle.account, buddy = %handle.buddy, "Buddy removed");
    session.remove_nick(id, &by);
}

/// SVSNICK nick newnick
///
/// Renames a buddy locally and stores the new name as its alias.
pub(super) fn handle_svsnick(session: &mut Session, msg: &Message) {
    let target = msg.param(0).unwrap_or_default();
    let new_name = msg.param(1).unwrap_or_default();
    let Some(id) = session.dir.find_nick(target) else {
        session.reply(irc::ERR_NOSUCHNICK, &[target, "No such nick/channel"]);
        return;
    };
    let Some(nick) = session.dir.nick(id) else {
        return;
    };
    let Some(handle) = nick.buddy().cloned() else {
        session.reply(irc::ERR_NOPRIVILEGES, &["Permission Denied- You can't rename this nick"]);
        return;
    };
    let old_mask = nick.hostmask();
    if !is_valid_nickname(new_name) {
        session.reply(irc::ERR_ERRONEUSNICKNAME, &[new_name, "Erroneous nickname"]);
        return;
    }

    match session.dir.rename_nick(id, new_name) {
        Ok(_) => {}
        Err(DirectoryError::NickInUse(_)) => {
            session.reply(irc::ERR_NICKNAMEINUSE, &[new_name, "Nickname is already in use"]);
            return;
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id, "Rename failed: {e}");
            return;
        }
    }
    if let Err(e) = session.backend.alias_buddy(&handle.account, &handle.buddy, new_name) {
        session.server_notice(&format!("Unable to store alias for {}: {e}", handle.buddy));
    }
    let change = Message::new("NICK")
        .with_prefix(old_mask)
        .trailing_arg(new_name);
    session.send(&change);
}

/// CONNECT [account]
pub(super) fn handle_connect(session: &mut Session, msg: &Message) {
    let accounts = session.backend.accounts();
    let wanted: Vec<String> = match msg.param(0) {
        Some(id) => {
            if !accounts.iter().any(|a| a.id == id) {
                session.reply(irc::ERR_NOSUCHSERVER, &[id, "No such server"]);
                return;
            }
            vec![id.to_string()]
        }
        None => accounts
            .iter()
            .filter(|a| a.state == AccountState::Disconnected)
            .map(|a| a.id.clone())
            .collect(),
    };
    for account in wanted {
        if let Err(e) = session.backend.connect(&account) {
            session.status_notice(&format!("{account}: unable to connect: {e}"));
        }
    }
}

/// SQUIT account [reason]
pub(super) fn handle_squit(session: &mut Session, msg: &Message) {
    let account = msg.param(0).unwrap_or_default();
    if session.backend.account_state(account).is_none() {
        session.reply(irc::ERR_NOSUCHSERVER, &[account, "No such server"]);
        return;
    }
    if let Err(e) = session.backend.disconnect(account) {
        session.status_notice(&format!("{account}: unable to disconnect: {e}"));
    }
}

/// REHASH
pub(super) fn handle_rehash(session: &mut Session, _msg: &Message) {
    session.reply(irc::RPL_REHASHING, &["config", "Rehashing"]);
    match session.listener.clone() {
        Some(listener) => listener.rehash(),
        None => session.server_notice("Nothing to reload configuration from"),
    }
}

/// DIE
///
/// Asks the listener to stop the whole server. Without one, only this
/// session goes away.
pub(super) fn handle_die(session: &mut Session, _msg: &Message) {
    let sender = session.user_name();
    tracing::warn!(session_id = %session.id, %sender, "Shutdown requested");
    let accepted = session
        .listener
        .clone()
        .is_some_and(|l| l.forward(&session.id, Forward::Die { sender: sender.clone() }));
    if !accepted {
        session.quit(&format!("Shutdown requested by {sender}"));
    }
}

/// WALLOPS :text
pub(super) fn handle_wallops(session: &mut Session, msg: &Message) {
    let text = msg.param(0).unwrap_or_default();
    let sender = session.user_mask();
    session.wallops(&sender, text);
    if let Some(listener) = session.listener.clone() {
        listener.forward(
            &session.id,
            Forward::Wallops {
                sender,
                text: text.to_string(),
            },
        );
    }
}

impl Session {
    /// Show a WALLOPS line, local or relayed from another session.
    pub fn wallops(&mut self, from: &str, text: &str) {
        let msg = Message::new("WALLOPS").with_prefix(from).trailing_arg(text);
        self.send(&msg);
    }
}
