//! PRIVMSG and NOTICE relay, plus DCC offers the client makes to buddies.

use crate::dcc::DccOffer;
use crate::directory::{BuddyHandle, Channel, ChannelKind, NickId};
use crate::irc::{self, Message};

use super::Session;

/// PRIVMSG target{,target} :text
pub(super) fn handle_privmsg(session: &mut Session, msg: &Message) {
    relay(session, msg, "PRIVMSG");
}

/// NOTICE target{,target} :text
pub(super) fn handle_notice(session: &mut Session, msg: &Message) {
    relay(session, msg, "NOTICE");
}

/// Relay to each target in turn. The first target that does not resolve
/// ends the whole list.
fn relay(session: &mut Session, msg: &Message, command: &str) {
    let targets = msg.param(0).unwrap_or_default();
    let text = msg.param(1).unwrap_or_default();
    let mask = session.user_mask();

    for target in targets.split(',').filter(|t| !t.is_empty()) {
        let resolved = if Channel::is_channel_name(target) {
            to_channel(session, command, &mask, target, text)
        } else {
            to_nick(session, command, &mask, target, text)
        };
        if !resolved {
            break;
        }
    }
}

fn to_channel(session: &mut Session, command: &str, mask: &str, target: &str, text: &str) -> bool {
    let me = session.user;
    let Some(chan) = session.dir.channel(target) else {
        session.reply(irc::ERR_NOSUCHCHANNEL, &[target, "No such channel"]);
        return false;
    };
    let name = chan.name().to_string();
    let kind = chan.kind().clone();

    if let ChannelKind::Conversation { account, conversation } = kind {
        if let Err(e) = session.backend.send_chat(&account, &conversation, text) {
            let reason = format!("Cannot send to channel: {e}");
            session.reply(irc::ERR_CANNOTSENDTOCHAN, &[&name, &reason]);
            return true;
        }
    }

    let relayed = Message::new(command)
        .with_prefix(mask)
        .to(name.clone())
        .trailing_arg(text);
    session.broadcast(&name, &relayed, Some(me));
    true
}

fn to_nick(session: &mut Session, command: &str, mask: &str, target: &str, text: &str) -> bool {
    let Some(id) = session.dir.find_nick(target) else {
        session.reply(irc::ERR_NOSUCHNICK, &[target, "No such nick/channel"]);
        return false;
    };
    let Some(nick) = session.dir.nick(id) else {
        return false;
    };
    let name = nick.name().to_string();
    let away = nick.away.clone().filter(|_| nick.is_away());
    let buddy = nick.buddy().cloned();

    if command == "PRIVMSG" {
        if let (Some(handle), Some(body)) = (buddy.as_ref(), irc::parse_ctcp(text)) {
            if body.starts_with("DCC SEND ") {
                offer_file(session, id, &name, handle, body);
                return true;
            }
        }
    }

    let relayed = Message::new(command)
        .with_prefix(mask)
        .to(name.clone())
        .trailing_arg(text);
    session.deliver_to(id, &relayed);
    // No automatic reply to a NOTICE.
    if let (Some(away), "PRIVMSG") = (away, command) {
        session.reply(irc::RPL_AWAY, &[&name, &away]);
    }
    true
}

/// The client offers a file to a buddy: the backend fetches it from the
/// client and passes it on.
fn offer_file(session: &mut Session, peer: NickId, name: &str, handle: &BuddyHandle, ctcp: &str) {
    let Some(offer) = DccOffer::parse(ctcp) else {
        session.server_notice(&format!("Ignoring malformed DCC offer to {name}"));
        return;
    };
    match session.backend.accept_file(&handle.account, &handle.buddy, &offer) {
        Ok(id) => {
            let session_id = session.id.clone();
            let buddy = handle.buddy.clone();
            session.create_dcc_get(
                &id,
                peer,
                &offer.filename,
                offer.size,
                Some(offer.addr),
                Box::new(move |transfer| {
                    tracing::info!(
                        %session_id,
                        %buddy,
                        file = %transfer.filename,
                        bytes = transfer.transferred,
                        "File delivered"
                    );
                }),
            );
            session.server_notice(&format!("Sending {} to {name}", offer.filename));
        }
        Err(e) => {
            session.server_notice(&format!("Unable to send {} to {name}: {e}", offer.filename));
        }
    }
}
