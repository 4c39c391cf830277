//! Command dispatch table.

use crate::irc::{self, Message};

use super::{Session, admin, channel, messaging, queries, registration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Requirement {
    None,
    Registered,
    Operator,
}

pub(super) struct Command {
    pub name: &'static str,
    pub handler: fn(&mut Session, &Message),
    pub min_args: usize,
    pub requires: Requirement,
}

const fn cmd(
    name: &'static str,
    handler: fn(&mut Session, &Message),
    min_args: usize,
    requires: Requirement,
) -> Command {
    Command {
        name,
        handler,
        min_args,
        requires,
    }
}

use Requirement::{None as Anyone, Operator, Registered};

pub(super) static COMMANDS: &[Command] = &[
    cmd("PASS", registration::handle_pass, 1, Anyone),
    cmd("NICK", registration::handle_nick, 0, Anyone),
    cmd("USER", registration::handle_user, 4, Anyone),
    cmd("QUIT", registration::handle_quit, 0, Anyone),
    cmd("PING", registration::handle_ping, 1, Anyone),
    cmd("PONG", registration::handle_pong, 0, Anyone),
    cmd("PRIVMSG", messaging::handle_privmsg, 2, Registered),
    cmd("NOTICE", messaging::handle_notice, 2, Registered),
    cmd("JOIN", channel::handle_join, 1, Registered),
    cmd("PART", channel::handle_part, 1, Registered),
    cmd("NAMES", channel::handle_names, 0, Registered),
    cmd("LIST", channel::handle_list, 0, Registered),
    cmd("TOPIC", channel::handle_topic, 1, Registered),
    cmd("MODE", channel::handle_mode, 1, Registered),
    cmd("INVITE", channel::handle_invite, 2, Registered),
    cmd("WHO", queries::handle_who, 0, Registered),
    cmd("WHOIS", queries::handle_whois, 1, Registered),
    cmd("WHOWAS", queries::handle_whowas, 1, Registered),
    cmd("AWAY", queries::handle_away, 0, Registered),
    cmd("ISON", queries::handle_ison, 1, Registered),
    cmd("MOTD", queries::handle_motd, 0, Registered),
    cmd("VERSION", queries::handle_version, 0, Registered),
    cmd("ADMIN", queries::handle_admin, 0, Registered),
    cmd("STATS", queries::handle_stats, 0, Registered),
    cmd("OPER", admin::handle_oper, 2, Registered),
    cmd("KICK", channel::handle_kick, 2, Registered),
    cmd("KILL", admin::handle_kill, 1, Registered),
    cmd("SVSNICK", admin::handle_svsnick, 2, Registered),
    cmd("CONNECT", admin::handle_connect, 0, Registered),
    cmd("SQUIT", admin::handle_squit, 1, Registered),
    cmd("REHASH", admin::handle_rehash, 0, Operator),
    cmd("DIE", admin::handle_die, 0, Operator),
    cmd("WALLOPS", admin::handle_wallops, 1, Operator),
];

pub(super) fn lookup(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name == name)
}

/// Every command the engine understands, in table order.
pub fn command_names() -> impl Iterator<Item = &'static str> {
    COMMANDS.iter().map(|c| c.name)
}

impl Session {
    /// Resolve, validate and run one command. Argument count is checked
    /// before capabilities; usage is counted only for authorized calls.
    pub(super) fn dispatch(&mut self, msg: &Message) {
        let Some(command) = lookup(&msg.command) else {
            self.reply(irc::ERR_UNKNOWNCOMMAND, &[msg.command.as_str(), "Unknown command"]);
            return;
        };
        if msg.arg_count() < command.min_args {
            self.reply(irc::ERR_NEEDMOREPARAMS, &[command.name, "Not enough parameters"]);
            return;
        }
        match command.requires {
            Requirement::None => {}
            Requirement::Registered | Requirement::Operator if !self.is_registered() => {
                self.reply(irc::ERR_NOTREGISTERED, &["You have not registered"]);
                return;
            }
            Requirement::Operator if !self.is_operator() => {
                self.reply(
                    irc::ERR_NOPRIVILEGES,
                    &["Permission Denied- You're not an IRC operator"],
                );
                return;
            }
            Requirement::Registered | Requirement::Operator => {}
        }

        *self.usage.entry(command.name).or_default() += 1;
        tracing::trace!(session_id = %self.id, command = command.name, "Dispatching");
        (command.handler)(self, msg);
    }
}
