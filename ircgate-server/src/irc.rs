//! IRC line grammar and numeric reply catalog.
//!
//! Wire form:
//!   [`:`prefix SPACE] command [SPACE receiver] [SPACE params] [SPACE `:` trailing]
//!
//! The engine builds outbound messages with a sender prefix and an explicit
//! receiver; inbound messages only carry a prefix, a command and an ordered
//! parameter list. No argument-count or permission checks happen here.

use std::fmt;

// ── Numeric replies ─────────────────────────────────────────────────

pub const RPL_WELCOME: &str = "001";
pub const RPL_YOURHOST: &str = "002";
pub const RPL_CREATED: &str = "003";
pub const RPL_MYINFO: &str = "004";
pub const RPL_STATSCOMMANDS: &str = "212";
pub const RPL_ENDOFSTATS: &str = "219";
pub const RPL_UMODEIS: &str = "221";
pub const RPL_STATSOLINE: &str = "243";
pub const RPL_ADMINME: &str = "256";
pub const RPL_ADMINLOC1: &str = "257";
pub const RPL_ADMINLOC2: &str = "258";
pub const RPL_ADMINEMAIL: &str = "259";
pub const RPL_AWAY: &str = "301";
pub const RPL_ISON: &str = "303";
pub const RPL_UNAWAY: &str = "305";
pub const RPL_NOWAWAY: &str = "306";
pub const RPL_WHOISUSER: &str = "311";
pub const RPL_WHOISSERVER: &str = "312";
pub const RPL_WHOISOPERATOR: &str = "313";
pub const RPL_WHOWASUSER: &str = "314";
pub const RPL_ENDOFWHO: &str = "315";
pub const RPL_ENDOFWHOIS: &str = "318";
pub const RPL_WHOISCHANNELS: &str = "319";
pub const RPL_WHOISSPECIAL: &str = "320";
pub const RPL_LIST: &str = "322";
pub const RPL_LISTEND: &str = "323";
pub const RPL_CHANNELMODEIS: &str = "324";
pub const RPL_CREATIONTIME: &str = "329";
pub const RPL_NOTOPIC: &str = "331";
pub const RPL_TOPIC: &str = "332";
pub const RPL_INVITING: &str = "341";
pub const RPL_VERSION: &str = "351";
pub const RPL_WHOREPLY: &str = "352";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";
pub const RPL_ENDOFBANLIST: &str = "368";
pub const RPL_ENDOFWHOWAS: &str = "369";
pub const RPL_MOTD: &str = "372";
pub const RPL_MOTDSTART: &str = "375";
pub const RPL_ENDOFMOTD: &str = "376";
pub const RPL_YOUREOPER: &str = "381";
pub const RPL_REHASHING: &str = "382";

pub const ERR_NOSUCHNICK: &str = "401";
pub const ERR_NOSUCHSERVER: &str = "402";
pub const ERR_NOSUCHCHANNEL: &str = "403";
pub const ERR_CANNOTSENDTOCHAN: &str = "404";
pub const ERR_WASNOSUCHNICK: &str = "406";
pub const ERR_INPUTTOOLONG: &str = "417";
pub const ERR_UNKNOWNCOMMAND: &str = "421";
pub const ERR_NOMOTD: &str = "422";
pub const ERR_NONICKNAMEGIVEN: &str = "431";
pub const ERR_ERRONEUSNICKNAME: &str = "432";
pub const ERR_NICKNAMEINUSE: &str = "433";
pub const ERR_USERNOTINCHANNEL: &str = "441";
pub const ERR_NOTONCHANNEL: &str = "442";
pub const ERR_NONICKCHANGE: &str = "447";
pub const ERR_NOTREGISTERED: &str = "451";
pub const ERR_NEEDMOREPARAMS: &str = "461";
pub const ERR_ALREADYREGISTRED: &str = "462";
pub const ERR_PASSWDMISMATCH: &str = "464";
pub const ERR_UNKNOWNMODE: &str = "472";
pub const ERR_NOPRIVILEGES: &str = "481";
pub const ERR_CHANOPRIVSNEEDED: &str = "482";
pub const ERR_UMODEUNKNOWNFLAG: &str = "501";
pub const ERR_USERSDONTMATCH: &str = "502";

// ── Message ─────────────────────────────────────────────────────────

/// A single protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Origin (`nick!ident@host` or a server name).
    pub prefix: Option<String>,
    pub command: String,
    /// Addressee rendered right after the command (nick, channel or raw name).
    pub receiver: Option<String>,
    /// Ordered arguments. Order is significant and kept verbatim on relay.
    pub params: Vec<String>,
    /// The last parameter was (or must be) introduced by `:`.
    pub trailing: bool,
}

/// Errors that can occur while parsing a line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Build a reply originating from `server` with the given parameters.
    /// The first parameter conventionally names the client.
    pub fn from_server(server: &str, command: &str, params: Vec<&str>) -> Self {
        Self {
            prefix: Some(server.to_string()),
            command: command.to_string(),
            receiver: None,
            params: params.into_iter().map(str::to_string).collect(),
            trailing: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn to(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.params.push(arg.into());
        self
    }

    /// Append the final argument and mark it trailing.
    pub fn trailing_arg(mut self, arg: impl Into<String>) -> Self {
        self.params.push(arg.into());
        self.trailing = true;
        self
    }

    pub fn arg_count(&self) -> usize {
        self.params.len()
    }

    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// Parse one line. A trailing `\r\n` or `\n` is ignored.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']);
        let input = input.trim_start_matches(' ');
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = match input.strip_prefix(':') {
            Some(stripped) => match stripped.find(' ') {
                Some(idx) => (
                    Some(stripped[..idx].to_owned()),
                    stripped[idx + 1..].trim_start_matches(' '),
                ),
                None => return Err(ParseError::MissingCommand),
            },
            None => (None, input),
        };

        let (command, mut remaining) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        let mut trailing = false;
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(last) = remaining.strip_prefix(':') {
                params.push(last.to_owned());
                trailing = true;
                break;
            }
            match remaining.find(' ') {
                Some(idx) => {
                    params.push(remaining[..idx].to_owned());
                    remaining = &remaining[idx + 1..];
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_ascii_uppercase(),
            receiver: None,
            params,
            trailing,
        })
    }

    /// Serialize without the line terminator.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(&self.command);
        if let Some(ref receiver) = self.receiver {
            out.push(' ');
            out.push_str(receiver);
        }
        let last_idx = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            out.push(' ');
            if i == last_idx && self.needs_marker(param) {
                out.push(':');
            }
            out.push_str(param);
        }
        out
    }

    fn needs_marker(&self, last: &str) -> bool {
        self.trailing || last.is_empty() || last.contains(' ') || last.starts_with(':')
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Wrap `body` as a CTCP payload.
pub fn ctcp(body: &str) -> String {
    format!("\x01{body}\x01")
}

/// Extract a CTCP payload from a PRIVMSG/NOTICE text, if any.
pub fn parse_ctcp(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('\x01')?;
    Some(inner.strip_suffix('\x01').unwrap_or(inner))
}
