//! Channels and their membership records.

use bitflags::bitflags;

use crate::irc::Message;

use super::nick::NickId;

bitflags! {
    /// Per-membership status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChanStatus: u8 {
        const OP = 1 << 0;
        const VOICE = 1 << 1;
    }
}

/// Status bits in mode-string order, highest privilege first.
const STATUS_TABLE: [(ChanStatus, char, char); 2] =
    [(ChanStatus::OP, 'o', '@'), (ChanStatus::VOICE, 'v', '+')];

impl ChanStatus {
    pub fn from_letter(letter: char) -> Option<Self> {
        STATUS_TABLE.iter().find(|(_, c, _)| *c == letter).map(|(s, _, _)| *s)
    }

    /// One letter per set bit, in table order.
    pub fn letters(self) -> String {
        STATUS_TABLE
            .iter()
            .filter(|(s, _, _)| self.contains(*s))
            .map(|(_, c, _)| *c)
            .collect()
    }

    /// NAMES prefix for the highest set bit.
    pub fn prefix(self) -> &'static str {
        if self.contains(ChanStatus::OP) {
            "@"
        } else if self.contains(ChanStatus::VOICE) {
            "+"
        } else {
            ""
        }
    }

    fn rank(self) -> usize {
        STATUS_TABLE
            .iter()
            .position(|(s, _, _)| self.contains(*s))
            .unwrap_or(STATUS_TABLE.len())
    }
}

/// Membership of one nick in one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChanUser {
    pub nick: NickId,
    pub status: ChanStatus,
}

impl ChanUser {
    pub fn has_status(&self, status: ChanStatus) -> bool {
        self.status.contains(status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Local administrative channel (`&name`).
    Status,
    /// Mirror of a group conversation (`#conversation:account`).
    Conversation { account: String, conversation: String },
}

#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    kind: ChannelKind,
    pub(crate) members: Vec<ChanUser>,
    pub topic: Option<String>,
    pub created_at: i64,
}

impl Channel {
    pub fn new(name: &str, kind: ChannelKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            members: Vec::new(),
            topic: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn status(name: &str) -> Self {
        Self::new(name, ChannelKind::Status)
    }

    pub fn conversation(account: &str, conversation: &str) -> Self {
        let name = Self::conversation_name(account, conversation);
        Self::new(
            &name,
            ChannelKind::Conversation {
                account: account.to_string(),
                conversation: conversation.to_string(),
            },
        )
    }

    pub fn conversation_name(account: &str, conversation: &str) -> String {
        format!("#{conversation}:{account}")
    }

    pub fn is_channel_name(name: &str) -> bool {
        name.len() > 1 && (name.starts_with('&') || name.starts_with('#'))
    }

    pub fn is_status_name(name: &str) -> bool {
        name.len() > 1 && name.starts_with('&') && !name.contains([' ', ',', '\x07'])
    }

    /// Split `#conversation:account` into `(account, conversation)`.
    pub fn parse_conversation_name(name: &str) -> Option<(&str, &str)> {
        let body = name.strip_prefix('#')?;
        let (conversation, account) = body.rsplit_once(':')?;
        if conversation.is_empty() || account.is_empty() {
            return None;
        }
        Some((account, conversation))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    pub fn is_status(&self) -> bool {
        self.kind == ChannelKind::Status
    }

    pub fn members(&self) -> &[ChanUser] {
        &self.members
    }

    pub fn member(&self, nick: NickId) -> Option<&ChanUser> {
        self.members.iter().find(|m| m.nick == nick)
    }

    pub fn has_member(&self, nick: NickId) -> bool {
        self.member(nick).is_some()
    }

    pub(crate) fn member_mut(&mut self, nick: NickId) -> Option<&mut ChanUser> {
        self.members.iter_mut().find(|m| m.nick == nick)
    }

    /// NAMES entries: ops first, then voiced, then the rest, each group in
    /// membership order. `resolve` maps a member to its current nickname.
    pub fn names_listing<'a>(&self, resolve: impl Fn(NickId) -> Option<&'a str>) -> Vec<String> {
        let mut ranked: Vec<(usize, usize, String)> = self
            .members
            .iter()
            .enumerate()
            .filter_map(|(pos, m)| {
                resolve(m.nick).map(|name| (m.status.rank(), pos, format!("{}{name}", m.status.prefix())))
            })
            .collect();
        ranked.sort_by_key(|(rank, pos, _)| (*rank, *pos));
        ranked.into_iter().map(|(_, _, entry)| entry).collect()
    }

    /// `MODE <chan> (+|-)<letters> <nick>...` with one nick argument per letter.
    pub fn mode_message(&self, sender: &str, target: &str, add: bool, modes: ChanStatus) -> Message {
        let letters = modes.letters();
        let mut msg = Message::new("MODE")
            .with_prefix(sender)
            .to(self.name.clone())
            .arg(format!("{}{letters}", if add { '+' } else { '-' }));
        for _ in letters.chars() {
            msg = msg.arg(target);
        }
        msg
    }
}
