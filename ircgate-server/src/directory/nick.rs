//! Nick entities: the connected user, virtual service nicks and
//! remote-backed buddies, told apart by capability flags.

use bitflags::bitflags;

/// Stable handle for a nick inside one directory. Survives renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NickId(pub(crate) u64);

bitflags! {
    /// Status flags of a nick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NickFlags: u32 {
        const REGISTERED = 1 << 0;
        const OPERATOR = 1 << 1;
        const PING_PENDING = 1 << 2;
        const AWAY = 1 << 3;
    }
}

/// Identifies the remote identity a nick mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuddyHandle {
    pub account: String,
    pub buddy: String,
}

#[derive(Debug, Clone)]
pub struct Nick {
    pub(crate) id: NickId,
    pub(crate) name: String,
    pub ident: String,
    pub host: String,
    pub realname: String,
    pub away: Option<String>,
    pub flags: NickFlags,
    /// Name of the owning server entry. Resolved through the directory.
    pub server: String,
    /// Keys of the channels this nick is a member of.
    pub(crate) channels: Vec<String>,
    local: bool,
    buddy: Option<BuddyHandle>,
}

impl Nick {
    /// The user on the other end of the connection.
    pub fn local(name: &str, ident: &str, host: &str, server: &str) -> Self {
        Self::build(name, ident, host, server, true, None)
    }

    /// A gateway-side nick such as the root service.
    pub fn service(name: &str, server: &str) -> Self {
        let mut nick = Self::build(name, name, server, server, false, None);
        nick.realname = "Gateway service".to_string();
        nick
    }

    /// A nick mirroring a buddy on a backend account.
    pub fn remote(name: &str, handle: BuddyHandle, realname: &str) -> Self {
        let host = handle.account.clone();
        let ident = handle.buddy.split('@').next().unwrap_or(&handle.buddy).to_string();
        let server = handle.account.clone();
        let mut nick = Self::build(name, &ident, &host, &server, false, Some(handle));
        nick.realname = realname.to_string();
        nick
    }

    fn build(
        name: &str,
        ident: &str,
        host: &str,
        server: &str,
        local: bool,
        buddy: Option<BuddyHandle>,
    ) -> Self {
        Self {
            id: NickId::default(),
            name: name.to_string(),
            ident: ident.to_string(),
            host: host.to_string(),
            realname: String::new(),
            away: None,
            flags: NickFlags::empty(),
            server: server.to_string(),
            channels: Vec::new(),
            local,
            buddy,
        }
    }

    pub fn id(&self) -> NickId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Only remote-backed nicks can be kicked, killed or renamed by the user.
    pub fn is_remote_backed(&self) -> bool {
        self.buddy.is_some()
    }

    pub fn buddy(&self) -> Option<&BuddyHandle> {
        self.buddy.as_ref()
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.name, self.ident, self.host)
    }

    pub fn has_flag(&self, flag: NickFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: NickFlags) {
        self.flags.insert(flag);
    }

    pub fn del_flag(&mut self, flag: NickFlags) {
        self.flags.remove(flag);
    }

    pub fn set_away(&mut self, message: Option<String>) {
        match message {
            Some(text) if !text.is_empty() => {
                self.away = Some(text);
                self.flags.insert(NickFlags::AWAY);
            }
            _ => {
                self.away = None;
                self.flags.remove(NickFlags::AWAY);
            }
        }
    }

    pub fn is_away(&self) -> bool {
        self.flags.contains(NickFlags::AWAY)
    }
}

pub const MAX_NICK_LEN: usize = 29;

const SPECIAL: &str = "[]\\`_^{|}";

/// `letter / special` first, then `letter / digit / special / "-"`.
pub fn is_valid_nickname(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if name.len() > MAX_NICK_LEN {
        return false;
    }
    if !(first.is_ascii_alphabetic() || SPECIAL.contains(first)) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || SPECIAL.contains(c))
}

/// Turn an arbitrary buddy name into something usable as a nickname.
pub fn sanitize_nickname(raw: &str) -> String {
    let base = raw.split('@').next().unwrap_or(raw);
    let mut out: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || SPECIAL.contains(*c))
        .take(MAX_NICK_LEN)
        .collect();
    if out.chars().next().is_none_or(|c| !(c.is_ascii_alphabetic() || SPECIAL.contains(c))) {
        out.insert(0, '_');
        out.truncate(MAX_NICK_LEN);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_validation() {
        assert!(is_valid_nickname("bob"));
        assert!(is_valid_nickname("[away]bob-2"));
        assert!(!is_valid_nickname(""));
        assert!(!is_valid_nickname("2bob"));
        assert!(!is_valid_nickname("bo b"));
        assert!(!is_valid_nickname("#chan"));
        assert!(!is_valid_nickname(&"a".repeat(MAX_NICK_LEN + 1)));
    }

    #[test]
    fn sanitize_buddy_names() {
        assert_eq!(sanitize_nickname("alice@jabber.org"), "alice");
        assert_eq!(sanitize_nickname("42life"), "_42life");
        assert_eq!(sanitize_nickname("J. Doe"), "JDoe");
        assert!(is_valid_nickname(&sanitize_nickname("")));
    }

    #[test]
    fn capabilities_follow_constructor() {
        let user = Nick::local("bob", "bob", "localhost", "gw");
        assert!(user.is_local());
        assert!(!user.is_remote_backed());

        let root = Nick::service("root", "gw");
        assert!(!root.is_local());
        assert!(!root.is_remote_backed());

        let buddy = Nick::remote(
            "alice",
            BuddyHandle { account: "jabber0".into(), buddy: "alice@example.org".into() },
            "Alice",
        );
        assert!(buddy.is_remote_backed());
        assert_eq!(buddy.hostmask(), "alice!alice@jabber0");
        assert_eq!(buddy.server, "jabber0");
    }

    #[test]
    fn away_sets_and_clears_flag() {
        let mut nick = Nick::local("bob", "bob", "h", "gw");
        nick.set_away(Some("lunch".into()));
        assert!(nick.is_away());
        nick.set_away(Some(String::new()));
        assert!(!nick.is_away());
        assert!(nick.away.is_none());
    }
}
