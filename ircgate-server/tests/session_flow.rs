//! Session engine tests driven through a recording transport.
//!
//! Tests cover:
//! - Registration burst order and password handling
//! - Command dispatch checks (unknown, argument count, registration, operator)
//! - Message relay to buddies and conversations
//! - Channel membership, status modes, WHO and WHOWAS
//! - Liveness probing and oversized input
//! - Teardown order
//! - Backend events: buddies, conversations, queued joins, WHOIS, DCC

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use ircgate_server::backend::memory::MemoryBackend;
use ircgate_server::backend::{AccountState, Backend, BackendEvent};
use ircgate_server::config::{OperEntry, SessionConfig};
use ircgate_server::directory::ChanStatus;
use ircgate_server::listener::{Forward, Listener};
use ircgate_server::session::Session;
use ircgate_server::transport::{Subscription, Transport};

type Log = Arc<Mutex<Vec<String>>>;

struct RecordingTransport {
    lines: Log,
    events: Log,
    closed: bool,
}

impl Transport for RecordingTransport {
    fn write(&mut self, line: &str) {
        if line.starts_with("ERROR") {
            self.events.lock().push("error".into());
        }
        self.lines.lock().push(line.to_string());
    }

    fn close(&mut self) {
        self.closed = true;
        self.events.lock().push("close".into());
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn peer_hostname(&self) -> String {
        "client.test".into()
    }

    fn local_hostname(&self) -> String {
        "gw.local".into()
    }
}

struct RecordingListener {
    events: Log,
    accept_die: bool,
}

impl Listener for RecordingListener {
    fn rehash(&self) {
        self.events.lock().push("rehash".into());
    }

    fn forward(&self, _session_id: &str, request: Forward) -> bool {
        match request {
            Forward::Wallops { .. } => {
                self.events.lock().push("wallops".into());
                false
            }
            Forward::Die { .. } => {
                self.events.lock().push("die".into());
                self.accept_die
            }
        }
    }

    fn shutdown(&self) {}

    fn dispose(&self, session_id: &str) {
        self.events.lock().push(format!("dispose {session_id}"));
    }
}

struct Harness {
    session: Session,
    lines: Log,
    events: Log,
    backend: MemoryBackend,
    backend_rx: mpsc::UnboundedReceiver<BackendEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::build(SessionConfig::default(), false)
    }

    fn build(config: SessionConfig, accept_die: bool) -> Self {
        let lines = Log::default();
        let events = Log::default();
        let backend = MemoryBackend::new();
        backend.add_account("jabber0", "jabber", "me@example.org");
        let (tx, backend_rx) = mpsc::unbounded_channel();
        backend.attach_events(tx);

        let transport = RecordingTransport {
            lines: lines.clone(),
            events: events.clone(),
            closed: false,
        };
        let listener: Arc<dyn Listener> = Arc::new(RecordingListener {
            events: events.clone(),
            accept_die,
        });
        let session = Session::new(
            "test-1",
            Arc::new(config),
            Box::new(transport),
            Box::new(backend.clone()),
            Some(listener),
        )
        .unwrap();
        Self {
            session,
            lines,
            events,
            backend,
            backend_rx,
        }
    }

    fn send(&mut self, line: &str) {
        self.session.feed(format!("{line}\r\n").as_bytes());
        self.pump();
    }

    /// Hand queued backend events to the session, as the connection task does.
    fn pump(&mut self) {
        while let Ok(event) = self.backend_rx.try_recv() {
            self.session.handle_event(event);
        }
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn register(&mut self, nick: &str) {
        self.send("PASS secretpass");
        self.send(&format!("NICK {nick}"));
        self.send(&format!("USER {nick} 0 * :Real {nick}"));
        self.take();
    }

    fn add_bob(&mut self) {
        self.send("INVITE bob@example.org:jabber0 &gateway");
        self.take();
    }
}

fn codes(lines: &[String]) -> Vec<&str> {
    lines.iter().filter_map(|l| l.split(' ').nth(1)).collect()
}

fn oper_config() -> SessionConfig {
    SessionConfig {
        opers: vec![OperEntry {
            name: "admin".into(),
            password: "adminpass".into(),
        }],
        ..SessionConfig::default()
    }
}

// ── Registration ────────────────────────────────────────────────────

#[test]
fn greets_with_auth_notice() {
    let h = Harness::new();
    assert_eq!(
        h.take(),
        vec![":irc.gateway.test NOTICE AUTH :ircgate initialized, please go on".to_string()]
    );
}

#[test]
fn blank_hostname_uses_local_address() {
    let config = SessionConfig {
        hostname: String::new(),
        ..SessionConfig::default()
    };
    let h = Harness::build(config, false);
    assert_eq!(h.session.server_name(), "gw.local");
}

#[test]
fn registration_burst_order() {
    let mut h = Harness::new();
    h.take();
    h.send("PASS secretpass");
    h.send("NICK alice");
    assert!(h.take().is_empty());
    h.send("USER alice 0 * :Alice");

    let lines = h.take();
    assert_eq!(
        codes(&lines),
        vec!["001", "002", "003", "004", "422", "JOIN", "353", "366", "PRIVMSG"]
    );
    assert_eq!(lines[5], ":alice!alice@client.test JOIN :&gateway");
    assert_eq!(lines[6], ":irc.gateway.test 353 alice = &gateway :@ircgate @alice");
    assert_eq!(
        lines[8],
        ":ircgate!ircgate@irc.gateway.test PRIVMSG &gateway :jabber0: connected"
    );
    assert!(h.session.is_registered());
    assert_eq!(h.backend.identity().as_deref(), Some("alice"));
}

#[test]
fn first_identity_adopts_password() {
    let mut h = Harness::new();
    h.register("alice");
    assert_eq!(h.backend.stored_password("alice").as_deref(), Some("secretpass"));
}

#[test]
fn short_password_disconnects() {
    let mut h = Harness::new();
    h.take();
    h.send("PASS short");
    assert_eq!(
        h.take(),
        vec![
            "ERROR :Closing Link: Password is too short (at least 8 characters) or contains spaces"
                .to_string()
        ]
    );
    assert!(h.session.is_closed());
    assert!(h.events().contains(&"dispose test-1".to_string()));
}

#[test]
fn wrong_password_for_known_identity() {
    let mut h = Harness::new();
    let mut store = h.backend.clone();
    store.set_password("alice", "rightpassword").unwrap();
    h.take();
    h.send("PASS secretpass");
    h.send("NICK alice");
    h.send("USER alice 0 * :Alice");

    let lines = h.take();
    assert_eq!(lines, vec!["ERROR :Closing Link: Incorrect password".to_string()]);
    assert!(!h.session.is_registered());
}

#[test]
fn server_password_gates_new_identities() {
    let config = SessionConfig {
        server_password: Some("gatekeeper".into()),
        ..SessionConfig::default()
    };
    let mut h = Harness::build(config, false);
    h.send("PASS secretpass");
    h.send("NICK alice");
    h.send("USER alice 0 * :Alice");
    assert!(h.session.is_closed());
    assert_eq!(h.backend.stored_password("alice"), None);
}

#[test]
fn nick_errors_during_registration() {
    let mut h = Harness::new();
    h.take();
    h.send("NICK 9lives");
    h.send("NICK ircgate");
    h.send("NICK");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 432 * 9lives :Erroneous nickname".to_string(),
            ":irc.gateway.test 433 * ircgate :Nickname is already in use".to_string(),
            ":irc.gateway.test 431 * :No nickname given".to_string(),
        ]
    );
}

// ── Dispatch ────────────────────────────────────────────────────────

#[test]
fn dispatch_checks_in_order() {
    let mut h = Harness::new();
    h.take();
    h.send("FOO");
    h.send("foo bar");
    h.send("PRIVMSG");
    h.send("PRIVMSG bob :hi");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 421 * FOO :Unknown command".to_string(),
            ":irc.gateway.test 421 * FOO :Unknown command".to_string(),
            ":irc.gateway.test 461 * PRIVMSG :Not enough parameters".to_string(),
            ":irc.gateway.test 451 * :You have not registered".to_string(),
        ]
    );

    h.register("alice");
    h.send("DIE");
    assert_eq!(
        h.take(),
        vec![":irc.gateway.test 481 alice :Permission Denied- You're not an IRC operator".to_string()]
    );
    assert_eq!(h.session.usage("DIE"), 0);
    assert!(!h.session.is_closed());
}

#[test]
fn stats_reports_usage_in_table_order() {
    let mut h = Harness::new();
    h.register("alice");
    h.send("VERSION");
    h.send("VERSION");
    h.take();
    h.send("STATS m");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 212 alice PASS 1".to_string(),
            ":irc.gateway.test 212 alice NICK 1".to_string(),
            ":irc.gateway.test 212 alice USER 1".to_string(),
            ":irc.gateway.test 212 alice VERSION 2".to_string(),
            ":irc.gateway.test 212 alice STATS 1".to_string(),
            ":irc.gateway.test 219 alice m :End of /STATS report".to_string(),
        ]
    );
}

// ── Messaging ───────────────────────────────────────────────────────

#[test]
fn privmsg_stops_at_first_unknown_target() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("PRIVMSG bob,nobody,bob :hi");
    assert_eq!(
        h.take(),
        vec![":irc.gateway.test 401 alice nobody :No such nick/channel".to_string()]
    );
    assert_eq!(h.backend.outgoing(), vec!["bob@example.org: hi".to_string()]);
}

#[test]
fn nick_lookups_ignore_case() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("PRIVMSG BOB :yo");
    assert_eq!(h.backend.outgoing(), vec!["bob@example.org: yo".to_string()]);

    h.send("WHOIS BOB");
    let lines = h.take();
    assert_eq!(codes(&lines), vec!["311", "319", "312", "318"]);
    assert_eq!(lines[1], ":irc.gateway.test 319 alice bob +&gateway");
}

#[test]
fn whois_waits_for_backend_details() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.backend.set_deferred_info(true);
    h.send("WHOIS bob");
    let lines = h.take();
    assert_eq!(codes(&lines), vec!["311", "319", "312", "320", "318"]);
    assert_eq!(lines[3], ":irc.gateway.test 320 alice bob :Protocol: jabber");
}

#[test]
fn away_reaches_backend() {
    let mut h = Harness::new();
    h.register("alice");
    h.send("AWAY :lunch");
    assert_eq!(h.backend.status_message().as_deref(), Some("lunch"));
    h.send("AWAY");
    assert_eq!(h.backend.status_message(), None);
    assert_eq!(codes(&h.take()), vec!["306", "305"]);
}

#[test]
fn conversation_round_trip() {
    let mut h = Harness::new();
    h.register("alice");
    h.send("JOIN #room:jabber0");
    let lines = h.take();
    assert_eq!(lines[0], ":alice!alice@client.test JOIN :#room:jabber0");

    h.send("PRIVMSG #room:jabber0 :hello all");
    assert_eq!(h.backend.outgoing(), vec!["room: hello all".to_string()]);

    h.session.handle_event(BackendEvent::Message {
        account: "jabber0".into(),
        buddy: "carol@example.org".into(),
        conversation: Some("room".into()),
        text: "hey".into(),
        notice: false,
    });
    assert_eq!(
        h.take(),
        vec![
            ":carol!carol@jabber0 JOIN :#room:jabber0".to_string(),
            ":carol!carol@jabber0 PRIVMSG #room:jabber0 :hey".to_string(),
        ]
    );

    h.send("PART #room:jabber0");
    assert!(h.session.directory().channel("#room:jabber0").is_none());
    assert!(h.backend.conversations("jabber0").is_empty());
    assert!(h.session.directory().find_nick("carol").is_none());
}

#[test]
fn join_is_queued_while_account_connects() {
    let mut h = Harness::new();
    h.register("alice");
    h.backend.set_state("jabber0", AccountState::Connecting);
    h.send("JOIN #room:jabber0");
    assert!(h.session.directory().channel("#room:jabber0").is_none());

    h.backend.set_state("jabber0", AccountState::Connected);
    h.session.handle_event(BackendEvent::AccountConnected {
        account: "jabber0".into(),
    });
    h.pump();
    assert!(
        h.take()
            .contains(&":alice!alice@client.test JOIN :#room:jabber0".to_string())
    );
    assert_eq!(h.backend.conversations("jabber0"), vec!["room".to_string()]);
}

#[test]
fn channel_targets_stop_at_first_missing_channel() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("JOIN #room:jabber0");
    h.take();
    h.send("PRIVMSG #room:jabber0,#gone:jabber0,bob :hi all");
    assert_eq!(
        h.take(),
        vec![":irc.gateway.test 403 alice #gone:jabber0 :No such channel".to_string()]
    );
    assert_eq!(h.backend.outgoing(), vec!["room: hi all".to_string()]);
}

#[test]
fn channel_message_needs_no_membership() {
    let mut h = Harness::new();
    h.register("alice");
    h.send("PART &gateway");
    h.take();
    h.send("PRIVMSG &gateway :hello");
    assert!(h.take().is_empty());
}

#[test]
fn away_buddy_answers_privmsg_only() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.session.handle_event(BackendEvent::BuddyAway {
        account: "jabber0".into(),
        buddy: "bob@example.org".into(),
        message: Some("out to lunch".into()),
    });
    assert_eq!(h.take(), vec![":irc.gateway.test MODE &gateway -v bob".to_string()]);

    h.send("PRIVMSG bob :hi");
    assert_eq!(
        h.take(),
        vec![":irc.gateway.test 301 alice bob :out to lunch".to_string()]
    );
    h.send("NOTICE bob :hi");
    assert!(h.take().is_empty());
    assert_eq!(h.backend.outgoing().len(), 2);
}

// ── Membership ──────────────────────────────────────────────────────

#[test]
fn invited_buddy_joins_voiced() {
    let mut h = Harness::new();
    h.register("alice");
    h.send("INVITE bob@example.org:jabber0 &gateway");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 341 alice bob@example.org:jabber0 &gateway".to_string(),
            ":bob!bob@jabber0 JOIN :&gateway".to_string(),
            ":irc.gateway.test MODE &gateway +v bob".to_string(),
        ]
    );
    h.send("NAMES &gateway");
    assert_eq!(
        h.take()[0],
        ":irc.gateway.test 353 alice = &gateway :@ircgate @alice +bob"
    );
}

#[test]
fn kick_drops_buddy_until_invited_again() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("KICK &gateway ircgate");
    h.send("KICK &gateway bob :bye");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 481 alice :Permission Denied- only buddies can be kicked".to_string(),
            ":alice!alice@client.test KICK &gateway bob :bye".to_string(),
        ]
    );
    assert!(h.backend.buddies("jabber0").is_empty());
    assert!(h.session.directory().find_nick("bob").is_none());

    h.send("INVITE bob@example.org:jabber0 &gateway");
    let bob = h.session.directory().find_nick("bob").unwrap();
    let status = h.session.directory().channel("&gateway").unwrap();
    assert!(status.member(bob).is_some_and(|m| m.has_status(ChanStatus::VOICE)));
}

#[test]
fn private_sender_is_seated_once_online() {
    let mut h = Harness::new();
    h.register("alice");
    h.session.handle_event(BackendEvent::Message {
        account: "jabber0".into(),
        buddy: "carol@example.org".into(),
        conversation: None,
        text: "psst".into(),
        notice: false,
    });
    assert_eq!(h.take(), vec![":carol!carol@jabber0 PRIVMSG alice :psst".to_string()]);
    let carol = h.session.directory().find_nick("carol").unwrap();
    let in_status = |h: &Harness| {
        h.session
            .directory()
            .channel("&gateway")
            .is_some_and(|c| c.has_member(carol))
    };
    assert!(!in_status(&h));

    h.session.handle_event(BackendEvent::BuddyOnline {
        account: "jabber0".into(),
        buddy: "carol@example.org".into(),
        alias: None,
        realname: "Carol".into(),
    });
    assert_eq!(
        h.take(),
        vec![
            ":carol!carol@jabber0 JOIN :&gateway".to_string(),
            ":irc.gateway.test MODE &gateway +v carol".to_string(),
        ]
    );
    assert!(in_status(&h));
    assert_eq!(h.session.directory().find_nick("carol"), Some(carol));
}

#[test]
fn channel_mode_changes_reach_members() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("MODE &gateway +o bob");
    h.send("MODE &gateway -v bob");
    assert_eq!(
        h.take(),
        vec![
            ":alice!alice@client.test MODE &gateway +o bob".to_string(),
            ":alice!alice@client.test MODE &gateway -v bob".to_string(),
        ]
    );
    let bob = h.session.directory().find_nick("bob").unwrap();
    let member = h.session.directory().channel("&gateway").unwrap().member(bob).unwrap();
    assert_eq!(member.status, ChanStatus::OP);

    h.send("MODE &gateway -o alice");
    h.take();
    h.send("MODE &gateway +v bob");
    assert_eq!(
        h.take(),
        vec![":irc.gateway.test 482 alice &gateway :You're not channel operator".to_string()]
    );
}

// ── Queries ─────────────────────────────────────────────────────────

#[test]
fn who_lists_members_and_servers() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("WHO &gateway");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 352 alice &gateway ircgate irc.gateway.test irc.gateway.test ircgate H@ :0 Gateway service".to_string(),
            ":irc.gateway.test 352 alice &gateway alice client.test irc.gateway.test alice H@ :0 Real alice".to_string(),
            ":irc.gateway.test 352 alice &gateway bob jabber0 jabber0 bob H+ :1 bob@example.org".to_string(),
            ":irc.gateway.test 315 alice &gateway :End of WHO list".to_string(),
        ]
    );

    h.send("WHO jabber0");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 352 alice * bob jabber0 jabber0 bob H :1 bob@example.org".to_string(),
            ":irc.gateway.test 315 alice jabber0 :End of WHO list".to_string(),
        ]
    );
}

#[test]
fn whowas_remembers_removed_nicks() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("KILL bob :spam");
    h.take();
    h.send("WHOWAS bob");
    h.send("WHOWAS nobody");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 314 alice bob bob jabber0 * bob@example.org".to_string(),
            ":irc.gateway.test 369 alice bob :End of WHOWAS".to_string(),
            ":irc.gateway.test 406 alice nobody :There was no such nickname".to_string(),
            ":irc.gateway.test 369 alice nobody :End of WHOWAS".to_string(),
        ]
    );
}

// ── Liveness and input limits ───────────────────────────────────────

#[test]
fn unanswered_ping_times_out() {
    let mut h = Harness::new();
    h.take();
    let later = Instant::now() + Duration::from_secs(61);
    h.session.check_liveness(later);
    assert_eq!(h.take(), vec!["PING :irc.gateway.test".to_string()]);
    assert!(!h.session.is_closed());

    h.session.check_liveness(later);
    assert_eq!(h.take(), vec!["ERROR :Closing Link: Ping timeout".to_string()]);
    assert!(h.session.is_closed());
}

#[test]
fn inbound_traffic_clears_pending_ping() {
    let mut h = Harness::new();
    h.session
        .check_liveness(Instant::now() + Duration::from_secs(61));
    h.send("PONG :irc.gateway.test");
    h.session.check_liveness(Instant::now());
    assert!(!h.session.is_closed());
}

#[test]
fn oversized_line_is_dropped() {
    let mut h = Harness::new();
    h.take();
    h.session.feed(&vec![b'A'; 9000]);
    h.session.feed(b"AAAA\r\nPING :x\r\n");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 417 * :Input line was too long".to_string(),
            ":irc.gateway.test PONG irc.gateway.test :x".to_string(),
        ]
    );
}

// ── Teardown ────────────────────────────────────────────────────────

#[test]
fn teardown_order() {
    let mut h = Harness::new();
    let events = h.events.clone();
    h.session
        .add_subscription(Subscription::new("reader", move || events.lock().push("release".into())));
    h.send("QUIT :bye");
    assert_eq!(
        h.events(),
        vec![
            "error".to_string(),
            "release".to_string(),
            "close".to_string(),
            "dispose test-1".to_string(),
        ]
    );

    h.session.quit("again");
    h.send("NICK alice");
    assert_eq!(h.events().len(), 4);
}

// ── Operators ───────────────────────────────────────────────────────

#[test]
fn die_without_acceptance_quits_locally() {
    let mut h = Harness::build(oper_config(), false);
    h.register("alice");
    h.send("OPER admin adminpass");
    assert_eq!(codes(&h.take()), vec!["381", "MODE"]);

    h.send("DIE");
    assert!(h.events().contains(&"die".to_string()));
    assert_eq!(
        h.take().last().map(String::as_str),
        Some("ERROR :Closing Link: Shutdown requested by alice")
    );
    assert!(h.session.is_closed());
}

#[test]
fn accepted_die_leaves_session_to_listener() {
    let mut h = Harness::build(oper_config(), true);
    h.register("alice");
    h.send("OPER admin adminpass");
    h.send("DIE");
    assert!(!h.session.is_closed());
}

#[test]
fn wrong_oper_password() {
    let mut h = Harness::build(oper_config(), false);
    h.register("alice");
    h.send("OPER admin nope");
    assert_eq!(h.take(), vec![":irc.gateway.test 464 alice :Password incorrect".to_string()]);
    assert!(!h.session.is_operator());
}

#[test]
fn wallops_echo_and_forward() {
    let mut h = Harness::build(oper_config(), false);
    h.register("alice");
    h.send("OPER admin adminpass");
    h.take();
    h.send("WALLOPS :hello");
    assert_eq!(h.take(), vec![":alice!alice@client.test WALLOPS :hello".to_string()]);
    assert!(h.events().contains(&"wallops".to_string()));
}

#[test]
fn kill_removes_buddy() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("KILL ircgate :nope");
    h.send("KILL bob :spam");
    assert_eq!(
        h.take(),
        vec![
            ":irc.gateway.test 481 alice :Permission Denied- You can't kill this nick".to_string(),
            ":bob!bob@jabber0 QUIT :Killed by alice (spam)".to_string(),
        ]
    );
    assert!(h.backend.buddies("jabber0").is_empty());
    assert!(h.session.directory().find_nick("bob").is_none());
}

#[test]
fn svsnick_stores_alias() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("SVSNICK bob robert");
    assert_eq!(h.take(), vec![":bob!bob@jabber0 NICK :robert".to_string()]);
    assert_eq!(
        h.backend.alias_of("jabber0", "bob@example.org").as_deref(),
        Some("robert")
    );
    assert!(h.session.directory().find_nick("Robert").is_some());
}

#[test]
fn squit_drops_account_nicks() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("SQUIT jabber0");
    let lines = h.take();
    assert_eq!(lines[0], ":bob!bob@jabber0 QUIT :Disconnected by user");
    assert!(h.session.directory().find_nick("bob").is_none());
    assert!(h.session.directory().server("jabber0").is_none());

    h.send("SQUIT nowhere");
    assert_eq!(
        h.take(),
        vec![":irc.gateway.test 402 alice nowhere :No such server".to_string()]
    );
}

// ── File transfers ──────────────────────────────────────────────────

#[test]
fn offline_buddy_leaves_transfer_without_peer() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.session.handle_event(BackendEvent::FileOffer {
        id: "t1".into(),
        account: "jabber0".into(),
        buddy: "bob@example.org".into(),
        filename: "a.txt".into(),
        size: 10,
        addr: "127.0.0.1:5000".parse().unwrap(),
    });
    assert_eq!(
        h.take(),
        vec![":bob!bob@jabber0 PRIVMSG alice :\x01DCC SEND \"a.txt\" 2130706433 5000 10\x01".to_string()]
    );
    let bob = h.session.directory().find_nick("bob");
    assert_eq!(h.session.dcc().get("t1").and_then(|t| t.peer), bob);

    h.session.handle_event(BackendEvent::BuddyOffline {
        account: "jabber0".into(),
        buddy: "bob@example.org".into(),
    });
    assert_eq!(h.take(), vec![":bob!bob@jabber0 QUIT :Offline".to_string()]);
    assert_eq!(h.session.dcc().get("t1").and_then(|t| t.peer), None);
}

#[test]
fn client_offer_goes_to_backend() {
    let mut h = Harness::new();
    h.register("alice");
    h.add_bob();
    h.send("PRIVMSG bob :\x01DCC SEND notes.txt 2130706433 6000 42\x01");
    assert_eq!(h.session.dcc().len(), 1);
    let transfer = h.session.dcc().iter().next().unwrap();
    assert_eq!(transfer.id(), "jabber0-1");
    assert_eq!(transfer.filename, "notes.txt");
    assert!(h.backend.outgoing().is_empty());
}
