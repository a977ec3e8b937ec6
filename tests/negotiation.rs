//! End-to-end capability negotiation and SASL scenarios.
//!
//! These drive a [`Session`] with scripted server lines and assert on the
//! exact outbound command sequence and event stream.
//!
//! Run with: `cargo test --test negotiation`

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use slirc_engine::{CapEvent, Config, LineSink, Session, SessionEvent};

#[derive(Default)]
struct Outbound(Vec<String>);

impl LineSink for Outbound {
    fn send_line(&mut self, line: &str) {
        self.0.push(line.to_string());
    }
}

fn drain(session: &mut Session<Outbound>) -> Vec<String> {
    std::mem::take(&mut session.sink_mut().0)
}

fn config() -> Config {
    Config::new("ada", "ada", "Ada Lovelace")
}

fn sasl_config() -> Config {
    let mut config = config();
    config.password = Some("hunter2".to_string());
    config
}

// =============================================================================
// CAPABILITY NEGOTIATION WITHOUT SASL
// =============================================================================

#[test]
fn negotiation_with_no_requests_ends_immediately() {
    let mut session = Session::new(config(), Outbound::default());
    session.start();

    assert_eq!(
        drain(&mut session),
        vec!["CAP LS 302", "USER ada 0 * :Ada Lovelace", "NICK ada"]
    );

    session
        .feed_line(":server CAP * LS :multi-prefix away-notify")
        .unwrap();

    assert_eq!(drain(&mut session), vec!["CAP END"]);
    assert_eq!(
        session.take_events(),
        vec![
            SessionEvent::Cap(CapEvent::Ready),
            SessionEvent::Cap(CapEvent::Done),
            SessionEvent::RegistrationComplete,
        ]
    );
}

#[test]
fn listing_continuation_defers_ready() {
    let mut session = Session::new(config(), Outbound::default());
    session.start();
    drain(&mut session);

    session
        .feed_line(":server CAP * LS * :sasl=PLAIN,EXTERNAL batch")
        .unwrap();
    assert!(session.take_events().is_empty());
    assert!(drain(&mut session).is_empty());

    session.feed_line(":server CAP * LS :multi-prefix").unwrap();

    let ready_count = session
        .take_events()
        .iter()
        .filter(|event| matches!(event, SessionEvent::Cap(CapEvent::Ready)))
        .count();
    assert_eq!(ready_count, 1);

    // Both listing lines contributed to the advertised set.
    assert_eq!(
        session.lookup_capability("sasl"),
        Some(Some("PLAIN,EXTERNAL"))
    );
    assert_eq!(session.lookup_capability("batch"), Some(None));
    assert_eq!(session.lookup_capability("multi-prefix"), Some(None));
}

// =============================================================================
// FULL REGISTRATION WITH SASL PLAIN
// =============================================================================

#[test]
fn sasl_plain_full_handshake() {
    let mut session = Session::new(sasl_config(), Outbound::default());
    session.start();
    drain(&mut session);

    // Listing arrives in two chunks; ready fires only after the second.
    session
        .feed_line(":server CAP * LS * :sasl=PLAIN,EXTERNAL")
        .unwrap();
    session.feed_line(":server CAP * LS :multi-prefix").unwrap();

    assert_eq!(drain(&mut session), vec!["CAP REQ :sasl"]);

    // The ack of the sasl capability starts authentication; CAP END is
    // deferred even though no request is pending anymore.
    session.feed_line(":server CAP * ACK :sasl").unwrap();
    assert_eq!(drain(&mut session), vec!["AUTHENTICATE PLAIN"]);
    assert!(!session.is_registered());

    // Empty challenge; the client answers with its credentials.
    session.feed_line("AUTHENTICATE +").unwrap();
    let lines = drain(&mut session);
    assert_eq!(lines.len(), 1);
    let payload = lines[0].strip_prefix("AUTHENTICATE ").unwrap();
    assert_eq!(BASE64.decode(payload).unwrap(), b"\0ada\0hunter2");

    // Success releases the wait counter and lets negotiation finish.
    session
        .feed_line(":server 903 ada :SASL authentication successful")
        .unwrap();
    assert_eq!(drain(&mut session), vec!["CAP END"]);
    assert!(session.is_registered());

    let events = session.take_events();
    assert_eq!(
        events,
        vec![
            SessionEvent::Cap(CapEvent::Ready),
            SessionEvent::Cap(CapEvent::Ack("sasl".to_string())),
            SessionEvent::Cap(CapEvent::Done),
            SessionEvent::RegistrationComplete,
        ]
    );
}

#[test]
fn sasl_prefers_scram_and_falls_back_to_plain() {
    let mut session = Session::new(sasl_config(), Outbound::default());
    session.start();
    drain(&mut session);

    session
        .feed_line(":server CAP * LS :sasl=PLAIN,SCRAM-SHA-256")
        .unwrap();
    assert_eq!(drain(&mut session), vec!["CAP REQ :sasl"]);

    session.feed_line(":server CAP * ACK :sasl").unwrap();
    assert_eq!(drain(&mut session), vec!["AUTHENTICATE SCRAM-SHA-256"]);

    // The server rejects the mechanism; the session retries with PLAIN.
    session
        .feed_line(":server 904 ada :SASL authentication failed")
        .unwrap();
    assert_eq!(drain(&mut session), vec!["AUTHENTICATE PLAIN"]);

    session.feed_line("AUTHENTICATE +").unwrap();
    assert_eq!(drain(&mut session).len(), 1);

    session
        .feed_line(":server 903 ada :SASL authentication successful")
        .unwrap();
    assert_eq!(drain(&mut session), vec!["CAP END"]);
}

#[test]
fn sasl_exhaustion_surfaces_connection_error() {
    let mut session = Session::new(sasl_config(), Outbound::default());
    session.start();
    drain(&mut session);

    session.feed_line(":server CAP * LS :sasl=PLAIN").unwrap();
    session.feed_line(":server CAP * ACK :sasl").unwrap();

    session
        .feed_line(":server 904 ada :SASL authentication failed")
        .unwrap();

    let events = session.take_events();
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::ConnectionError { reason } if reason == "No valid SASL mechanisms found"
    )));
}

// =============================================================================
// POST-REGISTRATION TRAFFIC
// =============================================================================

#[test]
fn post_registration_messages_flow_through() {
    let mut session = Session::new(config(), Outbound::default());
    session.start();
    drain(&mut session);

    session.feed_line(":server CAP * LS :multi-prefix").unwrap();
    drain(&mut session);
    session.take_events();

    session.feed_line(":server 001 ada :Welcome to IRC").unwrap();
    session.feed_line("PING :keepalive").unwrap();
    session
        .feed_line("@msgid=m1 :alice!a@h PRIVMSG #rust :\x02hello\x02")
        .unwrap();
    session.feed_line(":alice!a@h TOPIC #rust :all things rust").unwrap();

    assert_eq!(drain(&mut session), vec!["PONG keepalive"]);

    let events = session.take_events();
    assert_eq!(events.len(), 3);

    match &events[0] {
        SessionEvent::Status { message } => {
            assert_eq!(message.params(), ["Welcome to IRC"]);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    match &events[1] {
        SessionEvent::Privmsg { target, body, id, .. } => {
            assert_eq!(target, "#rust");
            assert_eq!(body, "hello");
            assert_eq!(id.as_deref(), Some("m1"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    match &events[2] {
        SessionEvent::Topic { channel, topic } => {
            assert_eq!(channel, "#rust");
            assert_eq!(topic, "all things rust");
        }
        other => panic!("unexpected event: {:?}", other),
    }
}
