//! # slirc-engine
//!
//! An IRCv3 client protocol engine: line parsing with registered-handler
//! dispatch, capability negotiation, and SASL authentication.
//!
//! This crate is the protocol side of a client connection. It owns no
//! sockets: the embedding connection shell reads CRLF-terminated lines
//! off its transport, hands them to the engine one at a time, and
//! provides a [`LineSink`] the engine writes protocol commands through.
//! Everything in between — the wire grammar, tag unescaping, the
//! `CAP LS/REQ/ACK/NAK/END` handshake, the `AUTHENTICATE`
//! challenge/response loop with mechanism retry — happens in here,
//! synchronously and in arrival order.
//!
//! ## Quick Start
//!
//! ```rust
//! use slirc_engine::{Config, LineSink, Session, SessionEvent};
//!
//! struct Outbound(Vec<String>);
//!
//! impl LineSink for Outbound {
//!     fn send_line(&mut self, line: &str) {
//!         self.0.push(line.to_string());
//!     }
//! }
//!
//! let mut config = Config::new("ada", "ada", "Ada Lovelace");
//! config.password = Some("hunter2".to_string());
//!
//! let mut session = Session::new(config, Outbound(Vec::new()));
//! session.start(); // CAP LS 302, USER, NICK
//!
//! // Feed lines as they arrive from the server.
//! session.feed_line(":server CAP * LS :sasl=PLAIN multi-prefix").ok();
//!
//! for event in session.take_events() {
//!     match event {
//!         SessionEvent::RegistrationComplete => { /* join channels */ }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Parsing messages directly
//!
//! ```rust
//! use slirc_engine::Message;
//!
//! let raw = "@time=2023-01-01T12:00:00Z :nick!user@host PRIVMSG #channel :Hello!";
//! let message: Message = raw.parse().expect("valid IRC message");
//!
//! assert_eq!(message.command(), "PRIVMSG");
//! assert_eq!(message.tag("time"), Some("2023-01-01T12:00:00Z"));
//! ```

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod caps;
pub mod config;
pub mod error;
pub mod formatting;
pub mod message;
pub mod parser;
pub mod sasl;
pub mod session;

pub use self::caps::{CapEvent, Capabilities, CAP_LS_VERSION};
pub use self::config::Config;
pub use self::error::{HandlerError, MessageError, ProtocolError, Result};
pub use self::formatting::{strip_formatting, FormattedStringExt};
pub use self::message::tags::{escape_tag_value, unescape_tag_value};
pub use self::message::{Message, Source};
pub use self::parser::{MessageHandler, MessageHandlerFn, Parser};
pub use self::sasl::{
    Credentials, SaslFatal, SaslMechanism, SaslSession, AUTHENTICATE_CHUNK_SIZE,
};
pub use self::session::{LineSink, Session, SessionCore, SessionEvent};
