//! One IRC connection attempt, protocol side.
//!
//! [`Session`] ties the pieces together: it owns the line parser with the
//! default handler set installed, the capability negotiator, and the SASL
//! session, and it speaks to the connection shell through two narrow
//! surfaces. Outbound, everything goes through the shell's [`LineSink`].
//! Inbound, the shell feeds complete lines to [`Session::feed_line`] one
//! at a time and drains [`Session::take_events`] afterwards.
//!
//! Everything is single-threaded and synchronous: a line is fully handled
//! (including any capability or SASL transitions it causes) before
//! `feed_line` returns, and events come out in emission order.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::caps::{CapEvent, Capabilities};
use crate::config::Config;
use crate::error::{HandlerError, ProtocolError};
use crate::formatting::strip_formatting;
use crate::message::{Message, Source};
use crate::parser::Parser;
use crate::sasl::{Credentials, SaslFatal, SaslSession};

const MSG_AUTHENTICATE: &str = "AUTHENTICATE";
const MSG_CAP: &str = "CAP";
const MSG_NOTICE: &str = "NOTICE";
const MSG_PING: &str = "PING";
const MSG_PRIVMSG: &str = "PRIVMSG";
const MSG_TOPIC: &str = "TOPIC";

const RPL_WELCOME: &str = "001";
const RPL_YOURHOST: &str = "002";
const RPL_CREATED: &str = "003";
const RPL_MYINFO: &str = "004";
const RPL_LUSERCLIENT: &str = "251";
const RPL_LUSEROP: &str = "252";
const RPL_LUSERUNKNOWN: &str = "253";
const RPL_LUSERCHANNELS: &str = "254";
const RPL_LUSERME: &str = "255";
const RPL_NOTOPIC: &str = "331";
const RPL_TOPIC: &str = "332";
const RPL_MOTD: &str = "372";
const RPL_MOTDSTART: &str = "375";
const RPL_ENDOFMOTD: &str = "376";
const RPL_LOGGEDIN: &str = "900";
const RPL_LOGGEDOUT: &str = "901";
const ERR_NICKLOCKED: &str = "902";
const RPL_SASLSUCCESS: &str = "903";
const ERR_SASLFAIL: &str = "904";
const ERR_SASLTOOLONG: &str = "905";
const ERR_SASLABORTED: &str = "906";
const ERR_SASLALREADY: &str = "907";
const RPL_SASLMECHS: &str = "908";

/// The write primitive the connection shell provides.
///
/// Lines carry no terminator; the shell appends CRLF and owns write
/// failure handling (a failed write tears down the connection).
pub trait LineSink: 'static {
    /// Queue one line for transmission.
    fn send_line(&mut self, line: &str);
}

#[cfg(test)]
impl LineSink for Vec<String> {
    fn send_line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Events surfaced to the connection shell, in emission order.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Capability negotiation progress.
    Cap(CapEvent),
    /// Capability negotiation ended; registration can complete.
    RegistrationComplete,
    /// A message for the status window.
    Status {
        /// The message to display. The command may have been re-tagged
        /// for display (the fallback handler does this) and leading nick
        /// parameters dropped; this form never goes back on the wire.
        message: Message,
    },
    /// A `PRIVMSG` or `NOTICE` for a conversation.
    Privmsg {
        /// Conversation target: the channel, or the sender's nick for a
        /// direct message.
        target: String,
        /// The raw source of the message.
        author: String,
        /// Body text with formatting codes removed.
        body: String,
        /// The `msgid` tag, when the server provided one.
        id: Option<String>,
        /// The `time` tag when present and parseable, otherwise the
        /// arrival time.
        timestamp: DateTime<Utc>,
        /// Whether this was a `NOTICE`.
        notice: bool,
    },
    /// A topic change or topic reply.
    Topic {
        /// The channel whose topic changed.
        channel: String,
        /// The new topic; empty when the topic was cleared.
        topic: String,
    },
    /// A fatal failure: the shell must terminate the connection.
    ConnectionError {
        /// Human-readable description of what went wrong.
        reason: String,
    },
}

/// The state handlers operate on: sink, config, capability negotiator,
/// SASL session, and the outbound event queue.
///
/// This is the dispatch context for every registered handler; custom
/// handlers interact with the session through it.
pub struct SessionCore<S: LineSink> {
    sink: S,
    config: Config,
    caps: Capabilities,
    sasl: Option<SaslSession>,
    events: VecDeque<SessionEvent>,
    registered: bool,
}

impl<S: LineSink> SessionCore<S> {
    /// Send one pre-formatted line to the server.
    pub fn send_line(&mut self, line: &str) {
        self.sink.send_line(line);
    }

    /// Queue an event for the connection shell.
    pub fn push_event(&mut self, event: SessionEvent) {
        self.events.push_back(event);
    }

    /// The capability negotiation state.
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// The configuration for this connection attempt.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Request a capability with `CAP REQ`.
    pub fn request_capability(&mut self, name: &str) {
        self.caps.request(&mut self.sink, name);
    }

    /// Report a fatal connection-level failure.
    pub fn fatal(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("connection error: {}", reason);
        self.push_event(SessionEvent::ConnectionError { reason });
    }

    /// The capability listing finished: run ready-time requests, then
    /// finish immediately if nothing was requested.
    fn cap_ready(&mut self) {
        self.push_event(SessionEvent::Cap(CapEvent::Ready));

        self.caps.default_ready(&mut self.sink);

        let wanted: Vec<String> = self
            .config
            .request_caps
            .iter()
            .filter(|cap| self.caps.lookup(cap).is_some())
            .filter(|cap| !self.caps.pending_requests().contains(*cap))
            .filter(|cap| !(self.config.sasl_enabled() && cap.as_str() == "sasl"))
            .cloned()
            .collect();
        for cap in wanted {
            self.caps.request(&mut self.sink, &cap);
        }

        if self.config.sasl_enabled() && self.caps.lookup("sasl").is_some() {
            self.caps.request(&mut self.sink, "sasl");
        }

        if self.caps.is_idle() {
            self.cap_finish();
        }
    }

    /// Process a `CAP ACK`/`NAK` for the given subparameters.
    fn cap_acknowledged(&mut self, subparams: &[String], ack: bool) -> Result<bool, HandlerError> {
        let capability = subparams.join(" ");
        let method = if ack { "ACK" } else { "NAK" };

        self.push_event(SessionEvent::Cap(if ack {
            CapEvent::Ack(capability.clone())
        } else {
            CapEvent::Nak(capability.clone())
        }));

        // The ack consumers run before the request is settled: SASL must
        // have its wait counter in place when the settle empties the
        // request queue.
        if ack && capability == "sasl" && self.config.sasl_enabled() && self.sasl.is_none() {
            self.sasl_start();
        }

        let settled = self.caps.settle_request(&capability, method);

        if self.caps.is_idle() {
            self.cap_finish();
        }

        settled.map(|_| true)
    }

    /// Send `CAP END` once and mark the session registered.
    fn cap_finish(&mut self) {
        if self.caps.finish(&mut self.sink) {
            self.push_event(SessionEvent::Cap(CapEvent::Done));
            self.registered = true;
            self.push_event(SessionEvent::RegistrationComplete);
        }
    }

    /// Begin SASL authentication after `sasl` was acknowledged.
    fn sasl_start(&mut self) {
        // Negotiation stays open until authentication concludes, even
        // though the sasl request itself is settled.
        self.caps.add_wait();

        let mechanisms = if !self.config.sasl_mechanisms.is_empty() {
            self.config.sasl_mechanisms.join(",")
        } else {
            self.caps.lookup("sasl").flatten().unwrap_or("").to_string()
        };

        let credentials = Credentials {
            authcid: self.config.sasl_username().to_string(),
            password: self.config.password.clone().unwrap_or_default(),
            authzid: self.config.sasl_authzid.clone(),
        };

        let mut sasl = SaslSession::new(&mechanisms, credentials, self.config.allow_plain());
        match sasl.attempt(&mut self.sink) {
            Ok(()) => self.sasl = Some(sasl),
            Err(fatal) => self.fatal(fatal.to_string()),
        }
    }

    /// Retry with the next mechanism after `ERR_SASLFAIL`.
    fn sasl_retry(&mut self) {
        let result = {
            let SessionCore { sasl, sink, .. } = self;
            match sasl.as_mut() {
                Some(session) => session.attempt(sink),
                None => return,
            }
        };

        if let Err(fatal) = result {
            self.fatal(fatal.to_string());
        }
    }
}

/// One IRC connection attempt.
///
/// Construct with the connection shell's [`LineSink`], call
/// [`start`](Self::start) once the transport is up, then feed every
/// received line through [`feed_line`](Self::feed_line) and drain
/// [`take_events`](Self::take_events).
pub struct Session<S: LineSink> {
    parser: Parser<SessionCore<S>>,
    core: SessionCore<S>,
}

impl<S: LineSink> Session<S> {
    /// Create a session with the default handler set installed.
    pub fn new(config: Config, sink: S) -> Self {
        let mut parser = Parser::new();
        add_default_handlers(&mut parser);

        Self {
            parser,
            core: SessionCore {
                sink,
                config,
                caps: Capabilities::new(),
                sasl: None,
                events: VecDeque::new(),
                registered: false,
            },
        }
    }

    /// Send the registration command sequence.
    ///
    /// `CAP LS`, then `PASS` (when a server password is configured),
    /// `USER`, and `NICK`.
    pub fn start(&mut self) {
        let core = &mut self.core;

        core.caps.start(&mut core.sink);

        if let Some(password) = &core.config.server_password {
            if !password.is_empty() {
                let line = format!("PASS {}", password);
                core.sink.send_line(&line);
            }
        }

        let user = format!("USER {} 0 * :{}", core.config.username, core.config.realname);
        core.sink.send_line(&user);

        let nick = format!("NICK {}", core.config.nickname);
        core.sink.send_line(&nick);
    }

    /// Parse and dispatch one received line.
    ///
    /// Errors are logged and recoverable; keep feeding lines.
    pub fn feed_line(&mut self, line: &str) -> Result<bool, ProtocolError> {
        let result = self.parser.parse(&mut self.core, line);

        if let Err(error) = &result {
            debug!("failed to handle line {:?}: {}", line, error);
        }

        result
    }

    /// Drain the queued events, oldest first.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.core.events.drain(..).collect()
    }

    /// Whether capability negotiation has ended (`CAP END` sent).
    pub fn is_registered(&self) -> bool {
        self.core.registered
    }

    /// The capability negotiation state.
    pub fn capabilities(&self) -> &Capabilities {
        &self.core.caps
    }

    /// Look up an advertised capability; see [`Capabilities::lookup`].
    pub fn lookup_capability(&self, name: &str) -> Option<Option<&str>> {
        self.core.caps.lookup(name)
    }

    /// Request a capability with `CAP REQ`.
    pub fn request_capability(&mut self, name: &str) {
        self.core.request_capability(name);
    }

    /// The parser, for registering additional handlers.
    pub fn parser_mut(&mut self) -> &mut Parser<SessionCore<S>> {
        &mut self.parser
    }

    /// Send one pre-formatted line to the server.
    pub fn send_line(&mut self, line: &str) {
        self.core.sink.send_line(line);
    }

    /// The underlying line sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.core.sink
    }

    /// The configuration for this connection attempt.
    pub fn config(&self) -> &Config {
        &self.core.config
    }
}

/// Install the default handler set.
fn add_default_handlers<S: LineSink>(parser: &mut Parser<SessionCore<S>>) {
    parser.set_fallback_handler(handle_fallback::<S>);

    // Core functionality.
    parser.add_handler(MSG_CAP, handle_cap::<S>);
    parser.add_handler(MSG_NOTICE, handle_privmsg::<S>);
    parser.add_handler(MSG_PING, handle_ping::<S>);
    parser.add_handler(MSG_PRIVMSG, handle_privmsg::<S>);

    // Topic stuff.
    parser.add_handlers(&[MSG_TOPIC, RPL_NOTOPIC, RPL_TOPIC], handle_topic::<S>);

    // Post-registration greetings.
    parser.add_handlers(
        &[RPL_WELCOME, RPL_YOURHOST, RPL_CREATED, RPL_MYINFO],
        handle_status_ignore_param0::<S>,
    );

    // LUSERS.
    parser.add_handlers(
        &[
            RPL_LUSERCLIENT,
            RPL_LUSEROP,
            RPL_LUSERUNKNOWN,
            RPL_LUSERCHANNELS,
            RPL_LUSERME,
        ],
        handle_status_ignore_param0::<S>,
    );

    // MOTD.
    parser.add_handlers(
        &[RPL_MOTD, RPL_MOTDSTART, RPL_ENDOFMOTD],
        handle_status_ignore_param0::<S>,
    );

    // SASL stuff.
    parser.add_handler(RPL_LOGGEDIN, handle_sasl_logged_in::<S>);
    parser.add_handler(RPL_LOGGEDOUT, handle_sasl_logged_out::<S>);
    parser.add_handler(ERR_NICKLOCKED, handle_sasl_nick_locked::<S>);
    parser.add_handler(RPL_SASLSUCCESS, handle_sasl_success::<S>);
    parser.add_handler(ERR_SASLFAIL, handle_sasl_failed::<S>);
    parser.add_handler(ERR_SASLTOOLONG, handle_sasl_observed::<S>);
    parser.add_handler(ERR_SASLABORTED, handle_sasl_aborted::<S>);
    parser.add_handler(ERR_SASLALREADY, handle_sasl_already_authed::<S>);
    parser.add_handler(RPL_SASLMECHS, handle_sasl_mechanisms::<S>);
    parser.add_handler(MSG_AUTHENTICATE, handle_sasl_authenticate::<S>);
}

fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&'])
}

/// Re-tag unrecognized commands for display and show them as status.
fn handle_fallback<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    let command = message.command().to_string();
    let _ = message.set_command(format!("unknown command '{}'", command));

    core.push_event(SessionEvent::Status {
        message: message.clone(),
    });

    Ok(true)
}

/// Show a reply as status, dropping the leading nick parameter.
fn handle_status_ignore_param0<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    let params = message.params();
    if params.len() <= 1 {
        return Err(HandlerError::BadParameterCount {
            command: message.command().to_string(),
            expected: 2,
            got: params.len(),
        });
    }

    let rest = params[1..].to_vec();
    message.set_params(Some(rest));

    core.push_event(SessionEvent::Status {
        message: message.clone(),
    });

    Ok(true)
}

fn handle_ping<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    let params = message.params();

    if params.len() == 1 {
        let line = format!("PONG {}", params[0]);
        core.send_line(&line);
    } else {
        core.send_line("PONG");
    }

    Ok(true)
}

fn handle_privmsg<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    let params = message.params();

    if params.len() != 2 {
        warn!("unknown privmsg message format: '{}'", params.join(" "));
        return Ok(false);
    }

    let target_param = params[0].clone();
    let body = strip_formatting(&params[1]);
    let author = message.source().unwrap_or("").to_string();

    let target = if is_channel(&target_param) {
        target_param
    } else {
        // Direct message: file it under the sender's nick.
        match Source::parse(&author) {
            Some(source) if !source.nick().is_empty() => source.nick().to_string(),
            _ => author.clone(),
        }
    };

    let id = message
        .tag("msgid")
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let timestamp = message
        .tag("time")
        .filter(|time| !time.is_empty())
        .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
        .map(|time| time.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let notice = message.command() == MSG_NOTICE;

    core.push_event(SessionEvent::Privmsg {
        target,
        author,
        body,
        id,
        timestamp,
        notice,
    });

    Ok(true)
}

fn handle_topic<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    let command = message.command().to_string();
    let params = message.params();

    let (channel, topic) = match command.as_str() {
        MSG_TOPIC => {
            if params.len() != 2 {
                return Err(HandlerError::BadParameterCount {
                    command,
                    expected: 2,
                    got: params.len(),
                });
            }
            (params[0].clone(), params[1].clone())
        }
        RPL_NOTOPIC => {
            if params.len() != 3 {
                return Err(HandlerError::BadParameterCount {
                    command,
                    expected: 3,
                    got: params.len(),
                });
            }
            (params[1].clone(), String::new())
        }
        RPL_TOPIC => {
            if params.len() != 3 {
                return Err(HandlerError::BadParameterCount {
                    command,
                    expected: 3,
                    got: params.len(),
                });
            }
            (params[1].clone(), params[2].clone())
        }
        _ => {
            warn!("unexpected command {}", command);
            return Ok(false);
        }
    };

    core.push_event(SessionEvent::Topic { channel, topic });

    Ok(true)
}

fn handle_cap<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    let params = message.params();
    if params.len() < 2 {
        return Ok(false);
    }

    // params[0] is our nick, or * before registration; only the
    // subcommand and its parameters matter here.
    let subcommand = params[1].clone();
    let subparams: Vec<String> = params[2..].to_vec();

    match subcommand.as_str() {
        "LS" | "LIST" => {
            if core.caps.ingest_list(&subparams) {
                core.cap_ready();
            }
            Ok(true)
        }
        "ACK" => core.cap_acknowledged(&subparams, true),
        "NAK" => core.cap_acknowledged(&subparams, false),
        _ => Err(HandlerError::UnknownCapSubcommand(subcommand)),
    }
}

fn handle_sasl_logged_in<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    if core.sasl.is_none() {
        return Err(HandlerError::NoSaslSession {
            command: message.command().to_string(),
        });
    }

    // The server confirmed the authenticated identity; nothing to update
    // on our side yet.
    Ok(true)
}

fn handle_sasl_logged_out<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    if core.sasl.is_none() {
        return Err(HandlerError::NoSaslSession {
            command: message.command().to_string(),
        });
    }

    warn!("server sent SASL logged out");

    Ok(true)
}

fn handle_sasl_nick_locked<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    if core.sasl.is_none() {
        return Err(HandlerError::NoSaslSession {
            command: message.command().to_string(),
        });
    }

    let reason = message.params().join(" ");
    core.fatal(SaslFatal::NickLocked(reason).to_string());

    Ok(false)
}

fn handle_sasl_success<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    match &core.sasl {
        Some(sasl) => {
            info!(
                "successfully authenticated with SASL '{}' mechanism",
                sasl.current_mechanism().unwrap_or("?")
            );
        }
        None => {
            return Err(HandlerError::NoSaslSession {
                command: message.command().to_string(),
            });
        }
    }

    core.caps.remove_wait();
    if core.caps.is_idle() {
        core.cap_finish();
    }

    Ok(true)
}

fn handle_sasl_failed<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    if core.sasl.is_none() {
        return Err(HandlerError::NoSaslSession {
            command: message.command().to_string(),
        });
    }

    core.sasl_retry();

    Ok(true)
}

/// Replies that are observed but drive no transition (`ERR_SASLTOOLONG`).
fn handle_sasl_observed<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    if core.sasl.is_none() {
        return Err(HandlerError::NoSaslSession {
            command: message.command().to_string(),
        });
    }

    Ok(true)
}

fn handle_sasl_aborted<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    if core.sasl.is_none() {
        return Err(HandlerError::NoSaslSession {
            command: message.command().to_string(),
        });
    }

    // Sent when the client sends `AUTHENTICATE *`, which we never do.
    warn!("the server claims we aborted SASL authentication");

    Ok(true)
}

fn handle_sasl_already_authed<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    if core.sasl.is_none() {
        return Err(HandlerError::NoSaslSession {
            command: message.command().to_string(),
        });
    }

    warn!("server claims we tried to SASL authenticate again");

    Ok(true)
}

/// `RPL_SASLMECHS` is logged only; the remaining-mechanism set is not
/// adjusted, since that would need tracking of already-tried mechanisms
/// against servers that dump their entire list.
fn handle_sasl_mechanisms<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    if core.sasl.is_none() {
        return Err(HandlerError::NoSaslSession {
            command: message.command().to_string(),
        });
    }

    let params = message.params();
    if params.is_empty() {
        info!("server sent an empty list of SASL mechanisms");
    } else {
        info!("server sent the following SASL mechanisms: {}", params.join(" "));
    }

    Ok(true)
}

fn handle_sasl_authenticate<S: LineSink>(
    core: &mut SessionCore<S>,
    message: &mut Message,
) -> Result<bool, HandlerError> {
    let params = message.params();
    if params.len() != 1 {
        return Err(HandlerError::BadParameterCount {
            command: message.command().to_string(),
            expected: 1,
            got: params.len(),
        });
    }
    let payload = params[0].clone();

    let result = {
        let SessionCore { sasl, sink, .. } = core;
        match sasl.as_mut() {
            Some(session) => session.handle_payload(sink, &payload),
            None => {
                return Err(HandlerError::NoSaslSession {
                    command: MSG_AUTHENTICATE.to_string(),
                });
            }
        }
    };

    if let Err(fatal) = result {
        core.fatal(fatal.to_string());
        return Ok(false);
    }

    Ok(true)
}
