//! IRCv3 capability negotiation state.
//!
//! Tracks the capabilities a server advertises across `CAP LS`/`LIST`
//! replies, the requests issued with `CAP REQ`, and the wait counter that
//! lets a dependent subsystem (SASL) hold negotiation open after its own
//! request has already been acknowledged. The session drives the message
//! flow; this type owns the bookkeeping and the exactly-once `CAP END`
//! transition.
//!
//! # Reference
//! - IRCv3 Capability Negotiation: <https://ircv3.net/specs/extensions/capability-negotiation>

use std::collections::HashMap;

use tracing::debug;

use crate::error::HandlerError;
use crate::session::LineSink;

/// The version sent with `CAP LS` at the start of negotiation.
pub const CAP_LS_VERSION: &str = "302";

/// Capability negotiation events, in emission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapEvent {
    /// The server finished listing its capabilities.
    Ready,
    /// The server acknowledged a `CAP REQ`. Carries the exact capability
    /// string that was requested.
    Ack(String),
    /// The server rejected a `CAP REQ`. Carries the exact capability
    /// string that was requested.
    Nak(String),
    /// All requests have been resolved and `CAP END` was sent.
    Done,
}

/// Capability negotiation bookkeeping for one connection attempt.
#[derive(Debug, Default)]
pub struct Capabilities {
    advertised: HashMap<String, Option<String>>,
    pending_requests: Vec<String>,
    wait_counter: u32,
    finished: bool,
}

impl Capabilities {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `CAP LS` to begin negotiation.
    pub fn start<S: LineSink>(&mut self, sink: &mut S) {
        sink.send_line(&format!("CAP LS {}", CAP_LS_VERSION));
    }

    /// Ingest the subparameters of one `LS`/`LIST` reply.
    ///
    /// A `*` in the first subparameter marks a continuation, with the
    /// capability list in the second. Returns `true` when the listing is
    /// complete and the `ready` event should fire.
    ///
    /// Tokens are `key[=value]`; a later token with an already-seen key
    /// overwrites it.
    pub fn ingest_list(&mut self, subparams: &[String]) -> bool {
        let (done, list) = if subparams.len() > 1 && subparams[0] == "*" {
            (false, subparams[1].as_str())
        } else {
            (true, subparams.first().map(String::as_str).unwrap_or(""))
        };

        for token in list.split(' ').filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((key, value)) => {
                    self.advertised
                        .insert(key.to_string(), Some(value.to_string()));
                }
                None => {
                    self.advertised.insert(token.to_string(), None);
                }
            }
        }

        done
    }

    /// Request a capability with `CAP REQ`.
    ///
    /// Valid once the listing is ready; may be called from ready-event
    /// processing.
    pub fn request<S: LineSink>(&mut self, sink: &mut S, capability: &str) {
        self.pending_requests.push(capability.to_string());

        sink.send_line(&format!("CAP REQ :{}", capability));
    }

    /// Default ready behavior: request `cap-notify` when advertised.
    pub fn default_ready<S: LineSink>(&mut self, sink: &mut S) {
        if self.lookup("cap-notify").is_some() {
            self.request(sink, "cap-notify");
        }
    }

    /// Settle a request after `ACK`/`NAK`.
    ///
    /// Removes the first pending request equal to the exact acknowledged
    /// string. An acknowledgment for a string that was never requested is
    /// a protocol error, reported but harmless.
    pub fn settle_request(
        &mut self,
        capability: &str,
        method: &'static str,
    ) -> Result<(), HandlerError> {
        match self.pending_requests.iter().position(|r| r == capability) {
            Some(index) => {
                self.pending_requests.remove(index);
                Ok(())
            }
            None => Err(HandlerError::UnknownCapability {
                method,
                capability: capability.to_string(),
            }),
        }
    }

    /// Look up an advertised capability.
    ///
    /// Returns `None` when the capability was not advertised at all, and
    /// `Some(None)` when it was advertised without a value.
    pub fn lookup(&self, name: &str) -> Option<Option<&str>> {
        self.advertised.get(name).map(|value| value.as_deref())
    }

    /// Hold negotiation open for a dependent subsystem.
    pub fn add_wait(&mut self) {
        self.wait_counter += 1;
    }

    /// Release one hold added with [`add_wait`](Self::add_wait).
    pub fn remove_wait(&mut self) {
        if self.wait_counter == 0 {
            debug!("capability wait counter removed with none outstanding");
            return;
        }

        self.wait_counter -= 1;
    }

    /// Whether negotiation may finish: no pending requests and no waits.
    pub fn is_idle(&self) -> bool {
        self.pending_requests.is_empty() && self.wait_counter == 0
    }

    /// The requests sent with `CAP REQ` and not yet acknowledged.
    pub fn pending_requests(&self) -> &[String] {
        &self.pending_requests
    }

    /// Whether `CAP END` has been sent.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Send `CAP END`, ending negotiation.
    ///
    /// Fires at most once per connection attempt; returns whether this
    /// call was the one that fired.
    pub fn finish<S: LineSink>(&mut self, sink: &mut S) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;

        sink.send_line("CAP END");

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_start_sends_cap_ls() {
        let mut sink: Vec<String> = Vec::new();
        let mut caps = Capabilities::new();
        caps.start(&mut sink);
        assert_eq!(sink, vec!["CAP LS 302"]);
    }

    #[test]
    fn test_ingest_list_final() {
        let mut caps = Capabilities::new();
        assert!(caps.ingest_list(&strings(&["sasl=PLAIN,EXTERNAL multi-prefix"])));

        assert_eq!(caps.lookup("sasl"), Some(Some("PLAIN,EXTERNAL")));
        assert_eq!(caps.lookup("multi-prefix"), Some(None));
        assert_eq!(caps.lookup("away-notify"), None);
    }

    #[test]
    fn test_ingest_list_continuation() {
        let mut caps = Capabilities::new();
        assert!(!caps.ingest_list(&strings(&["*", "sasl=PLAIN cap-notify"])));
        assert!(caps.ingest_list(&strings(&["multi-prefix"])));

        assert_eq!(caps.lookup("sasl"), Some(Some("PLAIN")));
        assert_eq!(caps.lookup("cap-notify"), Some(None));
        assert_eq!(caps.lookup("multi-prefix"), Some(None));
    }

    #[test]
    fn test_ingest_list_last_write_wins() {
        let mut caps = Capabilities::new();
        caps.ingest_list(&strings(&["*", "sasl=PLAIN"]));
        caps.ingest_list(&strings(&["sasl=PLAIN,EXTERNAL"]));

        assert_eq!(caps.lookup("sasl"), Some(Some("PLAIN,EXTERNAL")));
    }

    #[test]
    fn test_request_tracks_pending() {
        let mut sink: Vec<String> = Vec::new();
        let mut caps = Capabilities::new();
        caps.request(&mut sink, "sasl");

        assert_eq!(sink, vec!["CAP REQ :sasl"]);
        assert_eq!(caps.pending_requests(), ["sasl"]);
        assert!(!caps.is_idle());
    }

    #[test]
    fn test_settle_request_exact_match() {
        let mut sink: Vec<String> = Vec::new();
        let mut caps = Capabilities::new();
        caps.request(&mut sink, "sasl");
        caps.request(&mut sink, "cap-notify");

        caps.settle_request("sasl", "ACK").unwrap();
        assert_eq!(caps.pending_requests(), ["cap-notify"]);
    }

    #[test]
    fn test_settle_unknown_request_is_error() {
        let mut caps = Capabilities::new();
        let err = caps.settle_request("away-notify", "NAK").unwrap_err();
        assert_eq!(
            err,
            HandlerError::UnknownCapability {
                method: "NAK",
                capability: "away-notify".to_string(),
            }
        );
    }

    #[test]
    fn test_default_ready_requests_cap_notify() {
        let mut sink: Vec<String> = Vec::new();
        let mut caps = Capabilities::new();

        caps.default_ready(&mut sink);
        assert!(sink.is_empty());

        caps.ingest_list(&strings(&["cap-notify"]));
        caps.default_ready(&mut sink);
        assert_eq!(sink, vec!["CAP REQ :cap-notify"]);
    }

    #[test]
    fn test_finish_fires_once() {
        let mut sink: Vec<String> = Vec::new();
        let mut caps = Capabilities::new();

        assert!(caps.finish(&mut sink));
        assert!(!caps.finish(&mut sink));
        assert_eq!(sink, vec!["CAP END"]);
    }

    #[test]
    fn test_wait_counter_blocks_idle() {
        let mut caps = Capabilities::new();
        assert!(caps.is_idle());

        caps.add_wait();
        assert!(!caps.is_idle());

        caps.remove_wait();
        assert!(caps.is_idle());

        // Unbalanced removes are reported, not fatal.
        caps.remove_wait();
        assert!(caps.is_idle());
    }
}
