//! SASL authentication over `AUTHENTICATE`.
//!
//! The session driver here owns one authentication attempt per
//! connection: it picks a mechanism from the allowed set, runs the
//! challenge/response exchange through a [`MechanismClient`], and retries
//! with the next mechanism when the server reports failure. Payloads ride
//! base64-encoded on `AUTHENTICATE` lines, chunked at 400 bytes in both
//! directions.
//!
//! The set of remaining mechanisms is kept as a single string with every
//! name wrapped in single spaces. Removing an attempted mechanism removes
//! exactly `" <name> "`, which cannot bite a different mechanism that
//! shares a prefix or suffix: with `" EAP-AES128  EAP-AES128-PLUS "`,
//! removing `" EAP-AES128 "` leaves `" EAP-AES128-PLUS "` intact.
//!
//! # Reference
//! - IRCv3 SASL: <https://ircv3.net/specs/extensions/sasl-3.2>

mod mechanism;
mod scram;

pub use self::mechanism::{
    suggest_mechanism, Credentials, MechanismClient, SaslMechanism, Step, StepError,
};
pub use self::scram::{ScramClient, ScramError};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;
use tracing::info;

use crate::session::LineSink;

/// Maximum length of a single `AUTHENTICATE` payload chunk.
///
/// Servers slice longer payloads into chunks of exactly this many bytes;
/// a shorter final chunk (or a lone `+`) marks the end.
pub const AUTHENTICATE_CHUNK_SIZE: usize = 400;

/// Fatal authentication failures.
///
/// Unlike parse and capability errors these end the connection: the
/// session surfaces them on its error channel and the shell disconnects.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SaslFatal {
    /// The chosen mechanism could not be initialized.
    #[error("Failed to setup SASL client: {0}")]
    Setup(#[from] StepError),

    /// Every candidate mechanism has been tried or disallowed.
    #[error("No valid SASL mechanisms found")]
    NoMechanisms,

    /// A mechanism step rejected the exchange.
    #[error("SASL authentication failed: {0}")]
    Failed(String),

    /// The server reported the nick as locked; retrying cannot help.
    #[error("Nick name is locked: {0}")]
    NickLocked(String),
}

/// One SASL authentication attempt.
///
/// Created when the `sasl` capability is acknowledged; dropped with the
/// connection or once authentication concludes.
#[derive(Clone, Debug)]
pub struct SaslSession {
    /// Space-padded removable set of mechanisms left to try.
    mechanisms: String,
    current_mechanism: Option<String>,
    inbound_buffer: String,
    client: Option<MechanismClient>,
    credentials: Credentials,
    allow_plain: bool,
}

impl SaslSession {
    /// Create a session from a comma-separated mechanism list.
    ///
    /// `mechanisms` is the user-configured allow-list or, when that is
    /// empty, the server-advertised value of the `sasl` capability.
    /// `allow_plain` permits the PLAIN mechanism; it is false only on
    /// connections without TLS where the user has not opted in to
    /// clear-text credentials.
    pub fn new(mechanisms: &str, credentials: Credentials, allow_plain: bool) -> Self {
        let mut padded = String::new();
        for part in mechanisms.split(',').filter(|p| !p.is_empty()) {
            padded.push(' ');
            padded.push_str(part);
            padded.push(' ');
        }

        Self {
            mechanisms: padded,
            current_mechanism: None,
            inbound_buffer: String::new(),
            client: None,
            credentials,
            allow_plain,
        }
    }

    /// The mechanism currently being attempted.
    pub fn current_mechanism(&self) -> Option<&str> {
        self.current_mechanism.as_deref()
    }

    /// Pick the next mechanism and send `AUTHENTICATE <mechanism>`.
    ///
    /// When a previous attempt is in flight it is stripped from the
    /// remaining set first, so this doubles as the retry path after
    /// `ERR_SASLFAIL`.
    pub fn attempt<S: LineSink>(&mut self, sink: &mut S) -> Result<(), SaslFatal> {
        if let Some(failed) = self.current_mechanism.take() {
            info!("SASL '{}' mechanism failed", failed);
            self.mechanisms = self.mechanisms.replace(&format!(" {} ", failed), "");
        }

        let mechanism = loop {
            let Some(candidate) = suggest_mechanism(&self.mechanisms) else {
                return Err(SaslFatal::NoMechanisms);
            };

            if candidate == SaslMechanism::Plain && !self.allow_plain {
                info!("skipping SASL 'PLAIN' as it's not allowed without tls");
                self.mechanisms = self.mechanisms.replace(" PLAIN ", "");
                continue;
            }

            break candidate;
        };

        info!("trying SASL '{}' mechanism", mechanism);

        self.current_mechanism = Some(mechanism.as_str().to_string());
        self.client = Some(MechanismClient::start(&mechanism, &self.credentials)?);

        sink.send_line(&format!("AUTHENTICATE {}", mechanism));

        Ok(())
    }

    /// Feed one server `AUTHENTICATE` payload.
    ///
    /// Fragments accumulate until a lone `+` or a fragment shorter than
    /// [`AUTHENTICATE_CHUNK_SIZE`] completes the challenge; the assembled
    /// buffer is then base64-decoded (an empty buffer is an empty
    /// challenge) and stepped through the mechanism client. The step's
    /// payload, if any, is sent back encoded and chunked; no payload
    /// sends `AUTHENTICATE +`.
    pub fn handle_payload<S: LineSink>(
        &mut self,
        sink: &mut S,
        payload: &str,
    ) -> Result<(), SaslFatal> {
        let mut done = false;

        if !payload.starts_with('+') {
            self.inbound_buffer.push_str(payload);

            if payload.len() < AUTHENTICATE_CHUNK_SIZE {
                done = true;
            }
        } else {
            // The server sent a + which is an empty message, or the final
            // message ended on a chunk boundary.
            done = true;
        }

        if !done {
            return Ok(());
        }

        let input = if self.inbound_buffer.is_empty() {
            Vec::new()
        } else {
            let decoded = BASE64
                .decode(self.inbound_buffer.as_bytes())
                .map_err(|e| SaslFatal::Failed(e.to_string()))?;
            self.inbound_buffer.clear();
            decoded
        };

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| SaslFatal::Failed("no mechanism in progress".to_string()))?;

        let step = client
            .step(&input)
            .map_err(|e| SaslFatal::Failed(e.to_string()))?;

        let outbound = match step {
            Step::NeedsMore(payload) | Step::Done(payload) => payload,
        };

        match outbound {
            Some(bytes) if !bytes.is_empty() => {
                let encoded = BASE64.encode(&bytes);
                for chunk in chunk_payload(&encoded) {
                    sink.send_line(&format!("AUTHENTICATE {}", chunk));
                }
                if encoded.len() % AUTHENTICATE_CHUNK_SIZE == 0 {
                    sink.send_line("AUTHENTICATE +");
                }
            }
            _ => sink.send_line("AUTHENTICATE +"),
        }

        Ok(())
    }
}

/// Split an encoded payload into chunks for transmission.
pub fn chunk_payload(encoded: &str) -> impl Iterator<Item = &str> {
    encoded.as_bytes().chunks(AUTHENTICATE_CHUNK_SIZE).map(|chunk| {
        // Safe because base64 is always ASCII
        std::str::from_utf8(chunk).unwrap()
    })
}
