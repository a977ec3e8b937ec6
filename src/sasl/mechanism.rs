//! SASL mechanism selection and client-side stepping.
//!
//! # Supported Mechanisms
//!
//! - **PLAIN**: Simple username/password authentication (RFC 4616)
//! - **EXTERNAL**: Certificate-based authentication (client cert)
//! - **SCRAM-SHA-256**: Challenge-response authentication (RFC 7677)
//!
//! # Reference
//! - IRCv3 SASL: <https://ircv3.net/specs/extensions/sasl-3.2>
//! - RFC 4616 (PLAIN): <https://tools.ietf.org/html/rfc4616>
//! - IANA mechanism registry:
//!   <https://www.iana.org/assignments/sasl-mechanisms/sasl-mechanisms.xhtml>

use thiserror::Error;

use super::scram::{ScramClient, ScramError};

/// Known SASL authentication mechanisms.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SaslMechanism {
    /// PLAIN mechanism (RFC 4616) - simple username/password.
    Plain,
    /// EXTERNAL mechanism - uses the TLS client certificate.
    External,
    /// SCRAM-SHA-256 mechanism (RFC 7677).
    ScramSha256,
    /// Unknown or unsupported mechanism.
    Unknown(String),
}

impl SaslMechanism {
    /// Parse a mechanism name string.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Self::Plain,
            "EXTERNAL" => Self::External,
            "SCRAM-SHA-256" => Self::ScramSha256,
            _ => Self::Unknown(name.to_owned()),
        }
    }

    /// Returns the canonical name of this mechanism.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain => "PLAIN",
            Self::External => "EXTERNAL",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::Unknown(s) => s,
        }
    }

    /// Check if this mechanism has a client-side implementation.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Plain | Self::External | Self::ScramSha256)
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggest the best supported mechanism from a space-padded candidate set.
///
/// `padded` is the removable-set form used by the session driver: every
/// mechanism name wrapped in single spaces, e.g. `" PLAIN  EXTERNAL "`.
/// Preference order: EXTERNAL > SCRAM-SHA-256 > PLAIN.
pub fn suggest_mechanism(padded: &str) -> Option<SaslMechanism> {
    for mechanism in [
        SaslMechanism::External,
        SaslMechanism::ScramSha256,
        SaslMechanism::Plain,
    ] {
        if padded.contains(&format!(" {} ", mechanism.as_str())) {
            return Some(mechanism);
        }
    }

    None
}

/// Credentials a mechanism client may draw on.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// The authentication identity.
    pub authcid: String,
    /// The password, empty when not configured.
    pub password: String,
    /// Authorization identity for EXTERNAL, when it differs from the
    /// certificate identity.
    pub authzid: Option<String>,
}

/// Outcome of one mechanism step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// The exchange needs more server input. The payload, if any, must be
    /// sent to the server first.
    NeedsMore(Option<Vec<u8>>),
    /// The exchange is complete on the client side.
    Done(Option<Vec<u8>>),
}

/// Errors from starting or stepping a mechanism client.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepError {
    /// The mechanism has no client-side implementation.
    #[error("mechanism {0} is not supported")]
    Unsupported(String),

    /// SCRAM processing failed.
    #[error(transparent)]
    Scram(#[from] ScramError),
}

/// A client-side session for one mechanism attempt.
#[derive(Clone, Debug)]
pub enum MechanismClient {
    /// PLAIN: emits the credentials in a single step.
    Plain(Credentials),
    /// EXTERNAL: emits the optional authorization identity.
    External {
        /// Authorization identity, when configured.
        authzid: Option<String>,
    },
    /// SCRAM-SHA-256 challenge-response exchange.
    Scram(ScramClient),
}

impl MechanismClient {
    /// Initialize a client session for `mechanism`.
    pub fn start(mechanism: &SaslMechanism, credentials: &Credentials) -> Result<Self, StepError> {
        match mechanism {
            SaslMechanism::Plain => Ok(Self::Plain(credentials.clone())),
            SaslMechanism::External => Ok(Self::External {
                authzid: credentials.authzid.clone(),
            }),
            SaslMechanism::ScramSha256 => Ok(Self::Scram(ScramClient::new(
                &credentials.authcid,
                &credentials.password,
            )?)),
            SaslMechanism::Unknown(name) => Err(StepError::Unsupported(name.clone())),
        }
    }

    /// Advance the exchange with one decoded server challenge.
    ///
    /// An empty challenge is valid; client-first mechanisms ignore it and
    /// produce their initial payload.
    pub fn step(&mut self, input: &[u8]) -> Result<Step, StepError> {
        match self {
            Self::Plain(credentials) => {
                // authzid NUL authcid NUL password, with an empty authzid:
                // the user is logging in on their own behalf.
                let mut payload =
                    Vec::with_capacity(credentials.authcid.len() + credentials.password.len() + 2);
                payload.push(0);
                payload.extend_from_slice(credentials.authcid.as_bytes());
                payload.push(0);
                payload.extend_from_slice(credentials.password.as_bytes());

                Ok(Step::Done(Some(payload)))
            }
            Self::External { authzid } => {
                let payload = authzid
                    .as_ref()
                    .filter(|id| !id.is_empty())
                    .map(|id| id.as_bytes().to_vec());

                Ok(Step::Done(payload))
            }
            Self::Scram(client) => Ok(client.step(input)?),
        }
    }
}
