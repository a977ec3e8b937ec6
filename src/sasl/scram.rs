//! SCRAM-SHA-256 SASL mechanism (RFC 7677).
//!
//! Challenge-response authentication. The client proves knowledge of the
//! password without sending it; the server proves it holds the derived
//! keys via a signature the client verifies in the final step.
//!
//! # SCRAM Protocol Flow
//!
//! 1. Client sends `client-first-message`: `n,,n=user,r=nonce`
//! 2. Server sends `server-first-message`: `r=nonce+server,s=salt,i=iterations`
//! 3. Client sends `client-final-message`: `c=biws,r=nonce+server,p=proof`
//! 4. Server sends `server-final-message`: `v=verifier`
//!
//! # Reference
//! - RFC 7677: <https://tools.ietf.org/html/rfc7677>
//! - RFC 5802 (SCRAM core): <https://tools.ietf.org/html/rfc5802>

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::mechanism::Step;

type HmacSha256 = Hmac<Sha256>;

/// SCRAM-SHA-256 client state machine.
///
/// Operates on raw (already base64-decoded) server messages; the SASL
/// session driver owns the outer `AUTHENTICATE` encoding.
#[derive(Clone, Debug)]
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    state: ScramState,
}

/// Internal state of SCRAM authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ScramState {
    /// Initial state, client-first not yet produced.
    Initial,
    /// Sent client-first, awaiting server-first.
    ClientFirstSent {
        /// The client-first-message-bare, kept for the AuthMessage.
        client_first_bare: String,
    },
    /// Sent client-final, awaiting the server's verifier.
    ClientFinalSent {
        /// Expected server signature.
        server_signature: Vec<u8>,
    },
    /// Authentication complete.
    Complete,
}

/// Errors that can occur during SCRAM authentication.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScramError {
    /// The system random source failed while generating the nonce.
    #[error("failed to generate client nonce")]
    NonceGeneration,

    /// A server message was not valid UTF-8 or base64.
    #[error("invalid encoding in server message")]
    InvalidEncoding,

    /// The server nonce does not extend the client nonce.
    #[error("server nonce does not match client nonce")]
    NonceMismatch,

    /// Missing nonce in the server-first-message.
    #[error("missing nonce in server message")]
    MissingNonce,

    /// Missing salt in the server-first-message.
    #[error("missing salt in server message")]
    MissingSalt,

    /// Missing iteration count in the server-first-message.
    #[error("missing iteration count")]
    MissingIterations,

    /// The iteration count was not a number.
    #[error("invalid iteration count")]
    InvalidIterations,

    /// The server-final-message carried an `e=` error attribute.
    #[error("server rejected authentication: {0}")]
    ServerRejected(String),

    /// The server's signature did not verify.
    #[error("server signature verification failed")]
    ServerVerificationFailed,

    /// A message arrived out of protocol order.
    #[error("unexpected SCRAM message")]
    UnexpectedMessage,

    /// A crypto primitive rejected its input.
    #[error("crypto primitive failure")]
    Crypto,
}

impl ScramClient {
    /// Create a new SCRAM client with the given credentials and a fresh
    /// random nonce.
    pub fn new(username: &str, password: &str) -> Result<Self, ScramError> {
        let mut raw = [0u8; 18];
        getrandom::getrandom(&mut raw).map_err(|_| ScramError::NonceGeneration)?;

        Ok(Self::with_nonce(username, password, BASE64.encode(raw)))
    }

    fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce,
            state: ScramState::Initial,
        }
    }

    /// Advance the exchange with one decoded server message.
    ///
    /// The first call takes empty input and produces the
    /// client-first-message.
    pub fn step(&mut self, input: &[u8]) -> Result<Step, ScramError> {
        let state = std::mem::replace(&mut self.state, ScramState::Complete);

        match state {
            ScramState::Initial => {
                let bare = format!(
                    "n={},r={}",
                    escape_username(&self.username),
                    self.client_nonce
                );
                // gs2-header: n,, (no channel binding, no authzid)
                let full = format!("n,,{}", bare);

                self.state = ScramState::ClientFirstSent {
                    client_first_bare: bare,
                };

                Ok(Step::NeedsMore(Some(full.into_bytes())))
            }
            ScramState::ClientFirstSent { client_first_bare } => {
                let server_first =
                    std::str::from_utf8(input).map_err(|_| ScramError::InvalidEncoding)?;

                self.client_final(&client_first_bare, server_first)
            }
            ScramState::ClientFinalSent { server_signature } => {
                let server_final =
                    std::str::from_utf8(input).map_err(|_| ScramError::InvalidEncoding)?;

                for attr in server_final.split(',') {
                    if let Some(reason) = attr.strip_prefix("e=") {
                        return Err(ScramError::ServerRejected(reason.to_string()));
                    }
                    if let Some(verifier) = attr.strip_prefix("v=") {
                        let verifier = BASE64
                            .decode(verifier)
                            .map_err(|_| ScramError::InvalidEncoding)?;

                        if verifier != server_signature {
                            return Err(ScramError::ServerVerificationFailed);
                        }

                        self.state = ScramState::Complete;
                        return Ok(Step::Done(None));
                    }
                }

                Err(ScramError::UnexpectedMessage)
            }
            ScramState::Complete => Err(ScramError::UnexpectedMessage),
        }
    }

    /// Process the server-first-message and build the client-final-message.
    fn client_final(
        &mut self,
        client_first_bare: &str,
        server_first: &str,
    ) -> Result<Step, ScramError> {
        // Parse server-first-message: r=nonce,s=salt,i=iterations
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|_| ScramError::InvalidEncoding)?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| ScramError::InvalidIterations)?,
                );
            }
        }

        let nonce = nonce.ok_or(ScramError::MissingNonce)?;
        let salt = salt.ok_or(ScramError::MissingSalt)?;
        let iterations = iterations.ok_or(ScramError::MissingIterations)?;

        if !nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceMismatch);
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        )
        .map_err(|_| ScramError::Crypto)?;

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);

        // c=biws is the base64 of the gs2-header "n,,"
        let client_final_without_proof = format!("c=biws,r={}", nonce);
        let auth_message = format!(
            "{},{},{}",
            client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac_sha256(stored_key.as_slice(), auth_message.as_bytes())?;
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(key, sig)| key ^ sig)
            .collect();

        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes())?;

        let client_final = format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(&client_proof)
        );

        self.state = ScramState::ClientFinalSent { server_signature };

        Ok(Step::NeedsMore(Some(client_final.into_bytes())))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ScramError::Crypto)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Escape `=` and `,` in a SCRAM username per RFC 5802.
fn escape_username(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7677 section 3 test vector.
    const USERNAME: &str = "user";
    const PASSWORD: &str = "pencil";
    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &[u8] =
        b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const SERVER_FINAL: &[u8] = b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    fn vector_client() -> ScramClient {
        ScramClient::with_nonce(USERNAME, PASSWORD, CLIENT_NONCE.to_string())
    }

    fn payload(step: Step) -> Vec<u8> {
        match step {
            Step::NeedsMore(Some(payload)) | Step::Done(Some(payload)) => payload,
            other => panic!("expected a payload, got {:?}", other),
        }
    }

    #[test]
    fn test_client_first_message() {
        let mut client = vector_client();
        let first = payload(client.step(b"").unwrap());
        assert_eq!(first, b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
    }

    #[test]
    fn test_client_final_message_matches_vector() {
        let mut client = vector_client();
        client.step(b"").unwrap();

        let client_final = payload(client.step(SERVER_FIRST).unwrap());
        let expected: &[u8] = b"c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
        assert_eq!(client_final, expected);
    }

    #[test]
    fn test_server_final_verifies() {
        let mut client = vector_client();
        client.step(b"").unwrap();
        client.step(SERVER_FIRST).unwrap();

        match client.step(SERVER_FINAL).unwrap() {
            Step::Done(None) => {}
            other => panic!("expected Done with no payload, got {:?}", other),
        }
    }

    #[test]
    fn test_server_final_bad_verifier() {
        let mut client = vector_client();
        client.step(b"").unwrap();
        client.step(SERVER_FIRST).unwrap();

        let err = client
            .step(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .unwrap_err();
        assert_eq!(err, ScramError::ServerVerificationFailed);
    }

    #[test]
    fn test_server_error_attribute() {
        let mut client = vector_client();
        client.step(b"").unwrap();
        client.step(SERVER_FIRST).unwrap();

        let err = client.step(b"e=invalid-proof").unwrap_err();
        assert_eq!(err, ScramError::ServerRejected("invalid-proof".to_string()));
    }

    #[test]
    fn test_nonce_mismatch_rejected() {
        let mut client = vector_client();
        client.step(b"").unwrap();

        let err = client
            .step(b"r=completely-different,s=c2FsdA==,i=4096")
            .unwrap_err();
        assert_eq!(err, ScramError::NonceMismatch);
    }

    #[test]
    fn test_missing_attributes_rejected() {
        let mut client = vector_client();
        client.step(b"").unwrap();
        assert_eq!(
            client.step(b"s=c2FsdA==,i=4096").unwrap_err(),
            ScramError::MissingNonce
        );
    }

    #[test]
    fn test_step_after_complete_rejected() {
        let mut client = vector_client();
        client.step(b"").unwrap();
        client.step(SERVER_FIRST).unwrap();
        client.step(SERVER_FINAL).unwrap();

        assert_eq!(client.step(b"").unwrap_err(), ScramError::UnexpectedMessage);
    }

    #[test]
    fn test_escape_username() {
        assert_eq!(escape_username("a=b,c"), "a=3Db=2Cc");
        assert_eq!(escape_username("plain"), "plain");
    }
}
