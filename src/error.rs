//! Error types for the protocol engine.
//!
//! Everything in here is recoverable at the read-loop level except where
//! noted: the IRC protocol tolerates unrecognized lines, so parse and
//! dispatch failures are logged and the loop keeps reading. Fatal
//! authentication failures travel through the session's event queue
//! instead, because they must terminate the connection.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Errors produced while parsing and dispatching a single server line.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The line did not match the wire grammar.
    #[error("failed to parse line {line:?}")]
    Parse {
        /// The raw line that failed to parse.
        line: String,
    },

    /// No handler was registered for the command and no fallback was set.
    #[error("no handler found for command {0} and no fallback handler set")]
    NoHandler(String),

    /// The resolved handler rejected the message.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Errors reported by message handlers.
///
/// Handlers return these to describe malformed or unexpected input; the
/// dispatcher logs them and continues with the next line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandlerError {
    /// The fallback handler declined the command.
    #[error("no handler for command {0}")]
    NoHandler(String),

    /// An `ACK`/`NAK` referenced a capability that was never requested.
    #[error("received CAP {method} for unknown capability {capability}")]
    UnknownCapability {
        /// `"ACK"` or `"NAK"`.
        method: &'static str,
        /// The capability string the server sent.
        capability: String,
    },

    /// A `CAP` subcommand this engine does not handle.
    #[error("no handler for CAP subcommand {0}")]
    UnknownCapSubcommand(String),

    /// A message arrived with the wrong number of parameters.
    #[error("received {command} with {got} parameters, expected {expected}")]
    BadParameterCount {
        /// The command that was malformed.
        command: String,
        /// How many parameters the handler requires.
        expected: usize,
        /// How many parameters actually arrived.
        got: usize,
    },

    /// A SASL-related reply arrived while no SASL session was in progress.
    #[error("{command} received with no SASL session in progress")]
    NoSaslSession {
        /// The command or numeric that arrived unexpectedly.
        command: String,
    },
}

/// Errors from constructing or mutating a [`Message`](crate::Message).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageError {
    /// The command of a message may never be empty.
    #[error("message command may not be empty")]
    EmptyCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::Parse {
            line: "@@ nope".to_string(),
        };
        assert_eq!(format!("{}", err), "failed to parse line \"@@ nope\"");

        let err = HandlerError::BadParameterCount {
            command: "TOPIC".to_string(),
            expected: 2,
            got: 1,
        };
        assert_eq!(
            format!("{}", err),
            "received TOPIC with 1 parameters, expected 2"
        );
    }

    #[test]
    fn test_handler_error_conversion() {
        let err: ProtocolError = HandlerError::NoHandler("BOOP".to_string()).into();
        assert!(matches!(err, ProtocolError::Handler(_)));
    }
}
