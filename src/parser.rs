//! Line parsing and handler dispatch.
//!
//! The parser owns a table of message handlers keyed by exact command
//! string (numeric replies are opaque strings, not integers) plus a
//! fallback for everything else. Each inbound line is matched against the
//! wire grammar, built into a [`Message`], and handed to exactly one
//! handler along with the dispatch context.
//!
//! Lines are processed strictly in arrival order, one at a time; handlers
//! must not assume re-entrancy.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{HandlerError, ProtocolError};
use crate::message::{Message, ParsedLine};

/// A message handler.
///
/// Returns whether the message was handled. Errors are reported to the
/// caller of [`Parser::parse`], which logs them and keeps reading; they
/// never abort the read loop.
pub type MessageHandler<C> = Box<dyn Fn(&mut C, &mut Message) -> Result<bool, HandlerError>>;

/// Plain-function form of a handler, usable with [`Parser::add_handlers`].
pub type MessageHandlerFn<C> = fn(&mut C, &mut Message) -> Result<bool, HandlerError>;

/// Parses raw lines and dispatches them to registered handlers.
///
/// `C` is the dispatch context passed to every handler, typically the
/// session owning the connection-attempt state.
pub struct Parser<C> {
    handlers: HashMap<String, MessageHandler<C>>,
    fallback: MessageHandler<C>,
}

impl<C: 'static> Parser<C> {
    /// Create a parser with no registered handlers.
    ///
    /// The initial fallback fails every message with
    /// [`HandlerError::NoHandler`].
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Box::new(|_ctx, message| {
                Err(HandlerError::NoHandler(message.command().to_string()))
            }),
        }
    }

    /// Register `handler` for an exact command string.
    ///
    /// A previous handler for the same command is replaced.
    pub fn add_handler(
        &mut self,
        command: impl Into<String>,
        handler: impl Fn(&mut C, &mut Message) -> Result<bool, HandlerError> + 'static,
    ) {
        self.handlers.insert(command.into(), Box::new(handler));
    }

    /// Register the same handler function for several commands.
    pub fn add_handlers(&mut self, commands: &[&str], handler: MessageHandlerFn<C>) {
        for command in commands {
            self.handlers.insert(command.to_string(), Box::new(handler));
        }
    }

    /// Replace the fallback handler used when no command matches.
    pub fn set_fallback_handler(
        &mut self,
        handler: impl Fn(&mut C, &mut Message) -> Result<bool, HandlerError> + 'static,
    ) {
        self.fallback = Box::new(handler);
    }

    /// Parse one raw line and dispatch it.
    ///
    /// Returns the handler's "handled" flag. A line that does not match
    /// the wire grammar fails with [`ProtocolError::Parse`]; handler
    /// errors come back as [`ProtocolError::Handler`]. Both are
    /// protocol-continuing: the caller logs them and reads on.
    pub fn parse(&self, ctx: &mut C, line: &str) -> Result<bool, ProtocolError> {
        let trimmed = line.trim_end_matches(['\r', '\n']);

        let parsed = match ParsedLine::parse(trimmed) {
            Ok(parsed) => parsed,
            Err(cause) => {
                debug!("{}", cause);
                return Err(ProtocolError::Parse {
                    line: line.to_string(),
                });
            }
        };

        let mut message = Message::from_parsed(&parsed);

        let handler = self
            .handlers
            .get(message.command())
            .unwrap_or(&self.fallback);

        Ok(handler(ctx, &mut message)?)
    }
}

impl<C: 'static> Default for Parser<C> {
    fn default() -> Self {
        Self::new()
    }
}
