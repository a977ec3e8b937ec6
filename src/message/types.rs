//! Owned IRC message type.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{MessageError, ProtocolError};
use crate::message::nom_parser::ParsedLine;
use crate::message::tags::{escape_tag_value, parse_tag_block};

/// One parsed IRC message.
///
/// A message is the command plus everything that decorates it on the wire:
/// an optional tag mapping, an optional source, and an ordered parameter
/// list. The wire distinction between middle and trailing parameters is
/// flattened; only the final parameter may contain spaces.
///
/// Messages are built by the line parser and handed to exactly one handler
/// per line. Nothing at this layer validates tag keys or parameter
/// content; that is the line parser's job during construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    command: String,
    source: Option<String>,
    tags: HashMap<String, Option<String>>,
    params: Vec<String>,
}

impl Message {
    /// Create a new message with the given command and nothing else.
    ///
    /// Fails with [`MessageError::EmptyCommand`] when `command` is empty.
    pub fn new(command: impl Into<String>) -> Result<Self, MessageError> {
        let command = command.into();
        if command.is_empty() {
            return Err(MessageError::EmptyCommand);
        }

        Ok(Self {
            command,
            source: None,
            tags: HashMap::new(),
            params: Vec::new(),
        })
    }

    /// Build a message from a raw parsed line.
    pub(crate) fn from_parsed(line: &ParsedLine<'_>) -> Self {
        let mut message = Self {
            command: line.command.to_string(),
            source: None,
            tags: HashMap::new(),
            params: line.params.iter().map(|p| p.to_string()).collect(),
        };

        if let Some(block) = line.tags {
            message.tags = parse_tag_block(block);
        }

        match line.source {
            Some(source) if !source.is_empty() => {
                message.source = Some(source.to_string());
            }
            _ => {}
        }

        message
    }

    /// The command of this message, e.g. `PRIVMSG` or a numeric like `001`.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Replace the command.
    ///
    /// Handlers may re-tag a message for display purposes (the fallback
    /// handler does this); the command may never become empty.
    pub fn set_command(&mut self, command: impl Into<String>) -> Result<(), MessageError> {
        let command = command.into();
        if command.is_empty() {
            return Err(MessageError::EmptyCommand);
        }

        self.command = command;

        Ok(())
    }

    /// The source of the message: a nickname, a full `nick!user@host`, a
    /// server name, or nothing.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Replace the source. `None` clears it.
    pub fn set_source(&mut self, source: Option<String>) {
        self.source = source;
    }

    /// The message tags. A key present with a `None` value was sent
    /// without `=` on the wire.
    pub fn tags(&self) -> &HashMap<String, Option<String>> {
        &self.tags
    }

    /// Look up a tag value, flattening absent keys and valueless keys.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(|v| v.as_deref())
    }

    /// Replace the tags. `None` is treated as no tags, not an error.
    pub fn set_tags(&mut self, tags: Option<HashMap<String, Option<String>>>) {
        self.tags = tags.unwrap_or_default();
    }

    /// The parameters of this message, trailing parameter last.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Replace the parameters. `None` is treated as no parameters.
    pub fn set_params(&mut self, params: Option<Vec<String>>) {
        self.params = params.unwrap_or_default();
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Err(ProtocolError::Parse {
                line: s.to_string(),
            });
        }

        match ParsedLine::parse(trimmed) {
            Ok(line) => Ok(Message::from_parsed(&line)),
            Err(_) => Err(ProtocolError::Parse {
                line: s.to_string(),
            }),
        }
    }
}

/// Serializes back to wire format, without line termination.
///
/// The final parameter is always written as a trailing parameter. Tags are
/// written in sorted key order.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<&String> = self.tags.keys().collect();
            keys.sort();

            f.write_str("@")?;
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                f.write_str(key)?;
                if let Some(Some(value)) = self.tags.get(*key) {
                    f.write_str("=")?;
                    escape_tag_value(f, value)?;
                }
            }
            f.write_str(" ")?;
        }

        if let Some(source) = &self.source {
            write!(f, ":{} ", source)?;
        }

        f.write_str(&self.command)?;

        if let Some((trailing, middles)) = self.params.split_last() {
            for middle in middles {
                write!(f, " {}", middle)?;
            }
            write!(f, " :{}", trailing)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_command() {
        assert_eq!(Message::new(""), Err(MessageError::EmptyCommand));
    }

    #[test]
    fn test_set_command_rejects_empty() {
        let mut message = Message::new("PRIVMSG").unwrap();
        assert_eq!(message.set_command(""), Err(MessageError::EmptyCommand));
        assert_eq!(message.command(), "PRIVMSG");
    }

    #[test]
    fn test_set_command_retags() {
        let mut message = Message::new("BOOP").unwrap();
        message.set_command("unknown command 'BOOP'").unwrap();
        assert_eq!(message.command(), "unknown command 'BOOP'");
    }

    #[test]
    fn test_set_tags_none_clears() {
        let mut message: Message = "@msgid=1 PRIVMSG #a :hi".parse().unwrap();
        assert!(!message.tags().is_empty());

        message.set_tags(None);
        assert!(message.tags().is_empty());
    }

    #[test]
    fn test_set_params_none_clears() {
        let mut message: Message = "PRIVMSG #a :hi".parse().unwrap();
        message.set_params(None);
        assert!(message.params().is_empty());
    }

    #[test]
    fn test_parse_full_line() {
        let message: Message = "@time=2023-01-01T00:00:00Z :nick!u@h PRIVMSG #ch :Hello!"
            .parse()
            .unwrap();

        assert_eq!(message.command(), "PRIVMSG");
        assert_eq!(message.source(), Some("nick!u@h"));
        assert_eq!(message.tag("time"), Some("2023-01-01T00:00:00Z"));
        assert_eq!(message.params(), ["#ch", "Hello!"]);
    }

    #[test]
    fn test_parse_empty_line_fails() {
        assert!("".parse::<Message>().is_err());
        assert!("\r\n".parse::<Message>().is_err());
    }

    #[test]
    fn test_tag_flattens_valueless() {
        let message: Message = "@typing PRIVMSG #a :hi".parse().unwrap();
        assert!(message.tags().contains_key("typing"));
        assert_eq!(message.tag("typing"), None);
    }

    #[test]
    fn test_display_trailing_param() {
        let message: Message = ":nick PRIVMSG #ch :hello world".parse().unwrap();
        assert_eq!(message.to_string(), ":nick PRIVMSG #ch :hello world");
    }

    #[test]
    fn test_display_escapes_tag_values() {
        let mut message = Message::new("TAGMSG").unwrap();
        let mut tags = HashMap::new();
        tags.insert("reason".to_string(), Some("be right back".to_string()));
        message.set_tags(Some(tags));
        message.set_params(Some(vec!["#ch".to_string()]));

        assert_eq!(message.to_string(), "@reason=be\\sright\\sback TAGMSG :#ch");
    }
}
