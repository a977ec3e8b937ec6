//! Nom-based IRC line parser.
//!
//! Splits one wire line into its raw components: tag block, source,
//! command, and parameters. Tag-pair and source sub-grammars are applied
//! by the caller; this layer only finds the boundaries.

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    error::{context, ErrorKind, VerboseError},
    sequence::preceded,
    IResult,
};

type ParseResult<I, O> = IResult<I, O, VerboseError<I>>;

/// Parse the IRCv3 tag block (the part after `@` and before the first space).
fn parse_tags(input: &str) -> ParseResult<&str, &str> {
    context(
        "parsing IRCv3 message tags",
        preceded(char('@'), take_until(" ")),
    )(input)
}

/// Parse the message source (the part after `:` and before the first space).
fn parse_source(input: &str) -> ParseResult<&str, &str> {
    context(
        "parsing message source",
        preceded(char(':'), take_while1(|c| c != ' ')),
    )(input)
}

/// Parse the command token (letters, or a numeric reply code).
fn parse_command(input: &str) -> ParseResult<&str, &str> {
    context(
        "parsing IRC command",
        take_while1(|c: char| c.is_alphanumeric()),
    )(input)
}

/// Parse a complete IRC line into its raw components.
///
/// Line format:
/// ```text
/// [@tags] [:source] <command> [params...] [:trailing]
/// ```
///
/// Runs of spaces separate tokens. The trailing parameter begins at the
/// first parameter position whose token starts with `:` and runs to the
/// end of the line; it is kept even when empty.
pub fn parse_line(input: &str) -> ParseResult<&str, ParsedLine<'_>> {
    let (input, tags) = context("parsing optional tags", opt(parse_tags))(input)?;
    let (input, _) = space0(input)?;

    let (input, source) = context("parsing optional source", opt(parse_source))(input)?;
    let (input, _) = space0(input)?;

    let (input, command) = context("parsing required command", parse_command)(input)?;

    let mut params: Vec<&str> = Vec::new();
    let mut rest = input;

    while rest.as_bytes().first() == Some(&b' ') {
        rest = rest.trim_start_matches(' ');

        if let Some(after_colon) = rest.strip_prefix(':') {
            // Trailing parameter: the rest of the line, spaces included.
            let end = after_colon.find(['\r', '\n']).unwrap_or(after_colon.len());
            params.push(&after_colon[..end]);
            rest = &after_colon[end..];
            break;
        }

        let mut end = rest.len();
        if let Some(i) = rest.find(' ') {
            end = end.min(i);
        }
        if let Some(i) = rest.find('\r') {
            end = end.min(i);
        }
        if let Some(i) = rest.find('\n') {
            end = end.min(i);
        }
        let param = &rest[..end];
        if param.is_empty() {
            break;
        }
        params.push(param);
        rest = &rest[end..];
    }

    Ok((
        rest,
        ParsedLine {
            tags,
            source,
            command,
            params,
        },
    ))
}

/// A raw parsed IRC line with borrowed string slices.
///
/// This is the intermediate representation produced by the nom parser.
/// It holds references into the original input string.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine<'a> {
    /// Raw tag block (without the leading `@`), if present.
    pub tags: Option<&'a str>,
    /// Raw source string (without the leading `:`), if present.
    pub source: Option<&'a str>,
    /// The command token.
    pub command: &'a str,
    /// Command parameters, including the trailing parameter.
    pub params: Vec<&'a str>,
}

impl<'a> ParsedLine<'a> {
    /// Parse an IRC line into a `ParsedLine`.
    ///
    /// Returns detailed error information for debugging failed parses.
    pub fn parse(input: &'a str) -> Result<Self, DetailedParseError> {
        match parse_line(input) {
            Ok((_remaining, line)) => Ok(line),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                // Find the innermost error with context
                let mut context_info = None;
                let mut position = input.len();
                let mut kind = ErrorKind::Tag;

                for (error_input, error_kind) in &e.errors {
                    position = input.len() - error_input.len();
                    match error_kind {
                        nom::error::VerboseErrorKind::Context(ctx) => {
                            context_info = Some(*ctx);
                        }
                        nom::error::VerboseErrorKind::Nom(ek) => {
                            kind = *ek;
                        }
                        nom::error::VerboseErrorKind::Char(_) => {
                            kind = ErrorKind::Char;
                        }
                    }
                }

                Err(DetailedParseError {
                    input: input.to_string(),
                    position,
                    context: context_info,
                    kind,
                })
            }
            Err(nom::Err::Incomplete(_)) => Err(DetailedParseError {
                input: input.to_string(),
                position: input.len(),
                context: Some("incomplete input"),
                kind: ErrorKind::Eof,
            }),
        }
    }
}

/// Detailed parse error with position and context information.
#[derive(Debug, Clone)]
pub struct DetailedParseError {
    /// The original input string that failed to parse.
    pub input: String,
    /// Character position where parsing failed.
    pub position: usize,
    /// Context about what was being parsed when the error occurred.
    pub context: Option<&'static str>,
    /// The nom error kind.
    pub kind: ErrorKind,
}

impl std::fmt::Display for DetailedParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error at position {}", self.position)?;
        if let Some(ctx) = self.context {
            write!(f, " while {}", ctx)?;
        }
        write!(f, ": {:?}", self.kind)
    }
}

impl std::error::Error for DetailedParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_command() {
        let line = ParsedLine::parse("PING").unwrap();
        assert_eq!(line.command, "PING");
        assert!(line.tags.is_none());
        assert!(line.source.is_none());
        assert!(line.params.is_empty());
    }

    #[test]
    fn test_parse_command_with_params() {
        let line = ParsedLine::parse("PRIVMSG #channel :Hello, world!").unwrap();
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.params, vec!["#channel", "Hello, world!"]);
    }

    #[test]
    fn test_parse_with_source() {
        let line = ParsedLine::parse(":nick!user@host PRIVMSG #channel :Hello").unwrap();
        assert_eq!(line.source, Some("nick!user@host"));
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.params, vec!["#channel", "Hello"]);
    }

    #[test]
    fn test_parse_with_tags() {
        let line = ParsedLine::parse("@time=2023-01-01T00:00:00Z :nick PRIVMSG #ch :Hi").unwrap();
        assert_eq!(line.tags, Some("time=2023-01-01T00:00:00Z"));
        assert_eq!(line.source, Some("nick"));
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.params, vec!["#ch", "Hi"]);
    }

    #[test]
    fn test_parse_with_crlf() {
        let line = ParsedLine::parse("PING :server\r\n").unwrap();
        assert_eq!(line.command, "PING");
        assert_eq!(line.params, vec!["server"]);
    }

    #[test]
    fn test_parse_multiple_params() {
        let line = ParsedLine::parse("USER guest 0 * :Real Name").unwrap();
        assert_eq!(line.command, "USER");
        assert_eq!(line.params, vec!["guest", "0", "*", "Real Name"]);
    }

    #[test]
    fn test_parse_numeric_reply() {
        let line = ParsedLine::parse(":server 001 nick :Welcome").unwrap();
        assert_eq!(line.source, Some("server"));
        assert_eq!(line.command, "001");
        assert_eq!(line.params, vec!["nick", "Welcome"]);
    }

    #[test]
    fn test_parse_empty_trailing() {
        // The trailing marker alone still yields a final empty parameter.
        let line = ParsedLine::parse("PRIVMSG #channel :").unwrap();
        assert_eq!(line.params, vec!["#channel", ""]);
    }

    #[test]
    fn test_parse_space_runs() {
        let line = ParsedLine::parse(":src   TOPIC  #chan   :new topic").unwrap();
        assert_eq!(line.source, Some("src"));
        assert_eq!(line.command, "TOPIC");
        assert_eq!(line.params, vec!["#chan", "new topic"]);
    }

    #[test]
    fn test_parse_middle_with_embedded_colon() {
        // Only a token *starting* with `:` begins the trailing parameter.
        let line = ParsedLine::parse("005 nick TARGMAX=ACCEPT:,KICK:1 :are supported").unwrap();
        assert_eq!(
            line.params,
            vec!["nick", "TARGMAX=ACCEPT:,KICK:1", "are supported"]
        );
    }

    #[test]
    fn test_parse_no_trailing_means_no_spaces() {
        let line = ParsedLine::parse("MODE #chan +o nick").unwrap();
        for param in &line.params {
            assert!(!param.contains(' '));
        }
    }

    #[test]
    fn test_parse_complex_tags() {
        let line = ParsedLine::parse("@msgid=abc123;time=2023-01-01 :nick PRIVMSG #ch :msg").unwrap();
        assert_eq!(line.tags, Some("msgid=abc123;time=2023-01-01"));
    }

    #[test]
    fn test_parse_empty_line_fails() {
        assert!(ParsedLine::parse("").is_err());
    }
}
