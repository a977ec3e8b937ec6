//! Parsing of the `nick[!user[@host]]` message source form.

/// A message source split into its nick, user, and host parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    nick: String,
    user: Option<String>,
    host: Option<String>,
}

impl Source {
    /// Parse a raw source string.
    ///
    /// Returns `None` when the source contains whitespace, which is not a
    /// valid source of any shape. A source that does not match the
    /// `nick!user@host` grammar (say, a server name with embedded `!`
    /// oddities) is kept whole as the nick.
    pub fn parse(source: &str) -> Option<Self> {
        if source.contains([' ', '\r', '\n']) {
            return None;
        }

        if let Some((nick, rest)) = source.split_once('!') {
            if !nick.is_empty() {
                match rest.split_once('@') {
                    None if !rest.is_empty() => {
                        return Some(Self {
                            nick: nick.to_string(),
                            user: Some(rest.to_string()),
                            host: None,
                        });
                    }
                    Some((user, host))
                        if !user.is_empty()
                            && !host.is_empty()
                            && !host.contains(['!', '@']) =>
                    {
                        return Some(Self {
                            nick: nick.to_string(),
                            user: Some(user.to_string()),
                            host: Some(host.to_string()),
                        });
                    }
                    _ => {}
                }
            }
        }

        Some(Self {
            nick: source.to_string(),
            user: None,
            host: None,
        })
    }

    /// The nick portion of the source.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// The user portion, if present.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The host portion, if present.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nick_only() {
        let source = Source::parse("ada").unwrap();
        assert_eq!(source.nick(), "ada");
        assert_eq!(source.user(), None);
        assert_eq!(source.host(), None);
    }

    #[test]
    fn test_parse_nick_user() {
        let source = Source::parse("ada!~u").unwrap();
        assert_eq!(source.nick(), "ada");
        assert_eq!(source.user(), Some("~u"));
        assert_eq!(source.host(), None);
    }

    #[test]
    fn test_parse_nick_user_host() {
        let source = Source::parse("ada!~u@id8o4a2f.example.net").unwrap();
        assert_eq!(source.nick(), "ada");
        assert_eq!(source.user(), Some("~u"));
        assert_eq!(source.host(), Some("id8o4a2f.example.net"));
    }

    #[test]
    fn test_parse_rejects_whitespace() {
        assert_eq!(Source::parse(" "), None);
        assert_eq!(Source::parse("e f"), None);
        assert_eq!(Source::parse("a\nb"), None);
        assert_eq!(Source::parse("c\rd"), None);
    }

    #[test]
    fn test_parse_nick_may_contain_at() {
        let source = Source::parse("nick@foo!user@server").unwrap();
        assert_eq!(source.nick(), "nick@foo");
        assert_eq!(source.user(), Some("user"));
        assert_eq!(source.host(), Some("server"));
    }

    #[test]
    fn test_parse_unmatchable_kept_whole() {
        let source = Source::parse("nick!user@server!foo").unwrap();
        assert_eq!(source.nick(), "nick!user@server!foo");
        assert_eq!(source.user(), None);
        assert_eq!(source.host(), None);
    }
}
