//! IRCv3 message tag utilities.
//!
//! Covers the backslash-escape codec from the message-tags spec and the
//! `key[=value]` pair grammar used inside a tag block, including client
//! (`+`) and vendor (`example.com/`) key prefixes.
//!
//! # Reference
//! - IRCv3 Message Tags: <https://ircv3.net/specs/extensions/message-tags>

use std::collections::HashMap;
use std::fmt::{Result as FmtResult, Write};

use tracing::debug;

/// Escape a tag value for serialization.
///
/// Escapes special characters according to the IRCv3 message-tags spec.
pub fn escape_tag_value(f: &mut dyn Write, value: &str) -> FmtResult {
    for c in value.chars() {
        match c {
            ';' => f.write_str("\\:")?,
            ' ' => f.write_str("\\s")?,
            '\\' => f.write_str("\\\\")?,
            '\r' => f.write_str("\\r")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

/// Unescape a tag value from wire format.
///
/// Reverses the escaping applied by [`escape_tag_value`]. Unknown escape
/// sequences drop the backslash and keep the escaped character; a lone
/// trailing backslash is dropped entirely.
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

/// Check a tag key against the message-tags key grammar.
///
/// A key is an optional `+` client prefix, an optional vendor prefix
/// (letters, digits, hyphens and dots, ending in `/`), and a name of
/// letters, digits and hyphens.
fn is_valid_tag_key(key: &str) -> bool {
    let key = key.strip_prefix('+').unwrap_or(key);

    let (vendor, name) = match key.rsplit_once('/') {
        Some((vendor, name)) => (Some(vendor), name),
        None => (None, key),
    };

    if let Some(vendor) = vendor {
        let vendor_ok = !vendor.is_empty()
            && vendor
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !vendor_ok {
            return false;
        }
    }

    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Parse a raw tag block (the text between `@` and the first space) into a
/// key/value mapping.
///
/// Pairs are separated by `;`. A key without `=` maps to `None`; a key
/// with `=` maps to the unescaped value, which may be empty. Malformed
/// keys are skipped. Duplicate keys are last-write-wins.
pub(crate) fn parse_tag_block(block: &str) -> HashMap<String, Option<String>> {
    let mut tags = HashMap::new();

    for pair in block.split(';') {
        if pair.is_empty() {
            continue;
        }

        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (pair, None),
        };

        if !is_valid_tag_key(key) {
            debug!("ignoring malformed tag key {:?}", key);
            continue;
        }

        tags.insert(key.to_string(), value.map(unescape_tag_value));
    }

    tags
}
