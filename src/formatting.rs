//! Stripping of mIRC-style inline formatting codes.
//!
//! IRC clients embed single-byte toggles for bold, colors, and friends
//! directly in message bodies. This module removes them, including the
//! digit and hex-digit arguments that the color codes carry.
//!
//! The color grammar here is purely lexical: at most two decimal digits
//! per color component are consumed, with no knowledge of the valid IRC
//! color-number range. `\x03314` therefore strips to `4`.

const FORMAT_BOLD: u8 = 0x02;
const FORMAT_COLOR: u8 = 0x03;
const FORMAT_HEX_COLOR: u8 = 0x04;
const FORMAT_ITALIC: u8 = 0x1d;
const FORMAT_MONOSPACE: u8 = 0x11;
const FORMAT_RESET: u8 = 0x0f;
const FORMAT_REVERSE: u8 = 0x16;
const FORMAT_STRIKETHROUGH: u8 = 0x1e;
const FORMAT_UNDERLINE: u8 = 0x1f;

/// Extension trait for stripping IRC formatting from strings.
pub trait FormattedStringExt {
    /// Whether the string contains any formatting codes.
    fn is_formatted(&self) -> bool;

    /// Return the string with all formatting codes removed.
    fn strip_formatting(&self) -> String;
}

impl FormattedStringExt for str {
    fn is_formatted(&self) -> bool {
        self.bytes().any(|b| {
            matches!(
                b,
                FORMAT_BOLD
                    | FORMAT_COLOR
                    | FORMAT_HEX_COLOR
                    | FORMAT_ITALIC
                    | FORMAT_MONOSPACE
                    | FORMAT_RESET
                    | FORMAT_REVERSE
                    | FORMAT_STRIKETHROUGH
                    | FORMAT_UNDERLINE
            )
        })
    }

    fn strip_formatting(&self) -> String {
        strip_formatting(self)
    }
}

fn is_hex_color(bytes: &[u8], at: usize) -> bool {
    match bytes.get(at..at + 6) {
        Some(window) => window.iter().all(u8::is_ascii_hexdigit),
        None => false,
    }
}

fn is_digit(bytes: &[u8], at: usize) -> bool {
    bytes.get(at).map_or(false, |b| b.is_ascii_digit())
}

/// Remove all formatting codes from `text`, returning a new string.
///
/// Plain toggles are dropped outright. The color code consumes up to two
/// decimal digits of foreground and, after a comma, up to two of
/// background; the hex color code consumes exactly six hex digits per
/// component or nothing. Every other byte is copied through unchanged.
pub fn strip_formatting(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            FORMAT_BOLD | FORMAT_ITALIC | FORMAT_MONOSPACE | FORMAT_RESET | FORMAT_REVERSE
            | FORMAT_STRIKETHROUGH | FORMAT_UNDERLINE => {}
            FORMAT_COLOR => {
                if is_digit(bytes, i + 1) {
                    i += 1;

                    if is_digit(bytes, i + 1) {
                        i += 1;
                    }

                    if bytes.get(i + 1) == Some(&b',') && is_digit(bytes, i + 2) {
                        i += 2;

                        if is_digit(bytes, i + 1) {
                            i += 1;
                        }
                    }
                }
            }
            FORMAT_HEX_COLOR => {
                if is_hex_color(bytes, i + 1) {
                    i += 6;
                }

                if bytes.get(i + 1) == Some(&b',') && is_hex_color(bytes, i + 2) {
                    i += 7;
                }
            }
            b => out.push(b),
        }

        i += 1;
    }

    // Only ASCII bytes are ever removed, so the output stays valid UTF-8.
    match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
