//! Character-level remote-name encoding
//!
//! Some byte sequences are legal in host filesystems but unwelcome on the
//! remote: control characters, leading/trailing spaces, slashes inside a
//! name, and invalid UTF-8. The encoder maps those to visually similar
//! Unicode stand-ins on the way up and restores them on the way down, so
//! round-tripping a local name through the remote is lossless for every
//! class except invalid UTF-8 (which has no faithful string form).
//!
//! Mapping:
//! - control characters U+0000..U+001F → their Control Pictures (U+2400+c)
//! - leading/trailing space → U+2420 (SYMBOL FOR SPACE)
//! - `/` → U+FF0F (FULLWIDTH SOLIDUS)
//! - invalid UTF-8 bytes → U+FFFD (REPLACEMENT CHARACTER, not reversible)

use serde::{Deserialize, Serialize};

const CTL_PICTURE_BASE: u32 = 0x2400;
const SYMBOL_FOR_SPACE: char = '\u{2420}';
const FULLWIDTH_SOLIDUS: char = '\u{FF0F}';

/// Which character classes the encoder rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Encoding {
    /// Encode control characters U+0000..U+001F
    pub ctl: bool,
    /// Encode a leading space
    pub left_space: bool,
    /// Encode a trailing space
    pub right_space: bool,
    /// Encode `/` inside a name
    pub slash: bool,
    /// Replace invalid UTF-8 bytes (only meaningful for raw byte input)
    pub invalid_utf8: bool,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            ctl: true,
            left_space: true,
            right_space: true,
            slash: true,
            invalid_utf8: true,
        }
    }
}

impl Encoding {
    /// Encodes a single name for transmission to the remote
    #[must_use]
    pub fn encode_name(&self, name: &str) -> String {
        let last = name.chars().count().saturating_sub(1);
        name.chars()
            .enumerate()
            .map(|(i, c)| self.encode_char(c, i == 0, i == last))
            .collect()
    }

    /// Encodes raw bytes, substituting invalid UTF-8 sequences first.
    ///
    /// Invalid bytes have no faithful `String` form, so they are replaced
    /// with U+FFFD regardless of the `invalid_utf8` flag; the flag exists
    /// so callers can reject such names up front instead of encoding them.
    #[must_use]
    pub fn encode_raw(&self, raw: &[u8]) -> String {
        self.encode_name(&String::from_utf8_lossy(raw))
    }

    /// Restores a name received from the remote
    #[must_use]
    pub fn decode_name(&self, name: &str) -> String {
        let last = name.chars().count().saturating_sub(1);
        name.chars()
            .enumerate()
            .map(|(i, c)| self.decode_char(c, i == 0, i == last))
            .collect()
    }

    fn encode_char(&self, c: char, first: bool, last: bool) -> char {
        let code = c as u32;
        if self.ctl && code < 0x20 {
            return char::from_u32(CTL_PICTURE_BASE + code).unwrap_or(c);
        }
        if self.slash && c == '/' {
            return FULLWIDTH_SOLIDUS;
        }
        if c == ' ' && ((self.left_space && first) || (self.right_space && last)) {
            return SYMBOL_FOR_SPACE;
        }
        c
    }

    fn decode_char(&self, c: char, first: bool, last: bool) -> char {
        let code = c as u32;
        if self.ctl && (CTL_PICTURE_BASE..CTL_PICTURE_BASE + 0x20).contains(&code) {
            return char::from_u32(code - CTL_PICTURE_BASE).unwrap_or(c);
        }
        if self.slash && c == FULLWIDTH_SOLIDUS {
            return '/';
        }
        if c == SYMBOL_FOR_SPACE && ((self.left_space && first) || (self.right_space && last)) {
            return ' ';
        }
        c
    }
}
