//! Text encodings for name fields.
//!
//! Tar headers carry names as raw bytes. ISO-8859-1 is the default because
//! it maps every byte to a character and therefore never fails to decode.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use super::{FieldError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum EntryEncoding {
    /// ISO-8859-1: one byte per code point `U+0000..=U+00FF`.
    #[default]
    Latin1,
    /// US-ASCII: bytes `0x00..=0x7F` only.
    Ascii,
    Utf8,
}

impl EntryEncoding {
    pub const ALL: [EntryEncoding; 3] = [EntryEncoding::Latin1, EntryEncoding::Ascii, EntryEncoding::Utf8];

    /// Canonical charset name.
    pub fn name(self) -> &'static str {
        match self {
            EntryEncoding::Latin1 => "ISO-8859-1",
            EntryEncoding::Ascii  => "US-ASCII",
            EntryEncoding::Utf8   => "UTF-8",
        }
    }

    /// Resolve a charset name or common alias, ignoring case.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "iso-8859-1" | "iso8859-1" | "iso_8859_1" | "latin1" | "latin-1" => Some(EntryEncoding::Latin1),
            "us-ascii" | "ascii"                                             => Some(EntryEncoding::Ascii),
            "utf-8" | "utf8"                                                 => Some(EntryEncoding::Utf8),
            _                                                                => None,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            EntryEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            EntryEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(pos) => Err(self.error(format!("byte {:#04x} at position {pos}", bytes[pos]))),
                None      => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            },
            EntryEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| self.error(e.to_string())),
        }
    }

    pub fn encode(self, s: &str) -> Result<Cow<'_, [u8]>> {
        match self {
            EntryEncoding::Utf8 => Ok(Cow::Borrowed(s.as_bytes())),
            EntryEncoding::Ascii if s.is_ascii() => Ok(Cow::Borrowed(s.as_bytes())),
            EntryEncoding::Latin1 if s.is_ascii() => Ok(Cow::Borrowed(s.as_bytes())),
            EntryEncoding::Ascii | EntryEncoding::Latin1 => {
                let limit = if self == EntryEncoding::Ascii { 0x7f } else { 0xff };
                s.chars()
                    .map(|c| match u32::from(c) {
                        cp if cp <= limit => Ok(cp as u8),
                        _ => Err(self.error(format!("character {c:?} is not representable"))),
                    })
                    .collect::<Result<Vec<u8>>>()
                    .map(Cow::Owned)
            }
        }
    }

    fn error(self, reason: String) -> FieldError {
        FieldError::EncodingError { encoding: self.name(), reason }
    }
}

impl fmt::Display for EntryEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
