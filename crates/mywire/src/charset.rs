//! Character sets: collation ids and the text encoding each one implies.

use std::borrow::Cow;

/// Collation id of the `binary` character set.
pub const BINARY_COLLATION: u16 = 63;

/// Text encoding used to turn wire bytes into strings and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
    Ascii,
}

impl Encoding {
    /// Decode bytes; invalid sequences become U+FFFD.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Encoding::Utf8 | Encoding::Ascii => String::from_utf8_lossy(bytes),
            Encoding::Latin1 => {
                if bytes.is_ascii() {
                    String::from_utf8_lossy(bytes)
                } else {
                    Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect())
                }
            }
        }
    }

    /// Encode a string; characters the encoding cannot hold become `?`.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            Encoding::Utf8 => Cow::Borrowed(text.as_bytes()),
            _ if text.is_ascii() => Cow::Borrowed(text.as_bytes()),
            Encoding::Latin1 => Cow::Owned(
                text.chars()
                    .map(|c| u8::try_from(c).unwrap_or(b'?'))
                    .collect(),
            ),
            Encoding::Ascii => Cow::Owned(
                text.chars()
                    .map(|c| u8::try_from(c).ok().filter(u8::is_ascii).unwrap_or(b'?'))
                    .collect(),
            ),
        }
    }
}

/// A character set with the collation id sent in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset {
    pub id: u8,
    pub name: &'static str,
    pub collation: &'static str,
    pub encoding: Encoding,
}

// (id, charset, collation, encoding); the first entry per charset is its default.
const CHARSETS: &[(u8, &str, &str, Encoding)] = &[
    (45, "utf8mb4", "utf8mb4_general_ci", Encoding::Utf8),
    (46, "utf8mb4", "utf8mb4_bin", Encoding::Utf8),
    (224, "utf8mb4", "utf8mb4_unicode_ci", Encoding::Utf8),
    (255, "utf8mb4", "utf8mb4_0900_ai_ci", Encoding::Utf8),
    (33, "utf8mb3", "utf8mb3_general_ci", Encoding::Utf8),
    (83, "utf8mb3", "utf8mb3_bin", Encoding::Utf8),
    (8, "latin1", "latin1_swedish_ci", Encoding::Latin1),
    (47, "latin1", "latin1_bin", Encoding::Latin1),
    (11, "ascii", "ascii_general_ci", Encoding::Ascii),
    (63, "binary", "binary", Encoding::Ascii),
];

impl Charset {
    fn from_entry(&(id, name, collation, encoding): &(u8, &'static str, &'static str, Encoding)) -> Self {
        Self {
            id,
            name,
            collation,
            encoding,
        }
    }

    /// Look up a charset (default collation) or a collation by name.
    ///
    /// `utf8` is an alias for `utf8mb3`.
    pub fn by_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        let name = match name.as_str() {
            "utf8" => "utf8mb3",
            other => other,
        };
        CHARSETS
            .iter()
            .find(|entry| entry.1 == name)
            .or_else(|| CHARSETS.iter().find(|entry| entry.2 == name))
            .map(Self::from_entry)
    }

    /// Look up a collation id.
    pub fn by_id(id: u8) -> Option<Self> {
        CHARSETS.iter().find(|entry| entry.0 == id).map(Self::from_entry)
    }

    pub fn is_binary(&self) -> bool {
        u16::from(self.id) == BINARY_COLLATION
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::from_entry(&CHARSETS[0])
    }
}
