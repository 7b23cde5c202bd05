use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::decoder::signal::{self, Signal};

/// Longest code accepted by any table; longer buffers decode to nothing without a lookup
pub const MAX_CODE_LEN: usize = 6;

/// International Morse for letters and digits, in reference order
const INTERNATIONAL: [(char, &str); 36] = [
    ('A', ".-"),
    ('B', "-..."),
    ('C', "-.-."),
    ('D', "-.."),
    ('E', "."),
    ('F', "..-."),
    ('G', "--."),
    ('H', "...."),
    ('I', ".."),
    ('J', ".---"),
    ('K', "-.-"),
    ('L', ".-.."),
    ('M', "--"),
    ('N', "-."),
    ('O', "---"),
    ('P', ".--."),
    ('Q', "--.-"),
    ('R', ".-."),
    ('S', "..."),
    ('T', "-"),
    ('U', "..-"),
    ('V', "...-"),
    ('W', ".--"),
    ('X', "-..-"),
    ('Y', "-.--"),
    ('Z', "--.."),
    ('1', ".----"),
    ('2', "..---"),
    ('3', "...--"),
    ('4', "....-"),
    ('5', "....."),
    ('6', "-...."),
    ('7', "--..."),
    ('8', "---.."),
    ('9', "----."),
    ('0', "-----"),
];

/// Errors building a custom code table
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeTableError {
    /// Output character outside 'A'..='Z' and '0'..='9'
    #[error("letter {letter:?} is not an uppercase ASCII letter or digit")]
    InvalidLetter {
        /// Offending character
        letter: char,
    },

    /// Code is empty or contains characters other than '.' and '-'
    #[error("invalid code {code:?} for {letter:?}: only '.' and '-' are allowed")]
    InvalidCode {
        /// Output character
        letter: char,
        /// Offending code
        code: String,
    },

    /// Code exceeds [`MAX_CODE_LEN`]
    #[error("code {code:?} for {letter:?} is longer than {MAX_CODE_LEN} signals")]
    CodeTooLong {
        /// Output character
        letter: char,
        /// Offending code
        code: String,
    },

    /// Two letters share one code
    #[error("code {code:?} is assigned more than once")]
    DuplicateCode {
        /// Duplicated code
        code: String,
    },

    /// One letter has two codes
    #[error("letter {letter:?} is assigned more than once")]
    DuplicateLetter {
        /// Duplicated letter
        letter: char,
    },
}

/// Read-only mapping between signal sequences and output characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTable {
    /// Entries in reference order
    entries: Vec<(char, String)>,
    by_code: HashMap<String, char>,
    by_letter: HashMap<char, usize>,
}

impl Default for CodeTable {
    fn default() -> Self {
        Self::international()
    }
}

impl CodeTable {
    /// The canonical A–Z and 0–9 International Morse table
    #[must_use]
    pub fn international() -> Self {
        let entries = INTERNATIONAL
            .iter()
            .map(|&(letter, code)| (letter, code.to_owned()))
            .collect();
        Self::index(entries)
    }

    /// Build a custom table from `(letter, code)` pairs
    ///
    /// # Errors
    /// Returns error if a code is empty, contains anything but '.'/'-', is longer
    /// than [`MAX_CODE_LEN`], or if a code or letter appears twice
    pub fn from_entries<I, S>(entries: I) -> Result<Self, CodeTableError>
    where
        I: IntoIterator<Item = (char, S)>,
        S: Into<String>,
    {
        let mut validated: Vec<(char, String)> = Vec::new();
        for (letter, code) in entries {
            let code = code.into();
            if !(letter.is_ascii_uppercase() || letter.is_ascii_digit()) {
                return Err(CodeTableError::InvalidLetter { letter });
            }
            if code.is_empty() || signal::parse(&code).is_none() {
                return Err(CodeTableError::InvalidCode { letter, code });
            }
            if code.len() > MAX_CODE_LEN {
                return Err(CodeTableError::CodeTooLong { letter, code });
            }
            if validated.iter().any(|(_, c)| *c == code) {
                return Err(CodeTableError::DuplicateCode { code });
            }
            if validated.iter().any(|(l, _)| *l == letter) {
                return Err(CodeTableError::DuplicateLetter { letter });
            }
            validated.push((letter, code));
        }

        debug!(entries = validated.len(), "custom code table built");
        Ok(Self::index(validated))
    }

    fn index(entries: Vec<(char, String)>) -> Self {
        let by_code = entries
            .iter()
            .map(|(letter, code)| (code.clone(), *letter))
            .collect();
        let by_letter = entries
            .iter()
            .enumerate()
            .map(|(i, (letter, _))| (*letter, i))
            .collect();
        Self {
            entries,
            by_code,
            by_letter,
        }
    }

    /// Look up the character for a signal sequence
    ///
    /// Sequences longer than [`MAX_CODE_LEN`] are rejected without a lookup.
    #[must_use]
    pub fn decode(&self, signals: &[Signal]) -> Option<char> {
        if signals.is_empty() || signals.len() > MAX_CODE_LEN {
            return None;
        }
        self.by_code.get(&signal::render(signals)).copied()
    }

    /// Look up the character for a code string such as `"-.-"`
    #[must_use]
    pub fn decode_str(&self, code: &str) -> Option<char> {
        if code.len() > MAX_CODE_LEN {
            return None;
        }
        self.by_code.get(code).copied()
    }

    /// Reverse lookup, ignoring ASCII case
    #[must_use]
    pub fn encode(&self, letter: char) -> Option<&str> {
        self.by_letter
            .get(&letter.to_ascii_uppercase())
            .or_else(|| self.by_letter.get(&letter))
            .map(|&i| self.entries[i].1.as_str())
    }

    /// All `(letter, code)` pairs in reference order
    pub fn entries(&self) -> impl Iterator<Item = (char, &str)> + '_ {
        self.entries.iter().map(|(l, c)| (*l, c.as_str()))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
