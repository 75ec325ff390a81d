//! Separator sets and service string handling
//!
//! X12 declares its separators positionally inside the fixed-width `ISA`
//! header; EDIFACT optionally announces them in a `UNA` service string
//! advice ahead of `UNB`. Both fall back to dialect defaults when absent.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default X12 separators
pub const X12_SEGMENT_TERMINATOR: u8 = b'~';
pub const X12_ELEMENT_SEPARATOR: u8 = b'*';
pub const X12_COMPONENT_SEPARATOR: u8 = b':';
pub const X12_REPETITION_SEPARATOR: u8 = b'^';

/// Default EDIFACT separators (when no UNA is present)
pub const EDIFACT_SEGMENT_TERMINATOR: u8 = b'\'';
pub const EDIFACT_ELEMENT_SEPARATOR: u8 = b'+';
pub const EDIFACT_COMPONENT_SEPARATOR: u8 = b':';
pub const EDIFACT_REPETITION_SEPARATOR: u8 = b'*';
pub const EDIFACT_RELEASE_CHARACTER: u8 = b'?';
pub const EDIFACT_DECIMAL_MARK: u8 = b'.';

/// Length of an X12 `ISA` header including its terminator
pub const ISA_LENGTH: usize = 106;

/// Length of an EDIFACT `UNA` service string advice
pub const UNA_LENGTH: usize = 9;

/// EDI syntax family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    X12,
    Edifact,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X12 => f.write_str("X12"),
            Self::Edifact => f.write_str("EDIFACT"),
        }
    }
}

/// The delimiter characters of one interchange
///
/// Separators are ASCII bytes. Every present separator must differ from the
/// others and must not be alphanumeric or a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparatorSet {
    pub dialect: Dialect,
    #[serde(with = "byte_char")]
    pub segment: u8,
    #[serde(with = "byte_char")]
    pub element: u8,
    #[serde(with = "byte_char")]
    pub component: u8,
    #[serde(default, with = "opt_byte_char")]
    pub repetition: Option<u8>,
    /// Release character; escapes the byte that follows it
    #[serde(default, with = "opt_byte_char")]
    pub escape: Option<u8>,
}

impl Default for SeparatorSet {
    fn default() -> Self {
        Self::x12()
    }
}

impl SeparatorSet {
    /// X12 defaults: `~ * : ^`, no escape character
    #[must_use]
    pub const fn x12() -> Self {
        Self {
            dialect: Dialect::X12,
            segment: X12_SEGMENT_TERMINATOR,
            element: X12_ELEMENT_SEPARATOR,
            component: X12_COMPONENT_SEPARATOR,
            repetition: Some(X12_REPETITION_SEPARATOR),
            escape: None,
        }
    }

    /// EDIFACT defaults: `' + : *`, release character `?`
    #[must_use]
    pub const fn edifact() -> Self {
        Self {
            dialect: Dialect::Edifact,
            segment: EDIFACT_SEGMENT_TERMINATOR,
            element: EDIFACT_ELEMENT_SEPARATOR,
            component: EDIFACT_COMPONENT_SEPARATOR,
            repetition: Some(EDIFACT_REPETITION_SEPARATOR),
            escape: Some(EDIFACT_RELEASE_CHARACTER),
        }
    }

    /// Defaults for `dialect`
    #[must_use]
    pub const fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::X12 => Self::x12(),
            Dialect::Edifact => Self::edifact(),
        }
    }

    /// Build and validate a separator set
    pub fn new(
        dialect: Dialect,
        segment: u8,
        element: u8,
        component: u8,
        repetition: Option<u8>,
        escape: Option<u8>,
    ) -> Result<Self> {
        let set = Self {
            dialect,
            segment,
            element,
            component,
            repetition,
            escape,
        };
        set.validate()?;
        Ok(set)
    }

    /// Check the distinctness and character-class rules
    pub fn validate(&self) -> Result<()> {
        let present = self.present();
        for (i, &a) in present.iter().enumerate() {
            if !a.is_ascii() || a.is_ascii_alphanumeric() || a == b' ' {
                return Err(Error::InvalidSeparators(format!(
                    "separator {} must be a non-alphanumeric ASCII character",
                    printable(a)
                )));
            }
            if present[i + 1..].contains(&a) {
                return Err(Error::InvalidSeparators(format!(
                    "separator {} is used more than once",
                    printable(a)
                )));
            }
        }
        Ok(())
    }

    fn present(&self) -> Vec<u8> {
        let mut bytes = vec![self.segment, self.element, self.component];
        bytes.extend(self.repetition);
        bytes.extend(self.escape);
        bytes
    }

    /// Whether `byte` has syntactic meaning and must be escaped in values
    #[must_use]
    pub fn is_special(&self, byte: u8) -> bool {
        byte == self.segment
            || byte == self.element
            || byte == self.component
            || self.repetition == Some(byte)
            || self.escape == Some(byte)
    }

    /// Parse separators from a UNA service string advice
    ///
    /// ```text
    /// UNA:+.? '
    /// 012345678
    /// ```
    ///
    /// Position 3 is the component separator, 4 the element separator, 5 the
    /// decimal mark, 6 the release character, 7 the repetition separator and
    /// 8 the segment terminator. A space at 6 or 7 means "not used".
    #[must_use]
    pub fn from_una(una: &[u8]) -> Option<Self> {
        if una.len() < UNA_LENGTH || &una[0..3] != b"UNA" {
            return None;
        }
        let optional = |b: u8| (b != b' ').then_some(b);
        let set = Self {
            dialect: Dialect::Edifact,
            component: una[3],
            element: una[4],
            escape: optional(una[6]),
            repetition: optional(una[7]),
            segment: una[8],
        };
        set.validate().ok().map(|()| set)
    }

    /// Render a UNA service string advice for these separators
    #[must_use]
    pub fn to_una(&self) -> [u8; UNA_LENGTH] {
        [
            b'U',
            b'N',
            b'A',
            self.component,
            self.element,
            EDIFACT_DECIMAL_MARK,
            self.escape.unwrap_or(b' '),
            self.repetition.unwrap_or(b' '),
            self.segment,
        ]
    }

    /// Detect separators from a fixed-width X12 `ISA` header
    ///
    /// The element separator is the byte after `ISA`, the repetition
    /// separator sits at offset 82 (ISA11, when not alphanumeric), the
    /// component separator at 104 (ISA16) and the terminator at 105.
    #[must_use]
    pub fn from_isa(isa: &[u8]) -> Option<Self> {
        if isa.len() < ISA_LENGTH || &isa[0..3] != b"ISA" {
            return None;
        }
        let element = isa[3];
        // The fixed layout only holds if every element sits where expected.
        let positions = isa[..ISA_LENGTH - 1]
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == element)
            .count();
        if positions != 16 {
            return None;
        }
        let repetition = isa[82];
        let set = Self {
            dialect: Dialect::X12,
            segment: isa[105],
            element,
            component: isa[104],
            repetition: (!repetition.is_ascii_alphanumeric()).then_some(repetition),
            escape: None,
        };
        set.validate().ok().map(|()| set)
    }

    /// Whether these are exactly the dialect defaults
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::for_dialect(self.dialect)
    }
}

fn printable(byte: u8) -> String {
    if byte.is_ascii_graphic() {
        format!("'{}'", char::from(byte))
    } else {
        format!("0x{byte:02X}")
    }
}

mod byte_char {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(byte: &u8, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_char(char::from(*byte))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
        let c = char::deserialize(d)?;
        u8::try_from(c)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| D::Error::custom(format!("separator '{c}' is not ASCII")))
    }
}

mod opt_byte_char {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // Signature required by serde's `with`.
    pub(super) fn serialize<S: Serializer>(byte: &Option<u8>, s: S) -> Result<S::Ok, S::Error> {
        match byte {
            Some(b) => s.serialize_some(&char::from(*b)),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u8>, D::Error> {
        Option::<char>::deserialize(d)?
            .map(|c| {
                u8::try_from(c)
                    .ok()
                    .filter(u8::is_ascii)
                    .ok_or_else(|| D::Error::custom(format!("separator '{c}' is not ASCII")))
            })
            .transpose()
    }
}
