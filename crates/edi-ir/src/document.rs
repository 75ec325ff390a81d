//! Transaction containers
#![allow(clippy::must_use_candidate)] // Builder/constructor API intentionally omits pervasive #[must_use].
#![allow(clippy::return_self_not_must_use)] // Fluent builder methods return Self for ergonomics.

use crate::node::TransactionNode;
use crate::segment::Segment;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a message grammar: transaction code plus version
///
/// X12 uses the ST01 code with the GS08/ST03 version (`850` / `004010`);
/// EDIFACT uses the UNH message type with version and release (`ORDERS` /
/// `D96A`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    /// Transaction set or message type code
    pub code: String,

    /// Version identifier
    pub version: String,
}

impl MessageKey {
    /// Create a key
    pub fn new(code: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.version)
    }
}

/// One transaction set (X12 ST..SE) or message (EDIFACT UNH..UNT)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Grammar key, when known
    #[serde(default)]
    pub key: Option<MessageKey>,

    /// Header segment (`ST` or `UNH`)
    pub header: Segment,

    /// Body nodes between header and trailer, in schema order
    pub body: Vec<TransactionNode>,

    /// Trailer segment (`SE` or `UNT`), absent until read or written
    #[serde(default)]
    pub trailer: Option<Segment>,
}

impl Transaction {
    /// Create an empty transaction with the given header
    pub fn new(header: Segment) -> Self {
        Self {
            key: None,
            header,
            body: Vec::new(),
            trailer: None,
        }
    }

    /// Set the grammar key
    pub fn with_key(mut self, key: MessageKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the trailer segment
    pub fn with_trailer(mut self, trailer: Segment) -> Self {
        self.trailer = Some(trailer);
        self
    }

    /// Append a body node
    pub fn push(&mut self, node: impl Into<TransactionNode>) -> &mut Self {
        self.body.push(node.into());
        self
    }

    /// Transaction code from the header (ST01, or the UNH message type)
    pub fn code(&self) -> &str {
        match self.header.tag.as_str() {
            "UNH" => self
                .header
                .element(1)
                .map_or("", crate::segment::Element::value),
            _ => self.header.value(0),
        }
    }

    /// Index of the control number element within the header
    pub fn control_index(&self) -> usize {
        match self.header.tag.as_str() {
            "ST" => 1,
            _ => 0,
        }
    }

    /// Control number carried by the header (ST02 or UNH01)
    pub fn control_number(&self) -> &str {
        self.header.value(self.control_index())
    }

    /// Number of body segments, loops flattened
    pub fn body_segment_count(&self) -> usize {
        self.body.iter().map(TransactionNode::segment_count).sum()
    }

    /// Segment count a trailer must carry: header, body and trailer
    pub fn expected_segment_count(&self) -> usize {
        self.body_segment_count() + 2
    }
}
