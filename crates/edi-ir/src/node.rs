//! Node types for transaction graphs

use crate::segment::Segment;
use serde::{Deserialize, Serialize};

/// A node in a transaction graph
///
/// Mirrors the schema position it was matched against: a segment, a loop
/// occurrence, or a segment that matched no schema position at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionNode {
    /// A segment matched to a segment position
    Segment(Segment),

    /// One occurrence of a loop
    Loop(LoopNode),

    /// A segment that could not be placed; kept so no content is lost
    Unmapped(Segment),
}

/// One occurrence of a schema loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopNode {
    /// Loop identifier, as declared in the schema
    pub id: String,

    /// Child nodes, in schema order
    pub children: Vec<TransactionNode>,
}

/// Discriminator for [`TransactionNode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Segment,
    Loop,
    Unmapped,
}

impl TransactionNode {
    /// Wrap a segment
    #[must_use]
    pub fn segment(segment: Segment) -> Self {
        Self::Segment(segment)
    }

    /// Build a loop occurrence from its children
    #[must_use]
    pub fn looped(id: impl Into<String>, children: Vec<TransactionNode>) -> Self {
        Self::Loop(LoopNode::new(id, children))
    }

    /// Node discriminator
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Segment(_) => NodeKind::Segment,
            Self::Loop(_) => NodeKind::Loop,
            Self::Unmapped(_) => NodeKind::Unmapped,
        }
    }

    /// Segment tag or loop id
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Segment(s) | Self::Unmapped(s) => &s.tag,
            Self::Loop(l) => &l.id,
        }
    }

    /// The segment carried by this node, if it is a leaf
    #[must_use]
    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            Self::Segment(s) | Self::Unmapped(s) => Some(s),
            Self::Loop(_) => None,
        }
    }

    /// The loop occurrence carried by this node
    #[must_use]
    pub fn as_loop(&self) -> Option<&LoopNode> {
        match self {
            Self::Loop(l) => Some(l),
            _ => None,
        }
    }

    /// Number of segments in this node and all descendants
    #[must_use]
    pub fn segment_count(&self) -> usize {
        match self {
            Self::Segment(_) | Self::Unmapped(_) => 1,
            Self::Loop(l) => l.segment_count(),
        }
    }
}

impl LoopNode {
    /// Create a loop occurrence
    pub fn new(id: impl Into<String>, children: Vec<TransactionNode>) -> Self {
        Self {
            id: id.into(),
            children,
        }
    }

    /// Append a child node
    pub fn push(&mut self, child: TransactionNode) -> &mut Self {
        self.children.push(child);
        self
    }

    /// Find the first child segment with the given tag
    #[must_use]
    pub fn find_segment(&self, tag: &str) -> Option<&Segment> {
        self.children
            .iter()
            .filter_map(TransactionNode::as_segment)
            .find(|s| s.tag == tag)
    }

    /// Find all child loop occurrences with the given id
    #[must_use]
    pub fn find_loops(&self, id: &str) -> Vec<&LoopNode> {
        self.children
            .iter()
            .filter_map(TransactionNode::as_loop)
            .filter(|l| l.id == id)
            .collect()
    }

    /// Number of segments in this occurrence, nested loops included
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.children.iter().map(TransactionNode::segment_count).sum()
    }
}

impl From<Segment> for TransactionNode {
    fn from(segment: Segment) -> Self {
        Self::Segment(segment)
    }
}

impl From<LoopNode> for TransactionNode {
    fn from(node: LoopNode) -> Self {
        Self::Loop(node)
    }
}
