//! Position-addressable error accumulation
//!
//! An [`ErrorContext`] is a tree whose levels follow the document structure
//! (interchange, group, transaction, loop, segment, element). Mapping and
//! validation attach [`ErrorRecord`]s to the node for the position they
//! concern, creating intermediate nodes on demand, so a missing segment is
//! reported at its schema position even though nothing was read there.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural level of a context node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Interchange,
    Group,
    Transaction,
    Loop,
    Segment,
    Element,
}

/// Kind of violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or unterminated segment
    StructuralTokenize,
    /// No grammar registered for the message type/version
    UnknownSchema,
    /// Segment with no valid schema position
    UnexpectedSegment,
    /// Fewer occurrences than the schema minimum
    MissingRequiredSegment,
    /// More occurrences than the schema maximum
    OccursTooManyTimes,
    /// Element value fails a declared format or code rule
    ElementConstraint,
    /// Trailer count or control number does not match its header
    TrailerMismatch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StructuralTokenize => "structural",
            Self::UnknownSchema => "unknown schema",
            Self::UnexpectedSegment => "unexpected segment",
            Self::MissingRequiredSegment => "missing required",
            Self::OccursTooManyTimes => "occurs too many times",
            Self::ElementConstraint => "element constraint",
            Self::TrailerMismatch => "trailer mismatch",
        };
        f.write_str(name)
    }
}

/// One violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Violation kind
    pub kind: ErrorKind,

    /// Human-readable description
    pub message: String,

    /// Offending value, if any
    pub value: Option<String>,

    /// Expected constraint, if any
    pub expected: Option<String>,

    /// 1-based ordinal of the segment within its transaction
    pub segment_position: Option<usize>,
}

impl ErrorRecord {
    /// Create a record with a kind and message
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: None,
            expected: None,
            segment_position: None,
        }
    }

    /// Attach the offending value
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Attach the expected constraint
    #[must_use]
    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// Attach the segment ordinal
    #[must_use]
    pub fn at_segment(mut self, position: usize) -> Self {
        self.segment_position = Some(position);
        self
    }
}

/// One step of a context path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
    pub level: Level,
    pub name: String,
    pub occurrence: usize,
}

impl PathStep {
    /// Create a step
    #[must_use]
    pub fn new(level: Level, name: impl Into<String>, occurrence: usize) -> Self {
        Self {
            level,
            name: name.into(),
            occurrence,
        }
    }
}

/// A node of the error tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Structural level
    pub level: Level,

    /// Segment tag, loop id, element reference or envelope name
    pub name: String,

    /// 1-based occurrence among siblings with the same level and name
    pub occurrence: usize,

    /// Records attached directly to this node
    pub errors: Vec<ErrorRecord>,

    /// Child nodes, in first-touched order
    pub children: Vec<ErrorContext>,
}

/// A flattened error: the record plus its rendered tree path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatError {
    /// Path such as `850/N1[2]/N1[1]/02[1]`
    pub path: String,

    /// The record itself
    pub record: ErrorRecord,
}

impl fmt::Display for FlatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.path, self.record.message, self.record.kind)?;
        if let Some(position) = self.record.segment_position {
            write!(f, " at segment {position}")?;
        }
        Ok(())
    }
}

impl ErrorContext {
    /// Create an empty root node
    #[must_use]
    pub fn new(level: Level, name: impl Into<String>) -> Self {
        Self {
            level,
            name: name.into(),
            occurrence: 1,
            errors: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create an empty transaction-level root
    #[must_use]
    pub fn transaction(name: impl Into<String>) -> Self {
        Self::new(Level::Transaction, name)
    }

    /// Attach a record to this node
    pub fn add(&mut self, record: ErrorRecord) -> &mut Self {
        self.errors.push(record);
        self
    }

    /// Get or create the child with the given identity
    pub fn child_mut(
        &mut self,
        level: Level,
        name: &str,
        occurrence: usize,
    ) -> &mut ErrorContext {
        let index = match self
            .children
            .iter()
            .position(|c| c.level == level && c.name == name && c.occurrence == occurrence)
        {
            Some(index) => index,
            None => {
                self.children.push(ErrorContext {
                    level,
                    name: name.to_string(),
                    occurrence,
                    errors: Vec::new(),
                    children: Vec::new(),
                });
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    /// Get or create the node at `path`, relative to this node
    pub fn at_path_mut(&mut self, path: &[PathStep]) -> &mut ErrorContext {
        let mut node = self;
        for step in path {
            node = node.child_mut(step.level, &step.name, step.occurrence);
        }
        node
    }

    /// Attach a record at `path`, relative to this node
    pub fn add_at(&mut self, path: &[PathStep], record: ErrorRecord) {
        self.at_path_mut(path).add(record);
    }

    /// Find an existing child
    #[must_use]
    pub fn child(&self, level: Level, name: &str, occurrence: usize) -> Option<&ErrorContext> {
        self.children
            .iter()
            .find(|c| c.level == level && c.name == name && c.occurrence == occurrence)
    }

    /// Total number of records in this subtree
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len() + self.children.iter().map(ErrorContext::error_count).sum::<usize>()
    }

    /// Whether any record exists in this subtree
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.children.iter().any(ErrorContext::has_errors)
    }

    /// Number of records of `kind` in this subtree
    #[must_use]
    pub fn count_kind(&self, kind: ErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
            + self
                .children
                .iter()
                .map(|c| c.count_kind(kind))
                .sum::<usize>()
    }

    /// Remove branches that carry no records
    pub fn prune(&mut self) {
        for child in &mut self.children {
            child.prune();
        }
        self.children.retain(ErrorContext::has_errors);
    }

    /// Move every record of `other` into this tree, matching nodes by identity
    pub fn merge(&mut self, other: ErrorContext) {
        self.errors.extend(other.errors);
        for child in other.children {
            let target = self.child_mut(child.level, &child.name, child.occurrence);
            target.merge(child);
        }
    }

    /// Linear list of every record, depth-first, with rendered paths
    #[must_use]
    pub fn flatten(&self) -> Vec<FlatError> {
        let mut out = Vec::new();
        self.flatten_into(&mut Vec::new(), &mut out);
        out
    }

    fn flatten_into(&self, prefix: &mut Vec<String>, out: &mut Vec<FlatError>) {
        prefix.push(self.label());
        let path = prefix.join("/");
        out.extend(self.errors.iter().map(|record| FlatError {
            path: path.clone(),
            record: record.clone(),
        }));
        for child in &self.children {
            child.flatten_into(prefix, out);
        }
        prefix.pop();
    }

    fn label(&self) -> String {
        match self.level {
            Level::Interchange | Level::Group | Level::Transaction => self.name.clone(),
            _ => format!("{}[{}]", self.name, self.occurrence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_path(occurrence: usize) -> Vec<PathStep> {
        vec![
            PathStep::new(Level::Loop, "N1", occurrence),
            PathStep::new(Level::Segment, "N1", 1),
        ]
    }

    #[test]
    fn test_empty_context_is_valid() {
        let ctx = ErrorContext::transaction("850");
        assert!(!ctx.has_errors());
        assert_eq!(ctx.error_count(), 0);
        assert!(ctx.flatten().is_empty());
    }

    #[test]
    fn test_add_at_creates_intermediate_nodes() {
        let mut ctx = ErrorContext::transaction("850");
        ctx.add_at(
            &loop_path(2),
            ErrorRecord::new(ErrorKind::ElementConstraint, "bad qualifier").with_value("XX"),
        );

        let n1_loop = ctx.child(Level::Loop, "N1", 2).unwrap();
        let n1 = n1_loop.child(Level::Segment, "N1", 1).unwrap();
        assert_eq!(n1.errors.len(), 1);
        assert_eq!(ctx.error_count(), 1);
    }

    #[test]
    fn test_child_mut_reuses_existing_node() {
        let mut ctx = ErrorContext::transaction("850");
        ctx.add_at(&loop_path(1), ErrorRecord::new(ErrorKind::UnexpectedSegment, "a"));
        ctx.add_at(&loop_path(1), ErrorRecord::new(ErrorKind::UnexpectedSegment, "b"));
        assert_eq!(ctx.children.len(), 1);
        assert_eq!(ctx.count_kind(ErrorKind::UnexpectedSegment), 2);
    }

    #[test]
    fn test_flatten_keeps_every_record() {
        let mut ctx = ErrorContext::transaction("850");
        ctx.add(ErrorRecord::new(ErrorKind::TrailerMismatch, "count"));
        ctx.add_at(&loop_path(1), ErrorRecord::new(ErrorKind::UnexpectedSegment, "x"));
        ctx.add_at(
            &loop_path(3),
            ErrorRecord::new(ErrorKind::MissingRequiredSegment, "y").at_segment(9),
        );

        let flat = ctx.flatten();
        assert_eq!(flat.len(), ctx.error_count());
        assert_eq!(flat[0].path, "850");
        assert_eq!(flat[1].path, "850/N1[1]/N1[1]");
        assert_eq!(flat[2].path, "850/N1[3]/N1[1]");
        assert!(flat[2].to_string().ends_with("at segment 9"));
    }

    #[test]
    fn test_prune_removes_empty_branches() {
        let mut ctx = ErrorContext::transaction("850");
        ctx.child_mut(Level::Loop, "N1", 1);
        ctx.add_at(&loop_path(2), ErrorRecord::new(ErrorKind::UnexpectedSegment, "x"));
        ctx.prune();
        assert_eq!(ctx.children.len(), 1);
        assert_eq!(ctx.children[0].occurrence, 2);
    }

    #[test]
    fn test_merge_combines_matching_nodes() {
        let mut a = ErrorContext::transaction("850");
        a.add_at(&loop_path(1), ErrorRecord::new(ErrorKind::UnexpectedSegment, "a"));
        let mut b = ErrorContext::transaction("850");
        b.add_at(&loop_path(1), ErrorRecord::new(ErrorKind::OccursTooManyTimes, "b"));
        b.add(ErrorRecord::new(ErrorKind::TrailerMismatch, "c"));

        a.merge(b);
        assert_eq!(a.error_count(), 3);
        assert_eq!(a.children.len(), 1);
    }
}
