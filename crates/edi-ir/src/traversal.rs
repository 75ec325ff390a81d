//! Traversal APIs for transaction graphs

use crate::document::Transaction;
use crate::node::{LoopNode, TransactionNode};
use crate::segment::Segment;
use crate::Error;
use crate::Result;

/// Trait for visiting a transaction graph
pub trait Traversal {
    /// Visit a segment (mapped or unmapped)
    fn visit(&mut self, node: &TransactionNode, path: &[String]);

    /// Called when entering a loop occurrence
    fn enter(&mut self, _node: &LoopNode, _path: &[String]) {}

    /// Called when leaving a loop occurrence
    fn leave(&mut self, _node: &LoopNode, _path: &[String]) {}

    /// Returns true if traversal should continue
    fn should_continue(&self) -> bool {
        true
    }
}

/// Walk a transaction body using a visitor
pub fn walk<T: Traversal>(transaction: &Transaction, visitor: &mut T) {
    let mut path = vec![transaction.code().to_string()];
    for node in &transaction.body {
        walk_recursive(node, visitor, &mut path);
    }
}

fn walk_recursive<T: Traversal>(node: &TransactionNode, visitor: &mut T, path: &mut Vec<String>) {
    if !visitor.should_continue() {
        return;
    }

    match node {
        TransactionNode::Loop(lp) => {
            visitor.enter(lp, path);
            path.push(lp.id.clone());
            for child in &lp.children {
                walk_recursive(child, visitor, path);
            }
            path.pop();
            visitor.leave(lp, path);
        }
        _ => visitor.visit(node, path),
    }
}

/// Depth-first iterator over the segments of a transaction
///
/// Yields the header, every body segment in graph order (loops flattened,
/// unmapped segments included), then the trailer if one is present.
pub struct Segments<'a> {
    header: Option<&'a Segment>,
    stack: Vec<std::slice::Iter<'a, TransactionNode>>,
    trailer: Option<&'a Segment>,
}

impl<'a> Segments<'a> {
    /// Iterate over every segment of `transaction`
    #[must_use]
    pub fn new(transaction: &'a Transaction) -> Self {
        Self {
            header: Some(&transaction.header),
            stack: vec![transaction.body.iter()],
            trailer: transaction.trailer.as_ref(),
        }
    }

    /// Iterate over body segments only
    #[must_use]
    pub fn body(nodes: &'a [TransactionNode]) -> Self {
        Self {
            header: None,
            stack: vec![nodes.iter()],
            trailer: None,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(header) = self.header.take() {
            return Some(header);
        }
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(TransactionNode::Loop(lp)) => self.stack.push(lp.children.iter()),
                Some(TransactionNode::Segment(s) | TransactionNode::Unmapped(s)) => {
                    return Some(s);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
        self.trailer.take()
    }
}

/// Resolve a path such as `N1[1]/N3` against a list of nodes
///
/// Each step names a segment tag or loop id; the optional bracketed index
/// (0-based) selects among siblings with that name.
pub fn navigate<'a>(nodes: &'a [TransactionNode], path: &str) -> Result<&'a TransactionNode> {
    let mut current = nodes;
    let mut found: Option<&'a TransactionNode> = None;
    let mut walked: Vec<&str> = Vec::new();

    for step in path.split('/').filter(|s| !s.is_empty()) {
        if found.is_some_and(|n| n.as_loop().is_none()) {
            return Err(Error::invalid_path(path, "segments have no children"));
        }

        let (name, index) = match step.find('[') {
            Some(open) => {
                let close = step
                    .find(']')
                    .ok_or_else(|| Error::invalid_path(path, format!("unclosed bracket in {step}")))?;
                let index: usize = step[open + 1..close]
                    .parse()
                    .map_err(|_| Error::invalid_path(path, format!("invalid index in {step}")))?;
                (&step[..open], index)
            }
            None => (step, 0),
        };

        walked.push(step);
        let node = current
            .iter()
            .filter(|n| n.name() == name)
            .nth(index)
            .ok_or_else(|| Error::node_not_found(walked.join("/")))?;
        if let Some(lp) = node.as_loop() {
            current = &lp.children;
        }
        found = Some(node);
    }

    found.ok_or_else(|| Error::invalid_path(path, "empty path"))
}
