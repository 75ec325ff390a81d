#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-ir
//!
//! Format-neutral structures shared by every stage of the EDI engine.
//!
//! Tokenizers produce [`Segment`]s, the mapper arranges them into a
//! [`Transaction`] graph of [`TransactionNode`]s, and both mapping and
//! validation report problems into an [`ErrorContext`] tree.

/// Position-addressable error trees.
pub mod context;
/// Transaction containers and message keys.
pub mod document;
/// Source positions.
pub mod metadata;
/// Transaction graph nodes.
pub mod node;
/// Segment and element tokens.
pub mod segment;
/// Visitors and iterators over transaction graphs.
pub mod traversal;

pub use context::{ErrorContext, ErrorKind, ErrorRecord, FlatError, Level, PathStep};
pub use document::{MessageKey, Transaction};
pub use metadata::Position;
pub use node::{LoopNode, NodeKind, TransactionNode};
pub use segment::{Element, Segment};
pub use traversal::{navigate, walk, Segments, Traversal};

use thiserror::Error;

/// Errors that can occur when working with the IR
#[derive(Error, Debug)]
pub enum Error {
    #[error("Node not found at path: {path}")]
    NodeNotFound { path: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl Error {
    /// Build a node-not-found error with path context.
    pub fn node_not_found(path: impl Into<String>) -> Self {
        Self::NodeNotFound { path: path.into() }
    }

    /// Build an invalid-path error with input path and parsing reason.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-local result type for IR operations.
pub type Result<T> = std::result::Result<T, Error>;
