#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-schema
//!
//! Declarative message grammars and the registry that serves them.
//!
//! Grammars are trees of segment and loop positions with occurrence bounds
//! and optional element rules. They are loaded from JSON or YAML files (or
//! built in code), checked once, and frozen into a [`SchemaRegistry`] keyed
//! by message code and version.

pub mod loader;
pub mod model;
pub mod registry;

pub use loader::SchemaLoader;
pub use model::{
    DataType, ElementRule, LoopSchema, MaxOccurs, MessageSchema, Pattern, SchemaNode,
    SegmentSchema,
};
pub use registry::{SchemaRegistry, SchemaRegistryBuilder};

use edi_ir::MessageKey;
use thiserror::Error;

/// Errors that can occur when working with schemas
#[derive(Error, Debug)]
pub enum Error {
    #[error("No schema registered for {key}")]
    UnknownSchema { key: MessageKey },

    #[error("Invalid schema format: {0}")]
    InvalidFormat(String),

    #[error("Invalid schema structure: {0}")]
    InvalidSchema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
