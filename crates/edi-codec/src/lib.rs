#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-codec
//!
//! Wire-level reading and writing of X12 and EDIFACT interchanges.
//!
//! The tokenizer turns a byte stream into [`Segment`](edi_ir::Segment)s,
//! detecting separators from `ISA` and `UNA` headers as it goes. The writer
//! renders segments back to bytes, tracking envelope nesting so that
//! trailers and control numbers can be produced automatically.

pub mod envelopes;
pub mod syntax;
pub mod tokenizer;
pub mod writer;

pub use envelopes::{
    ControlNumberGenerator, EnvelopeLevel, FileBasedControlNumberGenerator,
    MemoryControlNumberGenerator, SegmentRole,
};
pub use syntax::{Dialect, SeparatorSet};
pub use tokenizer::{AsyncTokenizer, SegmentScanner, TokenizeError, Tokenizer, TokenizerConfig};
pub use writer::{AsyncEdiWriter, EdiWriter, UnaPolicy, WriterConfig, WriterSession};

use thiserror::Error;

/// Errors that can occur when reading or writing interchanges
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Illegal writer state: {0}")]
    IllegalState(String),

    #[error("Invalid separators: {0}")]
    InvalidSeparators(String),

    #[error("Control number error: {0}")]
    ControlNumber(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the underlying stream failed; such errors end a read
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
