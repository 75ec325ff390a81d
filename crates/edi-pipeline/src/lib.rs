#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-pipeline
//!
//! Reading interchanges end to end.
//!
//! [`EdiReader`] and [`AsyncEdiReader`] pull segments from the tokenizer,
//! track interchange and group envelopes, look up each transaction's
//! grammar in a shared [`SchemaRegistry`](edi_schema::SchemaRegistry) and
//! hand back mapped transactions in document order. Problems with the
//! input are reported as [`ReadItem::Invalid`] items; only a failing
//! input stream ends a read early.

pub mod reader;

pub use reader::{
    AsyncEdiReader, EdiReader, InvalidItem, ParsedTransaction, ReadItem, ReaderConfig, ReaderStats,
};

use thiserror::Error;

/// Errors that end a read
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(edi_codec::Error),
}

impl From<edi_codec::Error> for Error {
    fn from(error: edi_codec::Error) -> Self {
        match error {
            edi_codec::Error::Io(io) => Self::Io(io),
            other => Self::Codec(other),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
