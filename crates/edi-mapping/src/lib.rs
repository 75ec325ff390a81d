#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-mapping
//!
//! Arranges the flat body segments of a transaction into the loop
//! hierarchy its [`MessageSchema`](edi_schema::MessageSchema) describes.
//!
//! Mapping is total: every segment ends up somewhere in the graph, and
//! structural problems (missing, surplus and unexpected segments) are
//! reported in an [`ErrorContext`](edi_ir::ErrorContext) rather than as
//! errors.

pub mod mapper;

pub use mapper::{
    GraphMapper, MappedBody, MappedTransaction, MapperConfig, MappingSession, TieBreak,
};
