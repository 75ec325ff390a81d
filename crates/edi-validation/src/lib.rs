#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # edi-validation
//!
//! Checks transaction graphs against their message schemas: occurrence
//! bounds, segment order, element value rules, code lists and trailers.
//!
//! Findings are data. A [`ValidationResult`] carries an
//! [`ErrorContext`](edi_ir::ErrorContext) tree with every violation found,
//! and validating the same transaction twice yields the same tree.
//!
//! ```rust
//! use edi_ir::{MessageKey, Segment, Transaction};
//! use edi_schema::{MessageSchema, SchemaNode};
//! use edi_validation::{ValidationConfig, ValidationEngine};
//!
//! let schema = MessageSchema::new(
//!     MessageKey::new("997", "004010"),
//!     "Functional Acknowledgment",
//!     vec![SchemaNode::segment("AK1", 1, 1).into()],
//! )
//! .unwrap();
//!
//! let mut tx = Transaction::new(Segment::from_values("ST", ["997", "0001"]));
//! tx.push(Segment::from_values("AK1", ["PO", "1"]));
//! let tx = tx.with_trailer(Segment::from_values("SE", ["3", "0001"]));
//!
//! let result = ValidationEngine::new().validate(&tx, &schema, &ValidationConfig::default());
//! assert!(result.is_valid);
//! ```

pub mod codelist;
pub mod engine;
pub mod rules;

pub use codelist::{CodeList, CodeListRegistry, CodeListResult};
pub use engine::{ValidationConfig, ValidationEngine, ValidationResult};
pub use rules::{check_value, Violation};

use thiserror::Error;

/// Errors raised while preparing validation inputs
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid code list: {0}")]
    CodeList(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
