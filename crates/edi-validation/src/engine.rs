//! Structural and element validation of mapped transactions
//!
//! The engine re-walks a transaction graph against its schema using the
//! mapper's cursor rule: within one level, children must appear at or after
//! the position of their predecessor, loops matched by id and segments by
//! tag. Every violation is recorded in the result's [`ErrorContext`];
//! validation itself never fails.

use crate::codelist::CodeListRegistry;
use crate::rules::{self, Violation};
use edi_codec::envelopes;
use edi_ir::{
    ErrorContext, ErrorKind, ErrorRecord, Level, PathStep, Segment, Transaction, TransactionNode,
};
use edi_schema::{ElementRule, MessageSchema, SchemaNode, SchemaRegistry, SegmentSchema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Validation switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Do not check the trailer's count and control number
    pub skip_trailer_validation: bool,

    /// Check element values against their declared rules
    pub validate_elements: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            skip_trailer_validation: false,
            validate_elements: true,
        }
    }
}

/// Outcome of validating one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// `true` exactly when `errors` holds no records
    pub is_valid: bool,
    pub errors: ErrorContext,
}

impl ValidationResult {
    fn from_errors(mut errors: ErrorContext) -> Self {
        errors.prune();
        Self {
            is_valid: !errors.has_errors(),
            errors,
        }
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.error_count()
    }
}

/// Validates transactions against message schemas
#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    code_lists: Option<Arc<CodeListRegistry>>,
}

impl ValidationEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve named code lists through `code_lists`
    #[must_use]
    pub fn with_code_lists(code_lists: Arc<CodeListRegistry>) -> Self {
        Self {
            code_lists: Some(code_lists),
        }
    }

    /// Validate `transaction` against `schema`
    #[must_use]
    pub fn validate(
        &self,
        transaction: &Transaction,
        schema: &MessageSchema,
        config: &ValidationConfig,
    ) -> ValidationResult {
        let mut walker = Walker {
            code_lists: self.code_lists.as_deref(),
            config,
            errors: ErrorContext::transaction(transaction.code()),
            ordinal: 1,
        };
        walker.level(&schema.children, &transaction.body, &mut Vec::new());
        if !config.skip_trailer_validation {
            check_trailer(transaction, &mut walker.errors);
        }
        let result = ValidationResult::from_errors(walker.errors);
        debug!(
            "Validated {} {}: {} error(s)",
            schema.key,
            transaction.control_number(),
            result.error_count()
        );
        result
    }

    /// Validate against the schema registered for the transaction's key
    ///
    /// A missing key or unregistered schema is recorded as UnknownSchema;
    /// the trailer is still checked.
    #[must_use]
    pub fn validate_registered(
        &self,
        transaction: &Transaction,
        registry: &SchemaRegistry,
        config: &ValidationConfig,
    ) -> ValidationResult {
        let lookup = transaction
            .key
            .as_ref()
            .map(|key| registry.get(key).map_err(|e| e.to_string()));
        match lookup {
            Some(Ok(schema)) => self.validate(transaction, &schema, config),
            failed => {
                let mut errors = ErrorContext::transaction(transaction.code());
                let message = match failed {
                    Some(Err(message)) => message,
                    _ => "Transaction has no message key".to_string(),
                };
                let mut record = ErrorRecord::new(ErrorKind::UnknownSchema, message);
                if let Some(key) = &transaction.key {
                    record = record.with_value(key.to_string());
                }
                errors.add(record);
                if !config.skip_trailer_validation {
                    check_trailer(transaction, &mut errors);
                }
                ValidationResult::from_errors(errors)
            }
        }
    }
}

struct Walker<'a> {
    code_lists: Option<&'a CodeListRegistry>,
    config: &'a ValidationConfig,
    errors: ErrorContext,
    /// Ordinal of the last segment visited; the header is 1
    ordinal: usize,
}

impl Walker<'_> {
    fn level(&mut self, schema: &[SchemaNode], nodes: &[TransactionNode], path: &mut Vec<PathStep>) {
        let mut counts = vec![0usize; schema.len()];
        let mut unmatched: Vec<(String, usize)> = Vec::new();
        let mut cursor = 0;

        for node in nodes {
            let position = match node {
                TransactionNode::Unmapped(_) => None,
                TransactionNode::Segment(segment) => (cursor..schema.len())
                    .find(|&i| matches!(&schema[i], SchemaNode::Segment(s) if s.tag == segment.tag)),
                TransactionNode::Loop(lp) => (cursor..schema.len())
                    .find(|&i| matches!(&schema[i], SchemaNode::Loop(l) if l.id == lp.id)),
            };

            let Some(i) = position else {
                let occurrence = bump(&mut unmatched, node.name());
                self.unexpected(node, path, occurrence);
                continue;
            };
            counts[i] += 1;
            cursor = i;

            match (node, &schema[i]) {
                (TransactionNode::Segment(segment), SchemaNode::Segment(rules)) => {
                    self.ordinal += 1;
                    path.push(PathStep::new(Level::Segment, segment.tag.clone(), counts[i]));
                    if self.config.validate_elements {
                        self.elements(segment, rules, path);
                    }
                    path.pop();
                }
                (TransactionNode::Loop(lp), SchemaNode::Loop(loop_schema)) => {
                    path.push(PathStep::new(Level::Loop, lp.id.clone(), counts[i]));
                    self.level(&loop_schema.children, &lp.children, path);
                    path.pop();
                }
                _ => {}
            }
        }

        for (node, &count) in schema.iter().zip(&counts) {
            if count < node.min_occurs() {
                self.add(
                    path,
                    step_for(node, count + 1),
                    ErrorRecord::new(
                        ErrorKind::MissingRequiredSegment,
                        format!(
                            "{} occurs {count} time(s), at least {} required",
                            node.name(),
                            node.min_occurs()
                        ),
                    )
                    .with_expected(format!("at least {}", node.min_occurs())),
                );
            } else if node.max_occurs().is_exceeded_by(count) {
                let max = node.max_occurs();
                let record = ErrorRecord::new(
                    ErrorKind::OccursTooManyTimes,
                    format!("{} occurs {count} time(s), at most {max} allowed", node.name()),
                )
                .with_value(count.to_string())
                .with_expected(format!("at most {max}"));
                let first_surplus = match max {
                    edi_schema::MaxOccurs::Bounded(n) => n + 1,
                    edi_schema::MaxOccurs::Unbounded => count,
                };
                self.add(path, step_for(node, first_surplus), record);
            }
        }
    }

    fn unexpected(&mut self, node: &TransactionNode, path: &[PathStep], occurrence: usize) {
        let first = self.ordinal + 1;
        self.ordinal += node.segment_count();
        let (level, what) = match node {
            TransactionNode::Loop(_) => (Level::Loop, "Loop"),
            _ => (Level::Segment, "Segment"),
        };
        let message = match node {
            TransactionNode::Unmapped(_) => format!("{what} {} is not part of the message", node.name()),
            _ => format!("{what} {} is out of order", node.name()),
        };
        self.add(
            path,
            PathStep::new(level, node.name(), occurrence),
            ErrorRecord::new(ErrorKind::UnexpectedSegment, message)
                .with_value(node.name())
                .at_segment(first),
        );
    }

    fn elements(&mut self, segment: &Segment, schema: &SegmentSchema, path: &[PathStep]) {
        if schema.elements.is_empty() {
            return;
        }
        let ordinal = self.ordinal;
        for rule in &schema.elements {
            let element = segment
                .element(rule.position.saturating_sub(1))
                .filter(|e| !e.is_empty());
            let Some(element) = element else {
                if rule.required {
                    let step = PathStep::new(Level::Element, rule.reference(), 1);
                    self.add(path, step, missing(segment, rule, ordinal));
                }
                continue;
            };

            for (r, repetition) in element.repetitions.iter().enumerate() {
                let step = PathStep::new(Level::Element, rule.reference(), r + 1);
                if rule.components.is_empty() {
                    let value = repetition.first().map_or("", String::as_str);
                    self.values(value, rule, path, &step, ordinal);
                    continue;
                }
                for component in &rule.components {
                    let value = repetition
                        .get(component.position.saturating_sub(1))
                        .map_or("", String::as_str);
                    let name = format!("{}-{:02}", rule.reference(), component.position);
                    let step = PathStep::new(Level::Element, name, r + 1);
                    if value.is_empty() {
                        if component.required {
                            self.add(path, step, missing(segment, component, ordinal));
                        }
                    } else {
                        self.values(value, component, path, &step, ordinal);
                    }
                }
            }
        }

        let used = segment
            .elements
            .iter()
            .rposition(|e| !e.is_empty())
            .map_or(0, |i| i + 1);
        let declared = schema.declared_elements();
        if used > declared {
            let mut at = path.to_vec();
            if let Some(last) = at.pop() {
                self.add(
                    &at,
                    last,
                    ErrorRecord::new(
                        ErrorKind::ElementConstraint,
                        format!("{} has {used} elements, {declared} declared", segment.tag),
                    )
                    .with_expected(format!("at most {declared} elements"))
                    .at_segment(ordinal),
                );
            }
        }
    }

    fn values(&mut self, value: &str, rule: &ElementRule, path: &[PathStep], step: &PathStep, ordinal: usize) {
        for Violation { message, value, expected } in rules::check_value(value, rule, self.code_lists) {
            self.add(
                path,
                step.clone(),
                ErrorRecord::new(ErrorKind::ElementConstraint, message)
                    .with_value(value)
                    .with_expected(expected)
                    .at_segment(ordinal),
            );
        }
    }

    fn add(&mut self, path: &[PathStep], step: PathStep, record: ErrorRecord) {
        let mut at = path.to_vec();
        at.push(step);
        self.errors.add_at(&at, record);
    }
}

fn missing(segment: &Segment, rule: &ElementRule, ordinal: usize) -> ErrorRecord {
    let name = if rule.name.is_empty() {
        String::new()
    } else {
        format!(" ({})", rule.name)
    };
    ErrorRecord::new(
        ErrorKind::ElementConstraint,
        format!("Required element {}{}{name} is missing", segment.tag, rule.reference()),
    )
    .with_expected("a value")
    .at_segment(ordinal)
}

fn step_for(node: &SchemaNode, occurrence: usize) -> PathStep {
    let level = if node.is_loop() {
        Level::Loop
    } else {
        Level::Segment
    };
    PathStep::new(level, node.name(), occurrence)
}

fn bump(seen: &mut Vec<(String, usize)>, name: &str) -> usize {
    if let Some(entry) = seen.iter_mut().find(|(n, _)| n == name) {
        entry.1 += 1;
        return entry.1;
    }
    seen.push((name.to_string(), 1));
    1
}

fn check_trailer(transaction: &Transaction, errors: &mut ErrorContext) {
    let Some(trailer) = &transaction.trailer else {
        errors.add(ErrorRecord::new(
            ErrorKind::TrailerMismatch,
            format!("Transaction {} has no trailer", transaction.control_number()),
        ));
        return;
    };
    let actual = transaction.expected_segment_count();
    let trailer_ctx = errors.child_mut(Level::Segment, &trailer.tag, 1);
    for mismatch in envelopes::check_trailer(&transaction.header, trailer, actual) {
        trailer_ctx.add(
            ErrorRecord::new(ErrorKind::TrailerMismatch, mismatch.to_string())
                .with_value(mismatch.found)
                .with_expected(mismatch.expected)
                .at_segment(actual),
        );
    }
}
