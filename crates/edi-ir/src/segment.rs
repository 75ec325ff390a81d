//! Segment and element tokens
//!
//! A [`Segment`] is the unit produced by the tokenizer and consumed by the
//! writer: a tag followed by ordered data elements. Each [`Element`] holds one
//! or more repetitions, and each repetition one or more components. A simple
//! element is a single repetition with a single component.
#![allow(clippy::must_use_candidate)] // Accessors are obvious at call sites.
#![allow(clippy::return_self_not_must_use)] // Fluent builders return Self for chaining.

use crate::metadata::Position;
use serde::{Deserialize, Serialize};

/// A data element (simple, composite or repeated)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Repetitions of this element; never empty
    pub repetitions: Vec<Vec<String>>,
}

impl Element {
    /// Create a simple element holding a single value
    pub fn simple(value: impl Into<String>) -> Self {
        Self {
            repetitions: vec![vec![value.into()]],
        }
    }

    /// Create an empty element
    pub fn empty() -> Self {
        Self::simple(String::new())
    }

    /// Create a composite element from its components
    pub fn composite<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        if components.is_empty() {
            return Self::empty();
        }
        Self {
            repetitions: vec![components],
        }
    }

    /// Create a repeated element; each repetition is a list of components
    pub fn repeated(repetitions: Vec<Vec<String>>) -> Self {
        let repetitions: Vec<Vec<String>> = repetitions
            .into_iter()
            .map(|r| if r.is_empty() { vec![String::new()] } else { r })
            .collect();
        if repetitions.is_empty() {
            return Self::empty();
        }
        Self { repetitions }
    }

    /// First component of the first repetition
    pub fn value(&self) -> &str {
        self.repetitions
            .first()
            .and_then(|r| r.first())
            .map_or("", String::as_str)
    }

    /// Components of the first repetition
    pub fn components(&self) -> &[String] {
        self.repetitions.first().map_or(&[], Vec::as_slice)
    }

    /// Component at `index` (0-based) of the first repetition
    pub fn component(&self, index: usize) -> Option<&str> {
        self.components().get(index).map(String::as_str)
    }

    /// Whether the element carries more than one component
    pub fn is_composite(&self) -> bool {
        self.repetitions.iter().any(|r| r.len() > 1)
    }

    /// Whether the element carries more than one repetition
    pub fn is_repeated(&self) -> bool {
        self.repetitions.len() > 1
    }

    /// Whether every component of every repetition is empty
    pub fn is_empty(&self) -> bool {
        self.repetitions.iter().flatten().all(String::is_empty)
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Self::simple(value)
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Self::simple(value)
    }
}

/// A segment: tag plus ordered data elements
///
/// Equality is structural: the source position is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Segment tag (e.g. `BEG`, `NAD`)
    pub tag: String,
    /// Data elements, in wire order
    pub elements: Vec<Element>,
    /// Position in the source stream, when the segment was read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.elements == other.elements
    }
}

impl Eq for Segment {}

impl Segment {
    /// Create a segment with no elements
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            elements: Vec::new(),
            position: None,
        }
    }

    /// Create a segment from simple element values
    pub fn from_values<I, S>(tag: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag: tag.into(),
            elements: values.into_iter().map(Element::simple).collect(),
            position: None,
        }
    }

    /// Append an element
    pub fn with_element(mut self, element: impl Into<Element>) -> Self {
        self.elements.push(element.into());
        self
    }

    /// Attach a source position
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Element at `index` (0-based, so `BEG03` is index 2)
    pub fn element(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    /// Value of the element at `index`, empty when absent
    pub fn value(&self, index: usize) -> &str {
        self.elements.get(index).map_or("", Element::value)
    }

    /// Replace the element at `index`, padding with empty elements as needed
    pub fn set_value(&mut self, index: usize, element: impl Into<Element>) {
        while self.elements.len() <= index {
            self.elements.push(Element::empty());
        }
        self.elements[index] = element.into();
    }
}
