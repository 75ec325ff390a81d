//! Schema model definitions
//!
//! A [`MessageSchema`] is the grammar of one message type and version: an
//! ordered tree of [`SchemaNode`]s where segments are leaves and loops group
//! repeating runs of children. A loop is always entered through its first
//! child, whose tag is precomputed as the loop's trigger.
#![allow(clippy::must_use_candidate)] // Model constructors and accessors are self-describing.
#![allow(clippy::return_self_not_must_use)] // Builder chains return Self.

use crate::{Error, Result};
use edi_ir::MessageKey;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

/// Upper occurrence bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOccurs {
    Bounded(usize),
    Unbounded,
}

impl MaxOccurs {
    /// Whether one more occurrence fits after `count`
    pub fn allows_another(self, count: usize) -> bool {
        match self {
            Self::Bounded(max) => count < max,
            Self::Unbounded => true,
        }
    }

    /// Whether `count` exceeds the bound
    pub fn is_exceeded_by(self, count: usize) -> bool {
        match self {
            Self::Bounded(max) => count > max,
            Self::Unbounded => false,
        }
    }

    /// Whether `min` does not exceed the bound
    pub fn admits(self, min: usize) -> bool {
        match self {
            Self::Bounded(max) => min <= max,
            Self::Unbounded => true,
        }
    }
}

impl From<usize> for MaxOccurs {
    fn from(max: usize) -> Self {
        Self::Bounded(max)
    }
}

impl fmt::Display for MaxOccurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(max) => write!(f, "{max}"),
            Self::Unbounded => f.write_str(">1"),
        }
    }
}

/// Declared data type of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// `AN` / `an`: any printable characters
    Alphanumeric,
    /// `A` / `a`: letters and spaces
    Alphabetic,
    /// `ID`: coded value
    Identifier,
    /// `Nn` / `n`: digits with an implied decimal point
    Numeric { implied_decimals: u8 },
    /// `R`: decimal number with optional explicit point
    Decimal,
    /// `DT`: CCYYMMDD or YYMMDD
    Date,
    /// `TM`: HHMM, HHMMSS or HHMMSSd..d
    Time,
}

impl DataType {
    /// Parse an X12 or EDIFACT type code
    pub fn parse(code: &str) -> Option<Self> {
        let parsed = match code {
            "AN" | "an" => Self::Alphanumeric,
            "A" | "a" => Self::Alphabetic,
            "ID" => Self::Identifier,
            "R" => Self::Decimal,
            "DT" => Self::Date,
            "TM" => Self::Time,
            "n" | "N" => Self::Numeric {
                implied_decimals: 0,
            },
            _ => {
                let digits = code.strip_prefix('N')?;
                Self::Numeric {
                    implied_decimals: digits.parse().ok()?,
                }
            }
        };
        Some(parsed)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alphanumeric => f.write_str("AN"),
            Self::Alphabetic => f.write_str("A"),
            Self::Identifier => f.write_str("ID"),
            Self::Numeric { implied_decimals } => write!(f, "N{implied_decimals}"),
            Self::Decimal => f.write_str("R"),
            Self::Date => f.write_str("DT"),
            Self::Time => f.write_str("TM"),
        }
    }
}

/// A compiled regular expression matched against whole values
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile `source`; the expression must match the entire value
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{source})$"))
            .map_err(|e| Error::InvalidSchema(format!("bad pattern '{source}': {e}")))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Whether `value` matches
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// The expression as declared
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

/// Rule for one data element (or one component of a composite)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRule {
    /// 1-based position within the segment (or composite)
    pub position: usize,
    pub name: String,
    pub required: bool,
    pub data_type: DataType,
    pub min_length: usize,
    pub max_length: Option<usize>,
    /// Inline allowed values; empty means unrestricted
    pub codes: Vec<String>,
    /// Named external code list
    pub code_list: Option<String>,
    pub pattern: Option<Pattern>,
    /// Component rules, for composite elements
    pub components: Vec<ElementRule>,
}

impl ElementRule {
    /// Create an optional rule with no length or code constraints
    pub fn new(position: usize, data_type: DataType) -> Self {
        Self {
            position,
            name: String::new(),
            required: false,
            data_type,
            min_length: 0,
            max_length: None,
            codes: Vec::new(),
            code_list: None,
            pattern: None,
            components: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = min;
        self.max_length = Some(max);
        self
    }

    pub fn codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn code_list(mut self, name: impl Into<String>) -> Self {
        self.code_list = Some(name.into());
        self
    }

    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_component(mut self, component: ElementRule) -> Self {
        self.components.push(component);
        self
    }

    /// Reference used in error paths, e.g. `03`
    pub fn reference(&self) -> String {
        format!("{:02}", self.position)
    }
}

/// A segment position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSchema {
    pub tag: String,
    pub min_occurs: usize,
    pub max_occurs: MaxOccurs,
    /// Element rules, by position; empty means elements are not checked
    pub elements: Vec<ElementRule>,
}

impl SegmentSchema {
    pub fn with_element(mut self, rule: ElementRule) -> Self {
        self.elements.push(rule);
        self
    }

    /// Highest declared element position
    pub fn declared_elements(&self) -> usize {
        self.elements.iter().map(|e| e.position).max().unwrap_or(0)
    }
}

/// A loop position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSchema {
    pub id: String,
    pub min_occurs: usize,
    pub max_occurs: MaxOccurs,
    pub children: Vec<SchemaNode>,
    trigger: String,
}

impl LoopSchema {
    /// Tag of the first segment reachable through the first child
    pub fn trigger(&self) -> &str {
        &self.trigger
    }
}

/// A position in a message grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    Segment(SegmentSchema),
    Loop(LoopSchema),
}

impl SchemaNode {
    /// Create a segment position
    pub fn segment(tag: impl Into<String>, min: usize, max: impl Into<MaxOccurs>) -> SegmentSchema {
        SegmentSchema {
            tag: tag.into(),
            min_occurs: min,
            max_occurs: max.into(),
            elements: Vec::new(),
        }
    }

    /// Create a loop position; the trigger is taken from the first child
    pub fn looped(
        id: impl Into<String>,
        min: usize,
        max: impl Into<MaxOccurs>,
        children: Vec<SchemaNode>,
    ) -> Self {
        let trigger = children
            .first()
            .map(|c| c.trigger().to_string())
            .unwrap_or_default();
        Self::Loop(LoopSchema {
            id: id.into(),
            min_occurs: min,
            max_occurs: max.into(),
            children,
            trigger,
        })
    }

    /// Tag that starts an occurrence of this position
    pub fn trigger(&self) -> &str {
        match self {
            Self::Segment(s) => &s.tag,
            Self::Loop(l) => &l.trigger,
        }
    }

    /// Segment tag or loop id
    pub fn name(&self) -> &str {
        match self {
            Self::Segment(s) => &s.tag,
            Self::Loop(l) => &l.id,
        }
    }

    pub fn min_occurs(&self) -> usize {
        match self {
            Self::Segment(s) => s.min_occurs,
            Self::Loop(l) => l.min_occurs,
        }
    }

    pub fn max_occurs(&self) -> MaxOccurs {
        match self {
            Self::Segment(s) => s.max_occurs,
            Self::Loop(l) => l.max_occurs,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, Self::Loop(_))
    }

    pub fn as_loop(&self) -> Option<&LoopSchema> {
        match self {
            Self::Loop(l) => Some(l),
            Self::Segment(_) => None,
        }
    }

    pub fn as_segment(&self) -> Option<&SegmentSchema> {
        match self {
            Self::Segment(s) => Some(s),
            Self::Loop(_) => None,
        }
    }

    fn check(&self, path: &str) -> Result<()> {
        let max = self.max_occurs();
        if max == MaxOccurs::Bounded(0) {
            return Err(Error::InvalidSchema(format!(
                "{path}/{}: max occurrences must be at least 1",
                self.name()
            )));
        }
        if !max.admits(self.min_occurs()) {
            return Err(Error::InvalidSchema(format!(
                "{path}/{}: min {} exceeds max {max}",
                self.name(),
                self.min_occurs()
            )));
        }
        if let Self::Loop(l) = self {
            if l.children.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "{path}/{}: loop has no children",
                    l.id
                )));
            }
            let nested = format!("{path}/{}", l.id);
            for child in &l.children {
                child.check(&nested)?;
            }
        }
        Ok(())
    }

    fn collect_tags(&self, tags: &mut HashSet<String>) {
        match self {
            Self::Segment(s) => {
                tags.insert(s.tag.clone());
            }
            Self::Loop(l) => {
                for child in &l.children {
                    child.collect_tags(tags);
                }
            }
        }
    }
}

impl From<SegmentSchema> for SchemaNode {
    fn from(segment: SegmentSchema) -> Self {
        Self::Segment(segment)
    }
}

/// Grammar for one message type and version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    pub key: MessageKey,
    pub name: String,
    pub children: Vec<SchemaNode>,
    known_tags: HashSet<String>,
}

impl MessageSchema {
    /// Build a schema, checking occurrence bounds and loop structure
    pub fn new(key: MessageKey, name: impl Into<String>, children: Vec<SchemaNode>) -> Result<Self> {
        let root = key.to_string();
        for child in &children {
            child.check(&root)?;
        }
        let mut known_tags = HashSet::new();
        for child in &children {
            child.collect_tags(&mut known_tags);
        }
        Ok(Self {
            key,
            name: name.into(),
            children,
            known_tags,
        })
    }

    /// Whether `tag` appears anywhere in the grammar
    pub fn knows(&self, tag: &str) -> bool {
        self.known_tags.contains(tag)
    }

    /// Every segment tag in the grammar
    pub fn known_tags(&self) -> &HashSet<String> {
        &self.known_tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn po_children() -> Vec<SchemaNode> {
        vec![
            SchemaNode::segment("BEG", 1, 1).into(),
            SchemaNode::looped(
                "N1",
                0,
                200,
                vec![
                    SchemaNode::segment("N1", 1, 1).into(),
                    SchemaNode::segment("N3", 0, 2).into(),
                ],
            ),
            SchemaNode::segment("CTT", 0, MaxOccurs::Unbounded).into(),
        ]
    }

    #[test]
    fn test_loop_trigger_is_first_child_tag() {
        let nested = SchemaNode::looped(
            "PO1",
            1,
            MaxOccurs::Unbounded,
            vec![SchemaNode::looped(
                "INNER",
                1,
                1,
                vec![SchemaNode::segment("PO1", 1, 1).into()],
            )],
        );
        assert_eq!(nested.trigger(), "PO1");
        assert_eq!(nested.name(), "PO1");
        assert!(nested.is_loop());
    }

    #[test]
    fn test_message_schema_known_tags() {
        let schema =
            MessageSchema::new(MessageKey::new("850", "004010"), "Purchase Order", po_children())
                .unwrap();
        assert!(schema.knows("N3"));
        assert!(schema.knows("CTT"));
        assert!(!schema.knows("ZZZ"));
        assert_eq!(schema.known_tags().len(), 4);
    }

    #[test]
    fn test_empty_loop_rejected() {
        let result = MessageSchema::new(
            MessageKey::new("850", "004010"),
            "bad",
            vec![SchemaNode::looped("N1", 0, 1, Vec::new())],
        );
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let result = MessageSchema::new(
            MessageKey::new("850", "004010"),
            "bad",
            vec![SchemaNode::segment("BEG", 3, 2).into()],
        );
        assert!(matches!(result, Err(Error::InvalidSchema(_))));

        let zero = MessageSchema::new(
            MessageKey::new("850", "004010"),
            "bad",
            vec![SchemaNode::segment("BEG", 0, 0).into()],
        );
        assert!(zero.is_err());
    }

    #[test]
    fn test_max_occurs_bounds() {
        let two = MaxOccurs::Bounded(2);
        assert!(two.allows_another(1));
        assert!(!two.allows_another(2));
        assert!(two.is_exceeded_by(3));
        assert!(!two.is_exceeded_by(2));
        assert!(!MaxOccurs::Unbounded.is_exceeded_by(10_000));
    }

    #[test]
    fn test_data_type_codes() {
        assert_eq!(DataType::parse("AN"), Some(DataType::Alphanumeric));
        assert_eq!(DataType::parse("an"), Some(DataType::Alphanumeric));
        assert_eq!(
            DataType::parse("N2"),
            Some(DataType::Numeric { implied_decimals: 2 })
        );
        assert_eq!(
            DataType::parse("n"),
            Some(DataType::Numeric { implied_decimals: 0 })
        );
        assert_eq!(DataType::parse("DT"), Some(DataType::Date));
        assert_eq!(DataType::parse("XX"), None);
        assert_eq!(DataType::Numeric { implied_decimals: 2 }.to_string(), "N2");
    }

    #[test]
    fn test_pattern_matches_whole_value() {
        let pattern = Pattern::new("[0-9]{3}").unwrap();
        assert!(pattern.is_match("123"));
        assert!(!pattern.is_match("1234"));
        assert!(Pattern::new("[").is_err());
    }

    #[test]
    fn test_element_rule_builder() {
        let rule = ElementRule::new(1, DataType::Identifier)
            .named("Transaction Set Purpose Code")
            .required()
            .length(2, 2)
            .codes(["00", "05"]);
        assert_eq!(rule.reference(), "01");
        assert!(rule.required);
        assert_eq!(rule.max_length, Some(2));
        assert_eq!(rule.codes.len(), 2);
    }
}
