//! Schema loader for JSON and YAML grammar files
//!
//! A grammar file describes one message type:
//!
//! ```yaml
//! code: "850"
//! version: "004010"
//! name: Purchase Order
//! children:
//!   - segment: BEG
//!     min: 1
//!     elements:
//!       - { position: 1, type: ID, required: true, codes: ["00", "05"] }
//!   - loop: N1
//!     max: unbounded
//!     children:
//!       - segment: N1
//!         min: 1
//! ```
//!
//! `min` defaults to 0 and `max` to 1; `max` accepts a count or `unbounded`.

use crate::model::{DataType, ElementRule, MaxOccurs, MessageSchema, Pattern, SchemaNode};
use crate::registry::SchemaRegistry;
use crate::{Error, Result};
use edi_ir::MessageKey;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

#[derive(Debug, Deserialize)]
struct SchemaFile {
    code: String,
    version: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    children: Vec<NodeFile>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeFile {
    Segment(SegmentFile),
    Loop(LoopFile),
}

#[derive(Debug, Deserialize)]
struct SegmentFile {
    segment: String,
    #[serde(default)]
    min: usize,
    #[serde(default)]
    max: Option<MaxFile>,
    #[serde(default)]
    elements: Vec<ElementFile>,
}

#[derive(Debug, Deserialize)]
struct LoopFile {
    #[serde(rename = "loop")]
    id: String,
    #[serde(default)]
    min: usize,
    #[serde(default)]
    max: Option<MaxFile>,
    children: Vec<NodeFile>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaxFile {
    Count(usize),
    Word(String),
}

#[derive(Debug, Deserialize)]
struct ElementFile {
    position: usize,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default = "default_data_type")]
    data_type: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    min_length: usize,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    codes: Vec<String>,
    #[serde(default)]
    code_list: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    components: Vec<ElementFile>,
}

fn default_data_type() -> String {
    "AN".to_string()
}

/// Loads grammar files from a set of search paths
#[derive(Debug, Clone)]
pub struct SchemaLoader {
    schema_paths: Vec<PathBuf>,
}

impl SchemaLoader {
    /// Create a loader with the given search paths
    #[must_use]
    pub fn new(schema_paths: Vec<PathBuf>) -> Self {
        Self { schema_paths }
    }

    /// Add a search path for schema files
    pub fn add_path(&mut self, path: PathBuf) {
        self.schema_paths.push(path);
    }

    /// Load a schema from a specific file path
    pub fn load_from_file(&self, path: &Path) -> Result<MessageSchema> {
        trace!("Loading schema from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;

        if is_yaml(path) {
            self.load_from_yaml(&content)
        } else {
            self.load_from_json(&content)
        }
    }

    /// Load a schema from JSON string
    pub fn load_from_json(&self, json: &str) -> Result<MessageSchema> {
        let file: SchemaFile = serde_json::from_str(json)
            .map_err(|e| Error::InvalidFormat(format!("JSON parse error: {e}")))?;
        convert_schema_file(file)
    }

    /// Load a schema from YAML string
    pub fn load_from_yaml(&self, yaml: &str) -> Result<MessageSchema> {
        let file: SchemaFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::InvalidFormat(format!("YAML parse error: {e}")))?;
        convert_schema_file(file)
    }

    /// Load every `.json`, `.yaml` and `.yml` file directly inside `dir`
    pub fn load_directory(&self, dir: &Path) -> Result<Vec<MessageSchema>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_schema_file(p))
            .collect();
        paths.sort();

        paths.iter().map(|p| self.load_from_file(p)).collect()
    }

    /// Load every grammar file in every search path into a registry
    ///
    /// Missing search paths are skipped.
    pub fn load_registry(&self) -> Result<SchemaRegistry> {
        let mut builder = SchemaRegistry::builder();
        for dir in &self.schema_paths {
            if !dir.is_dir() {
                debug!("Skipping missing schema path: {:?}", dir);
                continue;
            }
            for schema in self.load_directory(dir)? {
                builder.register(schema);
            }
        }
        let registry = builder.build();
        info!("Loaded {} schemas", registry.len());
        Ok(registry)
    }
}

impl Default for SchemaLoader {
    fn default() -> Self {
        Self::new(vec![PathBuf::from(".")])
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e == "yaml" || e == "yml")
}

fn is_schema_file(path: &Path) -> bool {
    is_yaml(path) || path.extension().is_some_and(|e| e == "json")
}

fn convert_schema_file(file: SchemaFile) -> Result<MessageSchema> {
    let key = MessageKey::new(file.code, file.version);
    let children = file
        .children
        .into_iter()
        .map(convert_node)
        .collect::<Result<Vec<_>>>()?;
    let name = file.name.unwrap_or_else(|| key.code.clone());
    debug!("Converted schema file for {}", key);
    MessageSchema::new(key, name, children)
}

fn convert_node(node: NodeFile) -> Result<SchemaNode> {
    match node {
        NodeFile::Segment(s) => {
            let mut segment = SchemaNode::segment(s.segment, s.min, convert_max(s.max)?);
            for element in s.elements {
                segment = segment.with_element(convert_element(element)?);
            }
            Ok(segment.into())
        }
        NodeFile::Loop(l) => {
            let children = l
                .children
                .into_iter()
                .map(convert_node)
                .collect::<Result<Vec<_>>>()?;
            Ok(SchemaNode::looped(l.id, l.min, convert_max(l.max)?, children))
        }
    }
}

fn convert_max(max: Option<MaxFile>) -> Result<MaxOccurs> {
    match max {
        None => Ok(MaxOccurs::Bounded(1)),
        Some(MaxFile::Count(n)) => Ok(MaxOccurs::Bounded(n)),
        Some(MaxFile::Word(word)) => match word.as_str() {
            "unbounded" | ">1" | "*" => Ok(MaxOccurs::Unbounded),
            other => other
                .parse()
                .map(MaxOccurs::Bounded)
                .map_err(|_| Error::InvalidFormat(format!("Invalid max occurrences: {other}"))),
        },
    }
}

fn convert_element(file: ElementFile) -> Result<ElementRule> {
    let data_type = DataType::parse(&file.data_type)
        .ok_or_else(|| Error::InvalidFormat(format!("Unknown data type: {}", file.data_type)))?;

    let mut rule = ElementRule::new(file.position, data_type).named(file.name);
    rule.required = file.required;
    rule.min_length = file.min_length;
    rule.max_length = file.max_length;
    rule.codes = file.codes;
    rule.code_list = file.code_list;
    if let Some(pattern) = file.pattern {
        rule.pattern = Some(Pattern::new(&pattern)?);
    }
    rule.components = file
        .components
        .into_iter()
        .map(convert_element)
        .collect::<Result<Vec<_>>>()?;
    Ok(rule)
}
