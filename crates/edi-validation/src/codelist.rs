//! External code lists
//!
//! Element rules may name a code list (for example the X12 entity
//! identifier codes of element 98) instead of carrying the codes inline.
//! Lists are registered once and looked up by name during validation.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// A named set of permitted codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeList {
    pub name: String,
    codes: HashSet<String>,
    pub case_sensitive: bool,
    pub description: Option<String>,
}

impl CodeList {
    /// Empty, case-sensitive list
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            codes: HashSet::new(),
            case_sensitive: true,
            description: None,
        }
    }

    /// List holding `codes`
    pub fn with_codes<I, S>(name: impl Into<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::new(name);
        list.codes = codes.into_iter().map(Into::into).collect();
        list
    }

    #[must_use]
    pub fn case_sensitive(mut self, sensitive: bool) -> Self {
        self.case_sensitive = sensitive;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add(&mut self, code: impl Into<String>) {
        self.codes.insert(code.into());
    }

    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        if self.case_sensitive {
            self.codes.contains(code)
        } else {
            self.codes.iter().any(|c| c.eq_ignore_ascii_case(code))
        }
    }

    /// Codes in sorted order
    #[must_use]
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.codes.iter().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Outcome of a lookup in a [`CodeListRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeListResult {
    Valid,
    Invalid { code: String, list_name: String },
    ListNotFound { list_name: String },
}

impl CodeListResult {
    /// Unknown lists do not fail a value
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid { .. })
    }
}

#[derive(Debug, Deserialize)]
struct CodeListFile {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_case_sensitive")]
    case_sensitive: bool,
    codes: Vec<String>,
}

fn default_case_sensitive() -> bool {
    true
}

impl From<CodeListFile> for CodeList {
    fn from(file: CodeListFile) -> Self {
        let mut list = CodeList::with_codes(file.name, file.codes).case_sensitive(file.case_sensitive);
        list.description = file.description;
        list
    }
}

/// Code lists by name
#[derive(Debug, Clone, Default)]
pub struct CodeListRegistry {
    lists: HashMap<String, CodeList>,
}

impl CodeListRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a list, replacing any list of the same name
    pub fn register(&mut self, list: CodeList) -> &mut Self {
        self.lists.insert(list.name.clone(), list);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CodeList> {
        self.lists.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Check `code` against the list called `list_name`
    #[must_use]
    pub fn check(&self, list_name: &str, code: &str) -> CodeListResult {
        match self.lists.get(list_name) {
            None => CodeListResult::ListNotFound {
                list_name: list_name.to_string(),
            },
            Some(list) if list.contains(code) => CodeListResult::Valid,
            Some(list) => CodeListResult::Invalid {
                code: code.to_string(),
                list_name: list.name.clone(),
            },
        }
    }

    /// Parse a JSON array of `{name, codes, description?, case_sensitive?}`
    pub fn from_json(json: &str) -> Result<Self> {
        let files: Vec<CodeListFile> =
            serde_json::from_str(json).map_err(|e| Error::CodeList(e.to_string()))?;
        let mut registry = Self::new();
        for file in files {
            registry.register(file.into());
        }
        Ok(registry)
    }

    /// Load a JSON code list file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&content)?;
        info!("Loaded {} code list(s) from {}", registry.len(), path.display());
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_sensitivity() {
        let list = CodeList::with_codes("98", ["ST", "BT"]);
        assert!(list.contains("ST"));
        assert!(!list.contains("st"));

        let relaxed = list.case_sensitive(false);
        assert!(relaxed.contains("st"));
        assert!(!relaxed.contains("SF"));
    }

    #[test]
    fn test_codes_sorted() {
        let mut list = CodeList::new("355");
        list.add("KG");
        list.add("EA");
        list.add("CA");
        assert_eq!(list.codes(), ["CA", "EA", "KG"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_registry_check() {
        let mut registry = CodeListRegistry::new();
        registry.register(CodeList::with_codes("98", ["ST", "BT"]));

        assert_eq!(registry.check("98", "ST"), CodeListResult::Valid);
        let invalid = registry.check("98", "ZZ");
        assert!(!invalid.is_valid());
        assert!(matches!(invalid, CodeListResult::Invalid { ref code, .. } if code == "ZZ"));

        let missing = registry.check("1234", "A");
        assert!(missing.is_valid());
        assert!(matches!(missing, CodeListResult::ListNotFound { .. }));
    }

    #[test]
    fn test_from_json() {
        let registry = CodeListRegistry::from_json(
            r#"[
                {"name": "98", "codes": ["ST", "BT"], "description": "Entity Identifier Code"},
                {"name": "3035", "codes": ["by", "su"], "case_sensitive": false}
            ]"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("98").and_then(|l| l.description.as_deref()),
            Some("Entity Identifier Code")
        );
        assert!(registry.check("3035", "BY").is_valid());

        assert!(matches!(
            CodeListRegistry::from_json("{\"name\": 1}"),
            Err(Error::CodeList(_))
        ));
    }
}
