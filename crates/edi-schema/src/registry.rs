//! Immutable schema registry

use crate::model::MessageSchema;
use crate::{Error, Result};
use edi_ir::MessageKey;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry of message grammars keyed by code and version
///
/// Built once and never mutated afterwards, so one instance can be shared
/// through an `Arc` across concurrent parses.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<MessageKey, Arc<MessageSchema>>,
}

impl SchemaRegistry {
    /// Start building a registry
    #[must_use]
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Build a registry from a set of schemas
    pub fn from_schemas(schemas: impl IntoIterator<Item = MessageSchema>) -> Self {
        let mut builder = Self::builder();
        for schema in schemas {
            builder.register(schema);
        }
        builder.build()
    }

    /// Look up the grammar for `key`
    pub fn get(&self, key: &MessageKey) -> Result<Arc<MessageSchema>> {
        self.schemas
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownSchema { key: key.clone() })
    }

    /// Check if a schema exists
    #[must_use]
    pub fn contains(&self, key: &MessageKey) -> bool {
        self.schemas.contains_key(key)
    }

    /// Registered keys, in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &MessageKey> {
        self.schemas.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Collects schemas before freezing them into a [`SchemaRegistry`]
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: HashMap<MessageKey, Arc<MessageSchema>>,
}

impl SchemaRegistryBuilder {
    /// Add a schema; a later schema with the same key replaces the earlier one
    pub fn register(&mut self, schema: MessageSchema) -> &mut Self {
        let key = schema.key.clone();
        if self.schemas.insert(key.clone(), Arc::new(schema)).is_some() {
            warn!("Replacing schema already registered for {}", key);
        } else {
            debug!("Registered schema {}", key);
        }
        self
    }

    /// Fluent form of [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, schema: MessageSchema) -> Self {
        self.register(schema);
        self
    }

    /// Freeze the collected schemas
    #[must_use]
    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry {
            schemas: self.schemas,
        }
    }
}
