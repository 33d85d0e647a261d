//! # Entity Registry
//!
//! Maps table names to what the engine needs to know about them: which
//! validator checks their rows and which parent table they point at.
//!
//! ## Registry Lookup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  EntityRegistry                                                        │
//! │  ├── "colors"  → EntityDescriptor { parent: "palettes" via palette_id,│
//! │  │                                  validator: SchemaValidator }       │
//! │  └── "sizes"   → EntityDescriptor { parent: None, validator: custom }  │
//! │                                                                         │
//! │  registry.get("shapes") → Err(UnknownTable)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use seed_core::validation::not_null_without_default;
use seed_core::{FieldError, RecordId, Row, TableSchema, Violation};
use seed_db::Database;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Validators
// =============================================================================

/// Ids touched by a run, handed to post-sync validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncedIds {
    pub inserted: Vec<RecordId>,
    /// Ids that went through the update phase, changed or not.
    pub updated: Vec<RecordId>,
    /// Subset of `updated` whose stored row actually changed.
    pub actually_updated: Vec<RecordId>,
    pub deleted: Vec<RecordId>,
}

/// Row rules for one entity.
#[async_trait]
pub trait EntityValidator: Send + Sync {
    /// Checks one converted row before it is written.
    ///
    /// For updates the row is the stored row overlaid with the new values.
    fn validate(&self, row: &Row, schema: &TableSchema) -> Vec<FieldError> {
        not_null_without_default(schema, row)
    }

    /// Checks table-wide invariants after the writes of a run.
    async fn after_sync_validate(
        &self,
        _db: &Database,
        _ids: &SyncedIds,
    ) -> SyncResult<Vec<Violation>> {
        Ok(Vec::new())
    }
}

/// Enforces only what the table schema says.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl EntityValidator for SchemaValidator {}

// =============================================================================
// Parent Relation
// =============================================================================

/// The table a synced table references through a foreign-key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentRelation {
    pub table: String,
    pub foreign_key: String,
}

impl ParentRelation {
    /// Relation with the conventional key: `palettes` → `palette_id`.
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        let foreign_key = format!("{}_id", singularize(&table));
        ParentRelation { table, foreign_key }
    }

    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = foreign_key.into();
        self
    }
}

/// English singular of a table name, for the common plural endings.
///
/// ```rust
/// use seed_sync::singularize;
///
/// assert_eq!(singularize("categories"), "category");
/// assert_eq!(singularize("boxes"), "box");
/// assert_eq!(singularize("colors"), "color");
/// assert_eq!(singularize("status"), "status");
/// ```
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }

    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }

    if word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        return word[..word.len() - 1].to_string();
    }

    word.to_string()
}

// =============================================================================
// Descriptor & Registry
// =============================================================================

/// Everything the engine knows about one table.
#[derive(Clone)]
pub struct EntityDescriptor {
    pub table: String,
    pub parent: Option<ParentRelation>,
    pub validator: Arc<dyn EntityValidator>,
}

impl EntityDescriptor {
    pub fn new(table: impl Into<String>) -> Self {
        EntityDescriptor {
            table: table.into(),
            parent: None,
            validator: Arc::new(SchemaValidator),
        }
    }

    pub fn with_parent(mut self, parent: ParentRelation) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn EntityValidator>) -> Self {
        self.validator = validator;
        self
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("table", &self.table)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

/// Explicit table → descriptor map, built by the host.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, EntityDescriptor>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, descriptor: EntityDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// Adds or replaces a descriptor.
    pub fn register(&mut self, descriptor: EntityDescriptor) {
        self.entities.insert(descriptor.table.clone(), descriptor);
    }

    /// Looks up a table.
    ///
    /// ## Errors
    /// `SyncError::UnknownTable` if the table was never registered.
    pub fn get(&self, table: &str) -> SyncResult<&EntityDescriptor> {
        self.entities
            .get(table)
            .ok_or_else(|| SyncError::UnknownTable(table.to_string()))
    }

    pub fn contains(&self, table: &str) -> bool {
        self.entities.contains_key(table)
    }

    /// Registered table names, sorted.
    pub fn tables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
