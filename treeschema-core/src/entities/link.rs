//! Lineage links: directed edges from a source field to a target field,
//! owned by a transformation.
//!
//! Link creation accepts four input shapes (one `LinkSpec`, a list of them, one
//! `(source, target)` pair of field handles, or a list of pairs). All of them
//! normalise into the same ordered, de-duplicated `Vec<LinkSpec>`, so the
//! submitted batch depends only on the field IDs involved.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::field::Field;
use super::links;
use crate::client::TreeSchema;
use crate::error::{Result, TreeSchemaError};
use crate::resolver::impl_handle_ids;

/// One lineage edge to create, by field ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkSpec {
    pub source_field_id: i64,
    pub target_field_id: i64,
}

impl LinkSpec {
    pub fn new(source_field_id: i64, target_field_id: i64) -> Self {
        Self {
            source_field_id,
            target_field_id,
        }
    }

    /// Edge from `source` to `target`.
    pub fn between(source: &Field, target: &Field) -> Self {
        Self::new(source.id(), target.id())
    }

    fn validate(&self) -> Result<()> {
        if self.source_field_id <= 0 || self.target_field_id <= 0 {
            return Err(TreeSchemaError::validation(format!(
                "link {} -> {} must reference valid field IDs",
                self.source_field_id, self.target_field_id
            )));
        }
        Ok(())
    }
}

impl From<(&Field, &Field)> for LinkSpec {
    fn from((source, target): (&Field, &Field)) -> Self {
        LinkSpec::between(source, target)
    }
}

/// A batch of links to create, in any of the accepted input shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInput(Vec<LinkSpec>);

impl LinkInput {
    /// Validate every edge and drop repeats, keeping first occurrences.
    pub fn normalize(self) -> Result<Vec<LinkSpec>> {
        let mut out: Vec<LinkSpec> = Vec::with_capacity(self.0.len());
        for spec in self.0 {
            spec.validate()?;
            if !out.contains(&spec) {
                out.push(spec);
            }
        }
        Ok(out)
    }
}

impl From<LinkSpec> for LinkInput {
    fn from(spec: LinkSpec) -> Self {
        LinkInput(vec![spec])
    }
}

impl From<Vec<LinkSpec>> for LinkInput {
    fn from(specs: Vec<LinkSpec>) -> Self {
        LinkInput(specs)
    }
}

impl From<&[LinkSpec]> for LinkInput {
    fn from(specs: &[LinkSpec]) -> Self {
        LinkInput(specs.to_vec())
    }
}

impl From<(&Field, &Field)> for LinkInput {
    fn from(pair: (&Field, &Field)) -> Self {
        LinkInput(vec![pair.into()])
    }
}

impl From<Vec<(&Field, &Field)>> for LinkInput {
    fn from(pairs: Vec<(&Field, &Field)>) -> Self {
        LinkInput(pairs.into_iter().map(LinkSpec::from).collect())
    }
}

impl From<&[(&Field, &Field)]> for LinkInput {
    fn from(pairs: &[(&Field, &Field)]) -> Self {
        LinkInput(pairs.iter().copied().map(LinkSpec::from).collect())
    }
}

/// Parse a single `{"source_field_id", "target_field_id"}` mapping or a list of them.
impl TryFrom<Value> for LinkInput {
    type Error = TreeSchemaError;

    fn try_from(value: Value) -> Result<Self> {
        let invalid = |e: serde_json::Error| {
            TreeSchemaError::validation(format!("invalid link mapping: {e}"))
        };
        match value {
            Value::Array(_) => Ok(LinkInput(serde_json::from_value(value).map_err(invalid)?)),
            Value::Object(_) => Ok(LinkInput(vec![serde_json::from_value(value).map_err(invalid)?])),
            other => Err(TreeSchemaError::validation(format!(
                "expected a link mapping or a list of mappings, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: i64,
    pub source_field_id: i64,
    pub target_field_id: i64,
    #[serde(default)]
    pub deprecated: bool,
}

impl LinkRecord {
    pub fn spec(&self) -> LinkSpec {
        LinkSpec::new(self.source_field_id, self.target_field_id)
    }
}

/// How to resolve a single link: by ID, or get-or-create by its field pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLookup {
    Id(i64),
    Between(LinkSpec),
}

impl From<i64> for LinkLookup {
    fn from(id: i64) -> Self {
        LinkLookup::Id(id)
    }
}

impl From<LinkSpec> for LinkLookup {
    fn from(spec: LinkSpec) -> Self {
        LinkLookup::Between(spec)
    }
}

impl From<(&Field, &Field)> for LinkLookup {
    fn from(pair: (&Field, &Field)) -> Self {
        LinkLookup::Between(pair.into())
    }
}

/// An entry of a link batch that the server refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLink {
    #[serde(flatten)]
    pub spec: LinkSpec,
    pub message: String,
}

/// Outcome of a batch link creation.
#[derive(Debug, Clone, Default)]
pub struct LinkBatch {
    pub created: BTreeMap<i64, Link>,
    pub failed: Vec<FailedLink>,
}

impl LinkBatch {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Handle to a lineage link.
#[derive(Debug, Clone)]
pub struct Link {
    session: TreeSchema,
    transformation_id: i64,
    record: LinkRecord,
}

impl_handle_ids!(Link);

impl Link {
    pub(crate) fn from_record(session: TreeSchema, transformation_id: i64, record: LinkRecord) -> Self {
        Self {
            session,
            transformation_id,
            record,
        }
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn source_field_id(&self) -> i64 {
        self.record.source_field_id
    }

    pub fn target_field_id(&self) -> i64 {
        self.record.target_field_id
    }

    pub fn transformation_id(&self) -> i64 {
        self.transformation_id
    }

    pub fn spec(&self) -> LinkSpec {
        self.record.spec()
    }

    pub fn record(&self) -> &LinkRecord {
        &self.record
    }

    pub async fn refresh(&mut self) -> Result<&Self> {
        self.record = links(&self.session, self.transformation_id)
            .get(self.record.id)
            .await?;
        Ok(self)
    }
}
