//! Applying parsed manifest metadata to the catalog.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::client::TreeSchema;
use crate::entities::{
    DataStoreRecord, Field, FieldRecord, FieldUpdate, LinkSpec, NewField, NewSchema,
    NewTransformation, Schema, SchemaRecord, SchemaUpdate, Transformation, TransformationRecord,
    data_stores, fields, schemas, transformations,
};
use crate::error::{Result, TreeSchemaError};

/// Metadata the server extracted from a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResults {
    #[serde(default)]
    pub schemas: Vec<ParsedSchema>,
    #[serde(default)]
    pub lineage: Vec<ParsedLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSchema {
    pub name: String,
    #[serde(rename = "type", default = "default_schema_type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: Vec<ParsedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedField {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub entity_type: String,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub data_format: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A field addressed by name. `data_store` defaults to the store that owns the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    #[serde(default)]
    pub data_store: Option<String>,
    pub schema: String,
    pub field: String,
}

/// A lineage edge between two fields, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLink {
    pub source: FieldPath,
    pub target: FieldPath,
}

fn default_schema_type() -> String {
    "table".to_string()
}

fn default_field_type() -> String {
    "scalar".to_string()
}

fn default_data_type() -> String {
    "unknown".to_string()
}

/// Which categories of parsed metadata to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    /// Create schemas and fields that do not exist yet.
    pub add_schemas_fields: bool,
    /// Overwrite descriptions of existing schemas and fields.
    pub update_descriptions: bool,
    /// Merge manifest tags into schemas and fields.
    pub update_tags: bool,
    /// Create lineage links on the data store's dbt transformation.
    pub add_lineage: bool,
}

impl SaveOptions {
    pub fn all() -> Self {
        Self {
            add_schemas_fields: true,
            update_descriptions: true,
            update_tags: true,
            add_lineage: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.add_schemas_fields || self.update_descriptions || self.update_tags || self.add_lineage)
    }

    fn touches_entities(&self) -> bool {
        self.add_schemas_fields || self.update_descriptions || self.update_tags
    }
}

/// Counts of the changes a save applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub schemas_created: usize,
    pub fields_created: usize,
    pub descriptions_updated: usize,
    pub tags_added: usize,
    pub links_created: usize,
    pub links_existing: usize,
    pub links_failed: usize,
    /// Schemas, fields or lineage endpoints that were not in the catalog and
    /// were not created.
    pub skipped: usize,
}

/// The data store a manifest belongs to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SaveTarget {
    pub(crate) data_store_id: i64,
    pub(crate) data_store_name: String,
    pub(crate) tech_poc_id: Option<i64>,
}

impl From<&DataStoreRecord> for SaveTarget {
    fn from(record: &DataStoreRecord) -> Self {
        Self {
            data_store_id: record.id,
            data_store_name: record.name.clone(),
            tech_poc_id: record.tech_poc_id,
        }
    }
}

impl SaveTarget {
    fn tech_poc(&self, creating: &str) -> Result<i64> {
        self.tech_poc_id.ok_or_else(|| {
            TreeSchemaError::validation(format!(
                "data store '{}' has no tech_poc; cannot create {creating} from the manifest",
                self.data_store_name
            ))
        })
    }

    fn transformation_name(&self) -> String {
        format!("dbt: {}", self.data_store_name)
    }
}

pub(crate) async fn apply(
    session: &TreeSchema,
    target: &SaveTarget,
    results: ParseResults,
    options: SaveOptions,
) -> Result<SaveSummary> {
    let mut applier = Applier {
        session,
        target,
        options,
        summary: SaveSummary::default(),
        stores: HashMap::new(),
        schema_ids: HashMap::new(),
        field_ids: HashMap::new(),
    };
    if options.touches_entities() {
        for schema in &results.schemas {
            applier.apply_schema(schema).await?;
        }
    }
    if options.add_lineage && !results.lineage.is_empty() {
        applier.apply_lineage(&results.lineage).await?;
    }
    Ok(applier.summary)
}

struct Applier<'a> {
    session: &'a TreeSchema,
    target: &'a SaveTarget,
    options: SaveOptions,
    summary: SaveSummary,
    stores: HashMap<String, Option<i64>>,
    schema_ids: HashMap<(i64, String), Option<i64>>,
    field_ids: HashMap<(i64, i64, String), Option<i64>>,
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn description_changed(current: Option<&str>, parsed: Option<&str>) -> Option<String> {
    match parsed.map(str::trim) {
        Some(p) if !p.is_empty() && current != Some(p) => Some(p.to_string()),
        _ => None,
    }
}

impl Applier<'_> {
    async fn apply_schema(&mut self, parsed: &ParsedSchema) -> Result<()> {
        let ds = self.target.data_store_id;
        let collection = schemas(self.session, ds);

        let (record, created): (SchemaRecord, bool) = match collection.find(&parsed.name).await {
            Ok(record) => (record, false),
            Err(e) if e.is_not_found() && self.options.add_schemas_fields => {
                let mut payload = NewSchema::new(
                    &parsed.name,
                    &parsed.entity_type,
                    self.target.tech_poc("schemas")?,
                );
                if let Some(d) = parsed.description.as_deref().filter(|d| !d.trim().is_empty()) {
                    payload = payload.description(d);
                }
                collection.create_or_adopt(&payload).await?
            }
            Err(e) if e.is_not_found() => {
                debug!(schema = parsed.name.as_str(), "Schema not in catalog; skipped");
                self.summary.skipped += 1;
                self.schema_ids.insert((ds, parsed.name.clone()), None);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if created {
            self.summary.schemas_created += 1;
        }
        self.schema_ids
            .insert((ds, parsed.name.clone()), Some(record.id));

        let mut schema = Schema::from_record(self.session.clone(), ds, record);
        if self.options.update_descriptions && !created {
            if let Some(d) = description_changed(
                schema.record().description.as_deref(),
                parsed.description.as_deref(),
            ) {
                schema.update(SchemaUpdate::new().description(d)).await?;
                self.summary.descriptions_updated += 1;
            }
        }
        if self.options.update_tags {
            let added = schema.add_tags(clean_tags(&parsed.tags)).await?;
            self.summary.tags_added += added.len();
        }

        for field in &parsed.fields {
            self.apply_field(&schema, field).await?;
        }
        Ok(())
    }

    async fn apply_field(&mut self, schema: &Schema, parsed: &ParsedField) -> Result<()> {
        let ds = self.target.data_store_id;
        let collection = fields(self.session, ds, schema.id());
        let key = (ds, schema.id(), parsed.name.clone());

        let (record, created): (FieldRecord, bool) = match collection.find(&parsed.name).await {
            Ok(record) => (record, false),
            Err(e) if e.is_not_found() && self.options.add_schemas_fields => {
                let mut payload = NewField::new(&parsed.name, &parsed.entity_type, &parsed.data_type);
                if let Some(f) = &parsed.data_format {
                    payload = payload.data_format(f);
                }
                if let Some(d) = parsed.description.as_deref().filter(|d| !d.trim().is_empty()) {
                    payload = payload.description(d);
                }
                if let Some(poc) = self.target.tech_poc_id {
                    payload = payload.tech_poc(poc);
                }
                collection.create_or_adopt(&payload).await?
            }
            Err(e) if e.is_not_found() => {
                self.summary.skipped += 1;
                self.field_ids.insert(key, None);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if created {
            self.summary.fields_created += 1;
        }
        self.field_ids.insert(key, Some(record.id));

        let mut field = Field::from_record(self.session.clone(), ds, schema.id(), record);
        if self.options.update_descriptions && !created {
            if let Some(d) = description_changed(
                field.record().description.as_deref(),
                parsed.description.as_deref(),
            ) {
                field.update(FieldUpdate::new().description(d)).await?;
                self.summary.descriptions_updated += 1;
            }
        }
        if self.options.update_tags {
            let added = field.add_tags(clean_tags(&parsed.tags)).await?;
            self.summary.tags_added += added.len();
        }
        Ok(())
    }

    async fn apply_lineage(&mut self, lineage: &[ParsedLink]) -> Result<()> {
        let mut specs = Vec::with_capacity(lineage.len());
        for link in lineage {
            let source = self.resolve_field(&link.source).await?;
            let target = self.resolve_field(&link.target).await?;
            match (source, target) {
                (Some(s), Some(t)) => specs.push(LinkSpec::new(s, t)),
                _ => {
                    debug!(
                        source = link.source.field.as_str(),
                        target = link.target.field.as_str(),
                        "Lineage endpoint not in catalog; skipped"
                    );
                    self.summary.skipped += 1;
                }
            }
        }
        if specs.is_empty() {
            return Ok(());
        }

        let name = self.target.transformation_name();
        let collection = transformations(self.session);
        let record: TransformationRecord = match collection.find(&name).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                let poc = self.target.tech_poc("the dbt transformation")?;
                let payload = NewTransformation::new(&name, "dbt", poc)
                    .description("Lineage imported from a dbt manifest");
                collection.create_or_adopt(&payload).await?.0
            }
            Err(e) => return Err(e),
        };
        let mut transformation = Transformation::from_record(self.session.clone(), record);

        let existing: BTreeSet<LinkSpec> = transformation
            .get_links()
            .await?
            .values()
            .map(|l| l.spec())
            .collect();
        let before = specs.len();
        specs.retain(|s| !existing.contains(s));
        self.summary.links_existing += before - specs.len();

        let batch = transformation.create_links(specs).await?;
        self.summary.links_created += batch.created.len();
        self.summary.links_failed += batch.failed.len();
        for failed in &batch.failed {
            warn!(
                source = failed.spec.source_field_id,
                target = failed.spec.target_field_id,
                message = failed.message.as_str(),
                "Lineage link rejected"
            );
        }
        Ok(())
    }

    async fn resolve_field(&mut self, path: &FieldPath) -> Result<Option<i64>> {
        let Some(ds) = self.resolve_store(path.data_store.as_deref()).await? else {
            return Ok(None);
        };
        let Some(schema_id) = self.resolve_schema(ds, &path.schema).await? else {
            return Ok(None);
        };
        let key = (ds, schema_id, path.field.clone());
        if let Some(cached) = self.field_ids.get(&key) {
            return Ok(*cached);
        }
        let found = match fields(self.session, ds, schema_id)
            .find::<FieldRecord>(&path.field)
            .await
        {
            Ok(record) => Some(record.id),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        self.field_ids.insert(key, found);
        Ok(found)
    }

    async fn resolve_schema(&mut self, ds: i64, name: &str) -> Result<Option<i64>> {
        let key = (ds, name.to_string());
        if let Some(cached) = self.schema_ids.get(&key) {
            return Ok(*cached);
        }
        let found = match schemas(self.session, ds).find::<SchemaRecord>(name).await {
            Ok(record) => Some(record.id),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        self.schema_ids.insert(key, found);
        Ok(found)
    }

    async fn resolve_store(&mut self, name: Option<&str>) -> Result<Option<i64>> {
        let Some(name) = name.filter(|n| *n != self.target.data_store_name) else {
            return Ok(Some(self.target.data_store_id));
        };
        if let Some(cached) = self.stores.get(name) {
            return Ok(*cached);
        }
        let found = match data_stores(self.session).find::<DataStoreRecord>(name).await {
            Ok(record) => Some(record.id),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        self.stores.insert(name.to_string(), found);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_results_defaults() {
        let results: ParseResults = serde_json::from_value(json!({
            "schemas": [{ "name": "analytics.orders", "fields": [{ "name": "order_id" }] }],
        }))
        .unwrap();
        let schema = &results.schemas[0];
        assert_eq!(schema.entity_type, "table");
        assert_eq!(schema.fields[0].entity_type, "scalar");
        assert_eq!(schema.fields[0].data_type, "unknown");
        assert!(results.lineage.is_empty());
    }

    #[test]
    fn test_save_options() {
        assert!(SaveOptions::default().is_empty());
        assert!(!SaveOptions::all().is_empty());
        let lineage_only = SaveOptions {
            add_lineage: true,
            ..Default::default()
        };
        assert!(!lineage_only.touches_entities());
    }

    #[test]
    fn test_description_changed() {
        assert_eq!(description_changed(Some("a"), Some("a")), None);
        assert_eq!(description_changed(Some("a"), Some(" b ")), Some("b".to_string()));
        assert_eq!(description_changed(None, Some("")), None);
        assert_eq!(description_changed(None, None), None);
    }

    #[test]
    fn test_clean_tags_drops_blanks() {
        let tags = vec![" pii ".to_string(), "".to_string(), "finance".to_string()];
        assert_eq!(clean_tags(&tags), vec!["pii", "finance"]);
    }
}
