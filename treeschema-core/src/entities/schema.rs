//! Schemas: logical groupings of fields (tables, topics, files) inside a data store.

use serde::{Deserialize, Serialize};

use super::field::{Field, FieldRecord, NewField};
use super::{fields, schemas};
use crate::client::TreeSchema;
use crate::error::Result;
use crate::resolver::{CreatePayload, Ids, Lookup, Tags, UserRef, impl_handle_ids, require};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_poc_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steward_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tech_poc_id")]
    pub tech_poc: UserRef,
    #[serde(rename = "steward_id", skip_serializing_if = "Option::is_none")]
    pub steward: Option<UserRef>,
}

impl NewSchema {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        tech_poc: impl Into<UserRef>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: None,
            tech_poc: tech_poc.into(),
            steward: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn steward(mut self, steward: impl Into<UserRef>) -> Self {
        self.steward = Some(steward.into());
        self
    }
}

impl CreatePayload for NewSchema {
    fn natural_key(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("type", &self.entity_type)?;
        self.tech_poc.validate("tech_poc")?;
        if let Some(steward) = self.steward {
            steward.validate("steward")?;
        }
        Ok(())
    }
}

impl From<NewSchema> for Lookup<NewSchema> {
    fn from(payload: NewSchema) -> Self {
        Lookup::Create(payload)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tech_poc_id", skip_serializing_if = "Option::is_none")]
    pub tech_poc: Option<UserRef>,
    #[serde(rename = "steward_id", skip_serializing_if = "Option::is_none")]
    pub steward: Option<UserRef>,
}

impl SchemaUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tech_poc(mut self, tech_poc: impl Into<UserRef>) -> Self {
        self.tech_poc = Some(tech_poc.into());
        self
    }

    pub fn steward(mut self, steward: impl Into<UserRef>) -> Self {
        self.steward = Some(steward.into());
        self
    }
}

/// Handle to a schema within a data store.
#[derive(Debug, Clone)]
pub struct Schema {
    session: TreeSchema,
    data_store_id: i64,
    record: SchemaRecord,
}

impl_handle_ids!(Schema);

impl Schema {
    pub(crate) fn from_record(session: TreeSchema, data_store_id: i64, record: SchemaRecord) -> Self {
        Self {
            session,
            data_store_id,
            record,
        }
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn data_store_id(&self) -> i64 {
        self.data_store_id
    }

    pub fn tags(&self) -> &[String] {
        &self.record.tags
    }

    pub fn record(&self) -> &SchemaRecord {
        &self.record
    }

    pub async fn refresh(&mut self) -> Result<&Self> {
        self.record = schemas(&self.session, self.data_store_id)
            .get(self.record.id)
            .await?;
        Ok(self)
    }

    pub async fn update(&mut self, update: SchemaUpdate) -> Result<&Self> {
        self.record = schemas(&self.session, self.data_store_id)
            .update(self.record.id, &update)
            .await?;
        Ok(self)
    }

    pub async fn add_tags(&mut self, tags: impl Into<Tags>) -> Result<Vec<String>> {
        schemas(&self.session, self.data_store_id)
            .add_tags(self.record.id, &mut self.record.tags, tags.into())
            .await
    }

    pub async fn get_fields(&self) -> Result<Vec<Field>> {
        let records: Vec<FieldRecord> = fields(&self.session, self.data_store_id, self.record.id)
            .list()
            .await?;
        Ok(records
            .into_iter()
            .map(|r| self.field_handle(r))
            .collect())
    }

    /// Resolve a field by ID, by name, or get-or-create from a [`NewField`].
    pub async fn field(&self, lookup: impl Into<Lookup<NewField>>) -> Result<Field> {
        let record: FieldRecord = fields(&self.session, self.data_store_id, self.record.id)
            .resolve(lookup.into())
            .await?;
        Ok(self.field_handle(record))
    }

    /// Deprecate fields of this schema.
    pub async fn delete_fields(&self, ids: impl Into<Ids<Field>>) -> Result<()> {
        let ids = ids.into();
        fields(&self.session, self.data_store_id, self.record.id)
            .deprecate(ids.as_slice())
            .await
    }

    fn field_handle(&self, record: FieldRecord) -> Field {
        Field::from_record(
            self.session.clone(),
            self.data_store_id,
            self.record.id,
            record,
        )
    }
}
