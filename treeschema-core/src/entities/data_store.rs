//! Data stores: registered source systems, the root of the schema hierarchy.

use serde::{Deserialize, Serialize};

use super::schema::{NewSchema, Schema, SchemaRecord};
use super::{data_stores, schemas};
use crate::client::TreeSchema;
use crate::dbt::DbtManifest;
use crate::error::Result;
use crate::resolver::{CreatePayload, Ids, Lookup, Tags, UserRef, require};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStoreRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_poc_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

/// Payload for registering a data store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDataStore {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tech_poc_id")]
    pub tech_poc: UserRef,
}

impl NewDataStore {
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
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl CreatePayload for NewDataStore {
    fn natural_key(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("type", &self.entity_type)?;
        self.tech_poc.validate("tech_poc")
    }
}

impl From<NewDataStore> for Lookup<NewDataStore> {
    fn from(payload: NewDataStore) -> Self {
        Lookup::Create(payload)
    }
}

/// Named-field update for a data store. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataStoreUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tech_poc_id", skip_serializing_if = "Option::is_none")]
    pub tech_poc: Option<UserRef>,
}

impl DataStoreUpdate {
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
}

/// Handle to a data store.
///
/// Also owns the dbt manifest workflow for this store (see [`DataStore::dbt_mut`]).
#[derive(Debug, Clone)]
pub struct DataStore {
    session: TreeSchema,
    record: DataStoreRecord,
    dbt: DbtManifest,
}

impl DataStore {
    pub(crate) fn from_record(session: TreeSchema, record: DataStoreRecord) -> Self {
        let dbt = DbtManifest::new(session.clone(), &record);
        Self {
            session,
            record,
            dbt,
        }
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn tags(&self) -> &[String] {
        &self.record.tags
    }

    pub fn record(&self) -> &DataStoreRecord {
        &self.record
    }

    pub fn session(&self) -> &TreeSchema {
        &self.session
    }

    fn set_record(&mut self, record: DataStoreRecord) {
        self.dbt.sync(&record);
        self.record = record;
    }

    pub async fn refresh(&mut self) -> Result<&Self> {
        let record = data_stores(&self.session).get(self.record.id).await?;
        self.set_record(record);
        Ok(self)
    }

    /// Apply a named-field update; the handle reflects the server's response.
    pub async fn update(&mut self, update: DataStoreUpdate) -> Result<&Self> {
        let record = data_stores(&self.session)
            .update(self.record.id, &update)
            .await?;
        self.set_record(record);
        Ok(self)
    }

    /// Attach one or more tags and return the ones that were not already present.
    pub async fn add_tags(&mut self, tags: impl Into<Tags>) -> Result<Vec<String>> {
        data_stores(&self.session)
            .add_tags(self.record.id, &mut self.record.tags, tags.into())
            .await
    }

    /// List every live schema in this data store.
    ///
    /// Stores can hold thousands of schemas; prefer [`DataStore::schema`] when
    /// the schema is known.
    pub async fn get_schemas(&self) -> Result<Vec<Schema>> {
        let records: Vec<SchemaRecord> = schemas(&self.session, self.record.id).list().await?;
        Ok(records
            .into_iter()
            .map(|r| Schema::from_record(self.session.clone(), self.record.id, r))
            .collect())
    }

    /// Resolve a schema by ID, by name, or get-or-create from a [`NewSchema`].
    pub async fn schema(&self, lookup: impl Into<Lookup<NewSchema>>) -> Result<Schema> {
        let record: SchemaRecord = schemas(&self.session, self.record.id)
            .resolve(lookup.into())
            .await?;
        Ok(Schema::from_record(self.session.clone(), self.record.id, record))
    }

    /// Deprecate schemas given as IDs, handles, or a mix of both.
    pub async fn delete_schemas(&self, ids: impl Into<Ids<Schema>>) -> Result<()> {
        let ids = ids.into();
        schemas(&self.session, self.record.id)
            .deprecate(ids.as_slice())
            .await
    }

    /// The dbt manifest workflow for this data store.
    pub fn dbt(&self) -> &DbtManifest {
        &self.dbt
    }

    pub fn dbt_mut(&mut self) -> &mut DbtManifest {
        &mut self.dbt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_data_store_wire_format() {
        let payload = NewDataStore::new("Data Store #$5", "postgres", 2)
            .description("This data store was created with Rust");
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "name": "Data Store #$5",
                "type": "postgres",
                "description": "This data store was created with Rust",
                "tech_poc_id": 2,
            })
        );
    }

    #[test]
    fn test_new_data_store_validation() {
        assert!(NewDataStore::new("Kafka", "kafka", 1).validate().is_ok());
        assert!(NewDataStore::new(" ", "kafka", 1).validate().is_err());
        assert!(NewDataStore::new("Kafka", "", 1).validate().is_err());
        assert!(NewDataStore::new("Kafka", "kafka", 0).validate().is_err());
    }

    #[test]
    fn test_update_maps_entity_type_to_type() {
        let update = DataStoreUpdate::new().entity_type("mysql");
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "type": "mysql" })
        );
    }

    #[test]
    fn test_record_defaults() {
        let record: DataStoreRecord =
            serde_json::from_value(json!({ "id": 4, "name": "Kafka" })).unwrap();
        assert_eq!(record.entity_type, "");
        assert!(record.tags.is_empty());
        assert!(!record.deprecated);
    }
}
