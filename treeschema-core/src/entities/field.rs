//! Fields: single attributes or columns within a schema.

use serde::{Deserialize, Serialize};

use super::field_value::{FieldValue, FieldValueRecord, NewFieldValue};
use super::{field_values, fields};
use crate::client::TreeSchema;
use crate::error::Result;
use crate::resolver::{CreatePayload, Lookup, Tags, UserRef, impl_handle_ids, require};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_poc_id: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewField {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tech_poc_id", skip_serializing_if = "Option::is_none")]
    pub tech_poc: Option<UserRef>,
}

impl NewField {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            data_type: data_type.into(),
            data_format: None,
            description: None,
            tech_poc: None,
        }
    }

    pub fn data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = Some(data_format.into());
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

impl CreatePayload for NewField {
    fn natural_key(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("type", &self.entity_type)?;
        require("data_type", &self.data_type)?;
        if let Some(poc) = self.tech_poc {
            poc.validate("tech_poc")?;
        }
        Ok(())
    }
}

impl From<NewField> for Lookup<NewField> {
    fn from(payload: NewField) -> Self {
        Lookup::Create(payload)
    }
}

/// Named-field update for a field. `entity_type` is sent as `type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tech_poc_id", skip_serializing_if = "Option::is_none")]
    pub tech_poc: Option<UserRef>,
}

impl FieldUpdate {
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

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = Some(data_format.into());
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

/// Handle to a field within a schema.
#[derive(Debug, Clone)]
pub struct Field {
    session: TreeSchema,
    data_store_id: i64,
    schema_id: i64,
    record: FieldRecord,
}

impl_handle_ids!(Field);

impl Field {
    pub(crate) fn from_record(
        session: TreeSchema,
        data_store_id: i64,
        schema_id: i64,
        record: FieldRecord,
    ) -> Self {
        Self {
            session,
            data_store_id,
            schema_id,
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

    pub fn schema_id(&self) -> i64 {
        self.schema_id
    }

    pub fn tags(&self) -> &[String] {
        &self.record.tags
    }

    pub fn record(&self) -> &FieldRecord {
        &self.record
    }

    pub async fn refresh(&mut self) -> Result<&Self> {
        self.record = fields(&self.session, self.data_store_id, self.schema_id)
            .get(self.record.id)
            .await?;
        Ok(self)
    }

    pub async fn update(&mut self, update: FieldUpdate) -> Result<&Self> {
        self.record = fields(&self.session, self.data_store_id, self.schema_id)
            .update(self.record.id, &update)
            .await?;
        Ok(self)
    }

    pub async fn add_tags(&mut self, tags: impl Into<Tags>) -> Result<Vec<String>> {
        fields(&self.session, self.data_store_id, self.schema_id)
            .add_tags(self.record.id, &mut self.record.tags, tags.into())
            .await
    }

    /// List the documented sample values of this field.
    pub async fn get_field_values(&self) -> Result<Vec<FieldValue>> {
        let records: Vec<FieldValueRecord> = self.values().list().await?;
        Ok(records.into_iter().map(|r| self.value_handle(r)).collect())
    }

    /// Resolve a field value by ID, by its string value, or get-or-create from a
    /// [`NewFieldValue`].
    pub async fn field_value(&self, lookup: impl Into<Lookup<NewFieldValue>>) -> Result<FieldValue> {
        let record: FieldValueRecord = self.values().resolve(lookup.into()).await?;
        Ok(self.value_handle(record))
    }

    fn values(&self) -> crate::resolver::Collection<'_> {
        field_values(
            &self.session,
            self.data_store_id,
            self.schema_id,
            self.record.id,
        )
    }

    fn value_handle(&self, record: FieldValueRecord) -> FieldValue {
        FieldValue::from_record(
            self.session.clone(),
            [self.data_store_id, self.schema_id, self.record.id],
            record,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_update_renames_type() {
        let update = FieldUpdate::new()
            .description("Newest description")
            .entity_type("list");
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "type": "list", "description": "Newest description" })
        );
    }

    #[test]
    fn test_new_field_requires_data_type() {
        assert!(NewField::new("user_id", "scalar", "number").validate().is_ok());
        assert!(NewField::new("user_id", "scalar", "").validate().is_err());
    }

    #[test]
    fn test_new_field_wire_format() {
        let payload = NewField::new("my_new_field4", "scalar", "number")
            .data_format("bigint")
            .tech_poc(3);
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "name": "my_new_field4",
                "type": "scalar",
                "data_type": "number",
                "data_format": "bigint",
                "tech_poc_id": 3,
            })
        );
    }
}
