//! Field values: documented sample or enumerated values for a field.
//!
//! The natural key is the value itself and is always transmitted as a string.

use serde::{Deserialize, Serialize};

use super::field_values;
use crate::client::TreeSchema;
use crate::error::Result;
use crate::resolver::{Collection, CreatePayload, Lookup, require};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValueRecord {
    pub id: i64,
    pub field_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFieldValue {
    pub field_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewFieldValue {
    pub fn new(field_value: impl Into<String>) -> Self {
        Self {
            field_value: field_value.into(),
            description: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl CreatePayload for NewFieldValue {
    fn natural_key(&self) -> &str {
        &self.field_value
    }

    fn validate(&self) -> Result<()> {
        require("field_value", &self.field_value)
    }
}

impl From<NewFieldValue> for Lookup<NewFieldValue> {
    fn from(payload: NewFieldValue) -> Self {
        Lookup::Create(payload)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldValueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldValueUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_value(mut self, field_value: impl Into<String>) -> Self {
        self.field_value = Some(field_value.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Handle to a single field value.
#[derive(Debug, Clone)]
pub struct FieldValue {
    session: TreeSchema,
    /// data store, schema, field
    scope: [i64; 3],
    record: FieldValueRecord,
}

impl FieldValue {
    pub(crate) fn from_record(session: TreeSchema, scope: [i64; 3], record: FieldValueRecord) -> Self {
        Self {
            session,
            scope,
            record,
        }
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn value(&self) -> &str {
        &self.record.field_value
    }

    pub fn field_id(&self) -> i64 {
        self.scope[2]
    }

    pub fn record(&self) -> &FieldValueRecord {
        &self.record
    }

    fn collection(&self) -> Collection<'_> {
        let [ds, schema, field] = self.scope;
        field_values(&self.session, ds, schema, field)
    }

    pub async fn refresh(&mut self) -> Result<&Self> {
        self.record = self.collection().get(self.record.id).await?;
        Ok(self)
    }

    pub async fn update(&mut self, update: FieldValueUpdate) -> Result<&Self> {
        if let Some(value) = &update.field_value {
            require("field_value", value)?;
        }
        self.record = self.collection().update(self.record.id, &update).await?;
        Ok(self)
    }
}
