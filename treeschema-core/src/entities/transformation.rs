//! Transformations: named data-processing jobs that own lineage links.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::link::{FailedLink, Link, LinkBatch, LinkInput, LinkLookup, LinkRecord, LinkSpec};
use super::{links, transformations};
use crate::client::TreeSchema;
use crate::error::{ApiError, Result, TreeSchemaError};
use crate::resolver::{CreatePayload, Ids, Lookup, Tags, UserRef, require};
use crate::transport::ApiRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRecord {
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

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransformation {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tech_poc_id")]
    pub tech_poc: UserRef,
}

impl NewTransformation {
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

impl CreatePayload for NewTransformation {
    fn natural_key(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("type", &self.entity_type)?;
        self.tech_poc.validate("tech_poc")
    }
}

impl From<NewTransformation> for Lookup<NewTransformation> {
    fn from(payload: NewTransformation) -> Self {
        Lookup::Create(payload)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tech_poc_id", skip_serializing_if = "Option::is_none")]
    pub tech_poc: Option<UserRef>,
}

impl TransformationUpdate {
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

#[derive(Deserialize)]
struct LinkBatchResponse {
    #[serde(default)]
    links: Vec<LinkRecord>,
    #[serde(default)]
    errors: Vec<FailedLink>,
}

/// Handle to a transformation.
///
/// Keeps the links it has seen (listed, fetched or created through this handle)
/// keyed by link ID; see [`Transformation::links`].
#[derive(Debug, Clone)]
pub struct Transformation {
    session: TreeSchema,
    record: TransformationRecord,
    links: BTreeMap<i64, Link>,
}

impl Transformation {
    pub(crate) fn from_record(session: TreeSchema, record: TransformationRecord) -> Self {
        Self {
            session,
            record,
            links: BTreeMap::new(),
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

    pub fn record(&self) -> &TransformationRecord {
        &self.record
    }

    /// Links known to this handle, keyed by link ID.
    pub fn links(&self) -> &BTreeMap<i64, Link> {
        &self.links
    }

    pub async fn refresh(&mut self) -> Result<&Self> {
        self.record = transformations(&self.session).get(self.record.id).await?;
        Ok(self)
    }

    pub async fn update(&mut self, update: TransformationUpdate) -> Result<&Self> {
        self.record = transformations(&self.session)
            .update(self.record.id, &update)
            .await?;
        Ok(self)
    }

    pub async fn add_tags(&mut self, tags: impl Into<Tags>) -> Result<Vec<String>> {
        transformations(&self.session)
            .add_tags(self.record.id, &mut self.record.tags, tags.into())
            .await
    }

    /// Fetch every live link and replace the known-link map with the result.
    pub async fn get_links(&mut self) -> Result<&BTreeMap<i64, Link>> {
        let records: Vec<LinkRecord> = links(&self.session, self.record.id).list().await?;
        self.links = records
            .into_iter()
            .map(|r| (r.id, self.link_handle(r)))
            .collect();
        Ok(&self.links)
    }

    /// Resolve one link by ID, or get-or-create the link between two fields.
    pub async fn link(&mut self, lookup: impl Into<LinkLookup>) -> Result<Link> {
        let link = match lookup.into() {
            LinkLookup::Id(id) => {
                let record: LinkRecord = links(&self.session, self.record.id).get(id).await?;
                self.link_handle(record)
            }
            LinkLookup::Between(spec) => self.link_between(spec).await?,
        };
        self.links.insert(link.id(), link.clone());
        Ok(link)
    }

    async fn link_between(&mut self, spec: LinkSpec) -> Result<Link> {
        if let Some(found) = self.find_link(spec).await? {
            return Ok(found);
        }
        let mut batch = self.create_links(spec).await?;
        if let Some((_, created)) = batch.created.pop_first() {
            return Ok(created);
        }
        // Another writer may have created the same edge in the meantime.
        if let Some(found) = self.find_link(spec).await? {
            return Ok(found);
        }
        let message = batch
            .failed
            .pop()
            .map(|f| f.message)
            .unwrap_or_else(|| "server created no link".to_string());
        Err(TreeSchemaError::validation(format!(
            "link {} -> {} was rejected: {}",
            spec.source_field_id, spec.target_field_id, message
        )))
    }

    async fn find_link(&mut self, spec: LinkSpec) -> Result<Option<Link>> {
        Ok(self
            .get_links()
            .await?
            .values()
            .find(|l| l.spec() == spec)
            .cloned())
    }

    /// Create a batch of lineage links in one request.
    ///
    /// Entries the server refuses are reported in [`LinkBatch::failed`]; the
    /// rest are created and added to [`Transformation::links`]. An empty input
    /// sends nothing.
    pub async fn create_links(&mut self, input: impl Into<LinkInput>) -> Result<LinkBatch> {
        let specs = input.into().normalize()?;
        if specs.is_empty() {
            return Ok(LinkBatch::default());
        }

        let collection = links(&self.session, self.record.id);
        let body = self
            .session
            .send_unreplayable(ApiRequest::post(
                collection.path().to_string(),
                json!({ "links": specs }),
            ))
            .await?;
        let response: LinkBatchResponse = parse_batch(body)?;

        let mut batch = LinkBatch {
            created: BTreeMap::new(),
            failed: response.errors,
        };
        for record in response.links {
            let link = self.link_handle(record);
            self.links.insert(link.id(), link.clone());
            batch.created.insert(link.id(), link);
        }

        if batch.failed.is_empty() {
            info!(transformation = self.record.id, created = batch.created.len(), "Created links");
        } else {
            warn!(
                transformation = self.record.id,
                created = batch.created.len(),
                failed = batch.failed.len(),
                "Some links were rejected"
            );
        }
        Ok(batch)
    }

    /// Deprecate links given as IDs, handles, or a mix of both.
    pub async fn delete_links(&mut self, ids: impl Into<Ids<Link>>) -> Result<()> {
        let ids = ids.into();
        links(&self.session, self.record.id)
            .deprecate(ids.as_slice())
            .await?;
        for id in ids.as_slice() {
            self.links.remove(id);
        }
        Ok(())
    }

    fn link_handle(&self, record: LinkRecord) -> Link {
        Link::from_record(self.session.clone(), self.record.id, record)
    }
}

fn parse_batch(body: Value) -> Result<LinkBatchResponse> {
    match body {
        // Some deployments answer with the bare list of created links.
        Value::Array(_) => Ok(LinkBatchResponse {
            links: serde_json::from_value(body)?,
            errors: Vec::new(),
        }),
        Value::Object(_) => Ok(serde_json::from_value(body)?),
        other => Err(ApiError::ResponseParse {
            message: format!("unexpected link batch response: {other}"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_shapes() {
        let full = parse_batch(json!({
            "links": [{ "id": 5, "source_field_id": 1, "target_field_id": 2 }],
            "errors": [{ "source_field_id": 1, "target_field_id": 9, "message": "missing" }],
        }))
        .unwrap();
        assert_eq!(full.links.len(), 1);
        assert_eq!(full.errors[0].spec, LinkSpec::new(1, 9));

        let bare = parse_batch(json!([{ "id": 5, "source_field_id": 1, "target_field_id": 2 }])).unwrap();
        assert_eq!(bare.links[0].id, 5);
        assert!(bare.errors.is_empty());

        assert!(parse_batch(json!("ok")).is_err());
    }

    #[test]
    fn test_new_transformation_validation() {
        assert!(NewTransformation::new("My API Transformation!", "pub_sub_event", 1)
            .validate()
            .is_ok());
        assert!(NewTransformation::new("x", "", 1).validate().is_err());
    }
}
