//! Get-or-create resolution shared by every entity kind.
//!
//! Every accessor (`TreeSchema::data_store`, `DataStore::schema`, `Schema::field`, ...)
//! takes a [`Lookup`]: a numeric ID, a natural key, or a creation payload. IDs and
//! keys are pure reads that fail with `NotFound`; a payload is looked up by its
//! natural key first and only created when no live record carries that key.
//! Existing records are never modified by a get-or-create call.
//!
//! A create that loses a race against another client (HTTP 409) is retried as a
//! lookup, so callers see the winner's record instead of a `Conflict`.

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

use crate::client::TreeSchema;
use crate::error::{Result, TreeSchemaError};
use crate::transport::ApiRequest;

/// How to resolve an entity: by ID, by natural key, or get-or-create from a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<P> {
    /// Fetch by numeric identifier.
    Id(i64),
    /// Fetch by natural key (name, e-mail or value) within the caller's scope.
    Key(String),
    /// Return the record with the payload's natural key, creating it if absent.
    Create(P),
}

impl<P> From<i64> for Lookup<P> {
    fn from(id: i64) -> Self {
        Lookup::Id(id)
    }
}

impl<P> From<&str> for Lookup<P> {
    fn from(key: &str) -> Self {
        Lookup::Key(key.to_string())
    }
}

impl<P> From<String> for Lookup<P> {
    fn from(key: String) -> Self {
        Lookup::Key(key)
    }
}

impl<P> From<&String> for Lookup<P> {
    fn from(key: &String) -> Self {
        Lookup::Key(key.clone())
    }
}

/// A creation payload for a catalog entity.
pub trait CreatePayload: Serialize + Send + Sync {
    /// The natural key used for uniqueness within the owning scope.
    fn natural_key(&self) -> &str;

    /// Check required fields locally, before any remote call.
    fn validate(&self) -> Result<()>;
}

/// Require a non-blank string attribute.
pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TreeSchemaError::validation(format!("{field} is required")));
    }
    Ok(())
}

/// A user reference: either a raw user ID or an already-resolved [`User`](crate::User).
///
/// Serialises as the bare numeric ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserRef(pub i64);

impl UserRef {
    pub fn id(self) -> i64 {
        self.0
    }

    pub(crate) fn validate(self, field: &str) -> Result<()> {
        if self.0 <= 0 {
            return Err(TreeSchemaError::validation(format!(
                "{field} must reference a user ID, got {}",
                self.0
            )));
        }
        Ok(())
    }
}

impl From<i64> for UserRef {
    fn from(id: i64) -> Self {
        UserRef(id)
    }
}

impl Serialize for UserRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

/// A single typed identifier: built from a raw ID or from a handle of kind `T`.
#[derive(Debug)]
pub struct Id<T> {
    value: i64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub fn value(&self) -> i64 {
        self.value
    }

    pub(crate) fn new(value: i64) -> Self {
        Self {
            value,
            _kind: PhantomData,
        }
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> From<i64> for Id<T> {
    fn from(value: i64) -> Self {
        Id::new(value)
    }
}

/// A batch of identifiers of entity kind `T`.
///
/// Accepts a single ID, a single handle, a list of IDs, a list of handles, or a
/// mixed list of [`Id<T>`]. Duplicates collapse to their first occurrence.
#[derive(Debug)]
pub struct Ids<T> {
    values: Vec<i64>,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Ids<T> {
    pub(crate) fn from_values(values: impl IntoIterator<Item = i64>) -> Self {
        let mut unique = Vec::new();
        for v in values {
            if !unique.contains(&v) {
                unique.push(v);
            }
        }
        Self {
            values: unique,
            _kind: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<i64> {
        self.values
    }
}

impl<T> From<i64> for Ids<T> {
    fn from(id: i64) -> Self {
        Ids::from_values([id])
    }
}

impl<T> From<Vec<i64>> for Ids<T> {
    fn from(ids: Vec<i64>) -> Self {
        Ids::from_values(ids)
    }
}

impl<T> From<&[i64]> for Ids<T> {
    fn from(ids: &[i64]) -> Self {
        Ids::from_values(ids.iter().copied())
    }
}

impl<T, const N: usize> From<[i64; N]> for Ids<T> {
    fn from(ids: [i64; N]) -> Self {
        Ids::from_values(ids)
    }
}

impl<T> From<Id<T>> for Ids<T> {
    fn from(id: Id<T>) -> Self {
        Ids::from_values([id.value])
    }
}

impl<T> From<Vec<Id<T>>> for Ids<T> {
    fn from(ids: Vec<Id<T>>) -> Self {
        Ids::from_values(ids.into_iter().map(|id| id.value))
    }
}

impl<T> FromIterator<Id<T>> for Ids<T> {
    fn from_iter<I: IntoIterator<Item = Id<T>>>(iter: I) -> Self {
        Ids::from_values(iter.into_iter().map(|id| id.value))
    }
}

/// Implement the handle-based `Id`/`Ids` conversions for an entity handle type.
macro_rules! impl_handle_ids {
    ($handle:ty) => {
        impl From<&$handle> for $crate::resolver::Id<$handle> {
            fn from(handle: &$handle) -> Self {
                $crate::resolver::Id::new(handle.id())
            }
        }

        impl From<&$handle> for $crate::resolver::Ids<$handle> {
            fn from(handle: &$handle) -> Self {
                $crate::resolver::Ids::from_values([handle.id()])
            }
        }

        impl From<Vec<$handle>> for $crate::resolver::Ids<$handle> {
            fn from(handles: Vec<$handle>) -> Self {
                $crate::resolver::Ids::from_values(handles.iter().map(|h| h.id()))
            }
        }

        impl From<&[$handle]> for $crate::resolver::Ids<$handle> {
            fn from(handles: &[$handle]) -> Self {
                $crate::resolver::Ids::from_values(handles.iter().map(|h| h.id()))
            }
        }

        impl From<&Vec<$handle>> for $crate::resolver::Ids<$handle> {
            fn from(handles: &Vec<$handle>) -> Self {
                $crate::resolver::Ids::from_values(handles.iter().map(|h| h.id()))
            }
        }

        impl From<Vec<&$handle>> for $crate::resolver::Ids<$handle> {
            fn from(handles: Vec<&$handle>) -> Self {
                $crate::resolver::Ids::from_values(handles.iter().map(|h| h.id()))
            }
        }
    };
}

pub(crate) use impl_handle_ids;

/// One tag or a list of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(Vec<String>);

impl Tags {
    /// Trim each tag and drop duplicates, keeping first occurrences.
    ///
    /// Fails with `Validation` if any tag is blank.
    pub fn normalize(self) -> Result<Vec<String>> {
        let mut out: Vec<String> = Vec::with_capacity(self.0.len());
        for tag in self.0 {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(TreeSchemaError::validation("tags must not be blank"));
            }
            if !out.iter().any(|t| t == tag) {
                out.push(tag.to_string());
            }
        }
        Ok(out)
    }
}

impl From<&str> for Tags {
    fn from(tag: &str) -> Self {
        Tags(vec![tag.to_string()])
    }
}

impl From<String> for Tags {
    fn from(tag: String) -> Self {
        Tags(vec![tag])
    }
}

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        Tags(tags)
    }
}

impl From<Vec<&str>> for Tags {
    fn from(tags: Vec<&str>) -> Self {
        Tags(tags.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Tags {
    fn from(tags: &[&str]) -> Self {
        Tags(tags.iter().map(|t| t.to_string()).collect())
    }
}

impl From<&[String]> for Tags {
    fn from(tags: &[String]) -> Self {
        Tags(tags.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Tags {
    fn from(tags: [&str; N]) -> Self {
        Tags(tags.iter().map(|t| t.to_string()).collect())
    }
}

/// A REST collection of one entity kind under a fixed parent scope.
pub(crate) struct Collection<'a> {
    session: &'a TreeSchema,
    path: String,
    kind: &'static str,
    key_param: &'static str,
}

impl<'a> Collection<'a> {
    pub(crate) fn new(
        session: &'a TreeSchema,
        path: String,
        kind: &'static str,
        key_param: &'static str,
    ) -> Self {
        Self {
            session,
            path,
            kind,
            key_param,
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    fn item_path(&self, id: i64) -> String {
        format!("{}/{}", self.path, id)
    }

    /// Re-label a transport-level `NotFound` with this collection's kind.
    fn not_found(&self, key: impl ToString) -> impl FnOnce(TreeSchemaError) -> TreeSchemaError {
        let kind = self.kind;
        let key = key.to_string();
        move |err| {
            if err.is_not_found() {
                TreeSchemaError::not_found(kind, key)
            } else {
                err
            }
        }
    }

    /// Fetch every live record, following pagination.
    pub(crate) async fn list<R: DeserializeOwned>(&self) -> Result<Vec<R>> {
        let page_size = self.session.config().page_size;
        let mut page = 1u64;
        let mut out = Vec::new();
        loop {
            let mut req = ApiRequest::get(self.path.clone()).query("page", page);
            if page_size > 0 {
                req = req.query("page_size", page_size);
            }
            let body = self.session.send(req).await?;
            let (rows, next) = split_page(body)?;
            for row in rows {
                out.push(serde_json::from_value(row)?);
            }
            match next {
                Some(n) if n > page => page = n,
                _ => break,
            }
        }
        debug!(kind = self.kind, path = self.path.as_str(), count = out.len(), "Listed collection");
        Ok(out)
    }

    pub(crate) async fn get<R: DeserializeOwned>(&self, id: i64) -> Result<R> {
        let body = self
            .session
            .send(ApiRequest::get(self.item_path(id)))
            .await
            .map_err(self.not_found(id))?;
        Ok(serde_json::from_value(unwrap_data(body))?)
    }

    /// Fetch the live record whose natural key equals `key` exactly.
    pub(crate) async fn find<R: DeserializeOwned>(&self, key: &str) -> Result<R> {
        let body = self
            .session
            .send(ApiRequest::get(self.path.clone()).query(self.key_param, key))
            .await
            .map_err(self.not_found(key))?;
        let (rows, _) = split_page(body)?;
        let matched = rows
            .into_iter()
            .find(|row| row[self.key_param].as_str() == Some(key))
            .ok_or_else(|| TreeSchemaError::not_found(self.kind, key))?;
        Ok(serde_json::from_value(matched)?)
    }

    pub(crate) async fn create<R: DeserializeOwned, P: CreatePayload>(&self, payload: &P) -> Result<R> {
        let body = serde_json::to_value(payload)?;
        let created = self
            .session
            .send(ApiRequest::post(self.path.clone(), body))
            .await
            .map_err(|err| match err {
                TreeSchemaError::Conflict { .. } => TreeSchemaError::Conflict {
                    kind: self.kind.to_string(),
                    key: payload.natural_key().to_string(),
                },
                other => other,
            })?;
        info!(kind = self.kind, key = payload.natural_key(), "Created catalog entity");
        Ok(serde_json::from_value(unwrap_data(created))?)
    }

    /// Return the record matching the payload's natural key, creating it if absent.
    ///
    /// The boolean is `true` when this call created the record.
    pub(crate) async fn get_or_create<R: DeserializeOwned, P: CreatePayload>(
        &self,
        payload: &P,
    ) -> Result<(R, bool)> {
        payload.validate()?;
        let key = payload.natural_key();
        match self.find(key).await {
            Ok(existing) => {
                debug!(kind = self.kind, key, "Found existing entity; payload not applied");
                return Ok((existing, false));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        self.create_or_adopt(payload).await
    }

    /// Create the entity after a lookup missed. If another writer created it in
    /// the meantime, the winner's record is returned with `false`.
    pub(crate) async fn create_or_adopt<R: DeserializeOwned, P: CreatePayload>(
        &self,
        payload: &P,
    ) -> Result<(R, bool)> {
        payload.validate()?;
        let key = payload.natural_key();
        match self.create(payload).await {
            Ok(created) => Ok((created, true)),
            Err(conflict) if conflict.is_conflict() => {
                warn!(kind = self.kind, key, "Create raced with another writer; retrying as lookup");
                match self.find(key).await {
                    Ok(existing) => Ok((existing, false)),
                    Err(err) if err.is_not_found() => Err(conflict),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) async fn resolve<R: DeserializeOwned, P: CreatePayload>(
        &self,
        lookup: Lookup<P>,
    ) -> Result<R> {
        match lookup {
            Lookup::Id(id) => self.get(id).await,
            Lookup::Key(key) => self.find(&key).await,
            Lookup::Create(payload) => self.get_or_create(&payload).await.map(|(r, _)| r),
        }
    }

    /// Send a named-field update and return the server's copy of the record.
    pub(crate) async fn update<R: DeserializeOwned, U: Serialize>(&self, id: i64, update: &U) -> Result<R> {
        let body = serde_json::to_value(update)?;
        if body.as_object().is_none_or(|fields| fields.is_empty()) {
            return Err(TreeSchemaError::validation(format!(
                "{} update must set at least one field",
                self.kind
            )));
        }
        let updated = self
            .session
            .send(ApiRequest::put(self.item_path(id), body))
            .await
            .map_err(self.not_found(id))?;
        info!(kind = self.kind, id, "Updated catalog entity");
        Ok(serde_json::from_value(unwrap_data(updated))?)
    }

    /// Attach tags to a record whose current tags are `current`.
    ///
    /// Tags already present are skipped; when nothing is new no request is sent.
    /// Returns the tags that were actually added.
    pub(crate) async fn add_tags(
        &self,
        id: i64,
        current: &mut Vec<String>,
        tags: Tags,
    ) -> Result<Vec<String>> {
        let fresh: Vec<String> = tags
            .normalize()?
            .into_iter()
            .filter(|t| !current.contains(t))
            .collect();
        if fresh.is_empty() {
            return Ok(fresh);
        }

        let result = self
            .session
            .send(ApiRequest::post(
                format!("{}/tags", self.item_path(id)),
                json!({ "tags": fresh }),
            ))
            .await;
        match result {
            Ok(body) => {
                if let Some(server_tags) = body["tags"].as_array() {
                    *current = server_tags
                        .iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect();
                }
            }
            // The server already had them; treat as applied.
            Err(err) if err.is_conflict() => {
                debug!(kind = self.kind, id, "Tags already present on server");
            }
            Err(err) => return Err(self.not_found(id)(err)),
        }
        for tag in &fresh {
            if !current.contains(tag) {
                current.push(tag.clone());
            }
        }
        debug!(kind = self.kind, id, added = fresh.len(), "Tagged catalog entity");
        Ok(fresh)
    }

    /// Deprecate every record in the batch with a single request.
    pub(crate) async fn deprecate(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.session
            .send(ApiRequest::delete(self.path.clone(), json!({ "ids": ids })))
            .await?;
        info!(kind = self.kind, count = ids.len(), "Deprecated catalog entities");
        Ok(())
    }
}

/// Unwrap an optional `{"data": {...}}` envelope around a single record.
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.len() == 1 && map.get("data").is_some_and(Value::is_object) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Split a list response into its rows and the next page number.
///
/// Accepts both `{"data": [...], "next_page": n}` and a bare array.
fn split_page(body: Value) -> Result<(Vec<Value>, Option<u64>)> {
    match body {
        Value::Array(rows) => Ok((rows, None)),
        Value::Object(mut map) => {
            let next = map.get("next_page").and_then(Value::as_u64);
            match map.remove("data") {
                Some(Value::Array(rows)) => Ok((rows, next)),
                Some(Value::Null) | None => Ok((Vec::new(), next)),
                Some(other) => Err(crate::error::ApiError::ResponseParse {
                    message: format!("expected 'data' to be an array, got {}", other),
                }
                .into()),
            }
        }
        Value::Null => Ok((Vec::new(), None)),
        other => Err(crate::error::ApiError::ResponseParse {
            message: format!("unexpected list response: {}", other),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Marker;

    #[test]
    fn test_lookup_from_shapes() {
        assert_eq!(Lookup::<()>::from(7), Lookup::Id(7));
        assert_eq!(Lookup::<()>::from("orders"), Lookup::Key("orders".into()));
        assert_eq!(
            Lookup::<()>::from(String::from("orders")),
            Lookup::Key("orders".into())
        );
    }

    #[test]
    fn test_ids_dedupe_preserves_order() {
        let ids: Ids<Marker> = vec![3, 1, 3, 2, 1].into();
        assert_eq!(ids.as_slice(), &[3, 1, 2]);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_ids_from_single_and_array() {
        let single: Ids<Marker> = 60.into();
        assert_eq!(single.into_vec(), vec![60]);
        let arr: Ids<Marker> = [513, 510].into();
        assert_eq!(arr.into_vec(), vec![513, 510]);
    }

    #[test]
    fn test_ids_from_mixed_ids() {
        let ids: Ids<Marker> = vec![Id::from(4), Id::from(9), Id::from(4)].into();
        assert_eq!(ids.into_vec(), vec![4, 9]);
        let collected: Ids<Marker> = [1, 2].into_iter().map(Id::from).collect();
        assert_eq!(collected.into_vec(), vec![1, 2]);
    }

    #[test]
    fn test_tags_normalize() {
        let tags: Tags = vec![" marketing ", "conversion", "marketing"].into();
        assert_eq!(tags.normalize().unwrap(), vec!["marketing", "conversion"]);
        let single: Tags = "single_tag".into();
        assert_eq!(single.normalize().unwrap(), vec!["single_tag"]);
    }

    #[test]
    fn test_tags_reject_blank() {
        let tags: Tags = vec!["ok", "  "].into();
        assert!(matches!(
            tags.normalize().unwrap_err(),
            TreeSchemaError::Validation { .. }
        ));
    }

    #[test]
    fn test_user_ref_serializes_as_id() {
        assert_eq!(serde_json::to_value(UserRef(12)).unwrap(), json!(12));
        assert!(UserRef(0).validate("tech_poc").is_err());
        assert!(UserRef(3).validate("tech_poc").is_ok());
    }

    #[test]
    fn test_split_page_shapes() {
        let (rows, next) = split_page(json!({ "data": [{ "id": 1 }], "next_page": 2 })).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(next, Some(2));

        let (rows, next) = split_page(json!([{ "id": 1 }, { "id": 2 }])).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(next, None);

        assert!(split_page(json!({ "data": "nope" })).is_err());
    }

    #[test]
    fn test_unwrap_data_envelope() {
        assert_eq!(
            unwrap_data(json!({ "data": { "id": 3 } })),
            json!({ "id": 3 })
        );
        assert_eq!(
            unwrap_data(json!({ "id": 3, "data": {} })),
            json!({ "id": 3, "data": {} })
        );
    }
}
