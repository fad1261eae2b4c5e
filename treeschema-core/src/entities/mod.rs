//! Entity handles for catalog records.
//!
//! Each handle pairs a serde record (the server's view of the entity at last
//! fetch or write) with the owning [`TreeSchema`] session and the IDs of its
//! parent scope. Ownership is hierarchical: data stores own schemas, schemas
//! own fields, fields own field values, transformations own links.

pub mod data_store;
pub mod field;
pub mod field_value;
pub mod link;
pub mod schema;
pub mod transformation;
pub mod user;

use crate::client::TreeSchema;
use crate::resolver::Collection;

pub use data_store::{DataStore, DataStoreRecord, DataStoreUpdate, NewDataStore};
pub use field::{Field, FieldRecord, FieldUpdate, NewField};
pub use field_value::{FieldValue, FieldValueRecord, FieldValueUpdate, NewFieldValue};
pub use link::{FailedLink, Link, LinkBatch, LinkInput, LinkLookup, LinkRecord, LinkSpec};
pub use schema::{NewSchema, Schema, SchemaRecord, SchemaUpdate};
pub use transformation::{
    NewTransformation, Transformation, TransformationRecord, TransformationUpdate,
};
pub use user::{NewUser, User, UserRecord};

pub(crate) fn users(session: &TreeSchema) -> Collection<'_> {
    Collection::new(session, "users".to_string(), "user", "email")
}

pub(crate) fn data_stores(session: &TreeSchema) -> Collection<'_> {
    Collection::new(session, "data-stores".to_string(), "data store", "name")
}

pub(crate) fn schemas(session: &TreeSchema, data_store_id: i64) -> Collection<'_> {
    Collection::new(
        session,
        format!("data-stores/{data_store_id}/schemas"),
        "schema",
        "name",
    )
}

pub(crate) fn fields(session: &TreeSchema, data_store_id: i64, schema_id: i64) -> Collection<'_> {
    Collection::new(
        session,
        format!("data-stores/{data_store_id}/schemas/{schema_id}/fields"),
        "field",
        "name",
    )
}

pub(crate) fn field_values(
    session: &TreeSchema,
    data_store_id: i64,
    schema_id: i64,
    field_id: i64,
) -> Collection<'_> {
    Collection::new(
        session,
        format!("data-stores/{data_store_id}/schemas/{schema_id}/fields/{field_id}/values"),
        "field value",
        "field_value",
    )
}

pub(crate) fn transformations(session: &TreeSchema) -> Collection<'_> {
    Collection::new(
        session,
        "transformations".to_string(),
        "transformation",
        "name",
    )
}

pub(crate) fn links(session: &TreeSchema, transformation_id: i64) -> Collection<'_> {
    Collection::new(
        session,
        format!("transformations/{transformation_id}/links"),
        "link",
        "id",
    )
}
