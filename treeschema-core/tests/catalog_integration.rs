//! Integration tests for catalog resolution, updates, tags, deprecation and links.
//!
//! Every test runs against `MockTransport`, which records each request so the
//! tests can assert exactly which reads and writes an operation issued.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use treeschema_core::transport::Method;
use treeschema_core::{
    ClientConfig, DataStoreUpdate, FieldUpdate, FieldValueUpdate, Id, LinkInput, LinkSpec,
    MockTransport, NewDataStore, NewField, NewFieldValue, NewSchema, NewTransformation, NewUser,
    RetryConfig, TreeSchema, TreeSchemaError,
};

fn session(mock: &Arc<MockTransport>) -> TreeSchema {
    let config = ClientConfig {
        email: "me@example.com".into(),
        retry: RetryConfig {
            max_retries: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    TreeSchema::with_transport(mock.clone(), config)
}

/// Seeds a user, a data store with one schema, and two fields in that schema.
struct Catalog {
    mock: Arc<MockTransport>,
    ts: TreeSchema,
    user_id: i64,
    ds_id: i64,
    schema_id: i64,
    field_ids: [i64; 2],
}

impl Catalog {
    fn new() -> Self {
        let mock = Arc::new(MockTransport::new());
        let user_id = mock.seed_user("owner@example.com");
        let ds_id = mock.seed(
            "data-stores",
            json!({
                "name": "Kafka",
                "type": "kafka",
                "description": "Event bus",
                "tech_poc_id": user_id,
            }),
        );
        let schema_id = mock.seed(
            &format!("data-stores/{ds_id}/schemas"),
            json!({ "name": "dvc.info.raw:v1", "type": "topic", "tech_poc_id": user_id }),
        );
        let fields_path = format!("data-stores/{ds_id}/schemas/{schema_id}/fields");
        let f1 = mock.seed(
            &fields_path,
            json!({ "name": "user_id", "type": "scalar", "data_type": "number" }),
        );
        let f2 = mock.seed(
            &fields_path,
            json!({ "name": "event_ts", "type": "scalar", "data_type": "date" }),
        );
        let ts = session(&mock);
        Self {
            mock,
            ts,
            user_id,
            ds_id,
            schema_id,
            field_ids: [f1, f2],
        }
    }

    fn schemas_path(&self) -> String {
        format!("data-stores/{}/schemas", self.ds_id)
    }

    fn fields_path(&self) -> String {
        format!("data-stores/{}/schemas/{}/fields", self.ds_id, self.schema_id)
    }
}

// --- Resolution ---

#[tokio::test]
async fn test_resolving_existing_key_twice_returns_same_id() {
    let c = Catalog::new();
    let a = c.ts.data_store("Kafka").await.unwrap();
    let b = c.ts.data_store("Kafka").await.unwrap();
    assert_eq!(a.id(), b.id());
    assert_eq!(a.id(), c.ds_id);

    let s1 = a.schema("dvc.info.raw:v1").await.unwrap();
    let s2 = b.schema("dvc.info.raw:v1").await.unwrap();
    assert_eq!(s1.id(), s2.id());

    let f1 = s1.field("user_id").await.unwrap();
    let f2 = s2.field("user_id").await.unwrap();
    assert_eq!(f1.id(), f2.id());

    let u1 = c.ts.user("owner@example.com").await.unwrap();
    let u2 = c.ts.user(c.user_id).await.unwrap();
    assert_eq!(u1.id(), u2.id());
    assert_eq!(c.mock.write_count(), 0);
}

#[tokio::test]
async fn test_get_or_create_existing_never_writes() {
    let c = Catalog::new();
    let payload = NewDataStore::new("Kafka", "postgres", c.user_id).description("overwritten?");
    let ds = c.ts.data_store(payload).await.unwrap();

    assert_eq!(ds.id(), c.ds_id);
    assert_eq!(c.mock.write_count(), 0);
    let stored = c.mock.record("data-stores", c.ds_id).unwrap();
    assert_eq!(stored["type"], "kafka");
    assert_eq!(stored["description"], "Event bus");
    assert_eq!(ds.record().entity_type, "kafka");
}

#[tokio::test]
async fn test_get_or_create_novel_key_creates_once() {
    let c = Catalog::new();
    let ds = c.ts.data_store(c.ds_id).await.unwrap();
    let schema = ds
        .schema(
            NewSchema::new("analytics.sessions", "table", c.user_id)
                .description("My description")
                .steward(c.user_id),
        )
        .await
        .unwrap();

    assert_eq!(schema.name(), "analytics.sessions");
    assert_eq!(c.mock.count(Method::Post, &c.schemas_path()), 1);
    assert_eq!(c.mock.write_count(), 1);

    // A second call finds the record instead of creating another one.
    let again = ds
        .schema(NewSchema::new("analytics.sessions", "table", c.user_id))
        .await
        .unwrap();
    assert_eq!(again.id(), schema.id());
    assert_eq!(c.mock.count(Method::Post, &c.schemas_path()), 1);
}

#[tokio::test]
async fn test_every_entity_kind_supports_get_or_create() {
    let c = Catalog::new();
    let user = c.ts.user(NewUser::new("colleague@example.com")).await.unwrap();
    let ds = c
        .ts
        .data_store(NewDataStore::new("Warehouse", "snowflake", &user))
        .await
        .unwrap();
    let schema = ds
        .schema(NewSchema::new("analytics.orders", "table", &user))
        .await
        .unwrap();
    let field = schema
        .field(
            NewField::new("order_id", "scalar", "number")
                .data_format("bigint")
                .tech_poc(&user),
        )
        .await
        .unwrap();
    let value = field
        .field_value(NewFieldValue::new("101").description("A sample"))
        .await
        .unwrap();
    let transformation = c
        .ts
        .transformation(NewTransformation::new("My API Transformation!", "pub_sub_event", user))
        .await
        .unwrap();

    assert_eq!(ds.record().tech_poc_id, Some(c.ts.user("colleague@example.com").await.unwrap().id()));
    assert_eq!(field.record().data_format.as_deref(), Some("bigint"));
    assert_eq!(value.value(), "101");
    assert_eq!(field.field_value("101").await.unwrap().id(), value.id());
    assert_eq!(transformation.name(), "My API Transformation!");
    assert_eq!(c.mock.write_count(), 6);
}

#[tokio::test]
async fn test_unknown_id_and_key_are_not_found() {
    let c = Catalog::new();
    let err = c.ts.data_store(9_999).await.unwrap_err();
    assert!(matches!(err, TreeSchemaError::NotFound { ref kind, .. } if kind == "data store"));

    let ds = c.ts.data_store(c.ds_id).await.unwrap();
    let err = ds.schema("no_such_schema").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(c.mock.write_count(), 0);
}

#[tokio::test]
async fn test_invalid_payload_rejected_before_any_request() {
    let c = Catalog::new();
    c.mock.clear_requests();
    let err = c
        .ts
        .data_store(NewDataStore::new("", "kafka", c.user_id))
        .await
        .unwrap_err();
    assert!(matches!(err, TreeSchemaError::Validation { .. }));
    assert!(c.mock.requests().is_empty());
}

#[tokio::test]
async fn test_lost_create_race_resolves_to_winner() {
    let c = Catalog::new();
    let ds = c.ts.data_store(c.ds_id).await.unwrap();
    c.mock.race_next_create("schemas");

    let schema = ds
        .schema(NewSchema::new("contested", "table", c.user_id))
        .await
        .unwrap();

    let live: Vec<_> = c
        .mock
        .records(&c.schemas_path())
        .into_iter()
        .filter(|r| r["name"] == "contested")
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0]["id"], schema.id());
    assert_eq!(c.mock.count(Method::Post, &c.schemas_path()), 1);
}

#[tokio::test]
async fn test_listing_follows_pagination() {
    let mock = Arc::new(MockTransport::new());
    for i in 0..5 {
        mock.seed("data-stores", json!({ "name": format!("store-{i}"), "type": "s3" }));
    }
    let config = ClientConfig {
        email: "me@example.com".into(),
        page_size: 2,
        ..Default::default()
    };
    let ts = TreeSchema::with_transport(mock.clone(), config);

    let stores = ts.get_data_stores().await.unwrap();
    assert_eq!(stores.len(), 5);
    assert_eq!(mock.count(Method::Get, "data-stores"), 3);
}

// --- Updates ---

#[tokio::test]
async fn test_update_description_changes_only_description() {
    let c = Catalog::new();
    let mut ds = c.ts.data_store(c.ds_id).await.unwrap();
    let before = ds.record().clone();

    ds.update(DataStoreUpdate::new().description("Updated description"))
        .await
        .unwrap();
    assert_eq!(ds.record().description.as_deref(), Some("Updated description"));

    ds.refresh().await.unwrap();
    let after = ds.record();
    assert_eq!(after.description.as_deref(), Some("Updated description"));
    assert_eq!(after.name, before.name);
    assert_eq!(after.entity_type, before.entity_type);
    assert_eq!(after.tech_poc_id, before.tech_poc_id);
    assert_eq!(after.tags, before.tags);

    let puts: Vec<_> = c
        .mock
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Put)
        .collect();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body, Some(json!({ "description": "Updated description" })));
}

#[tokio::test]
async fn test_field_update_sends_type_key() {
    let c = Catalog::new();
    let schema = c.ts.data_store(c.ds_id).await.unwrap().schema(c.schema_id).await.unwrap();
    let mut field = schema.field("user_id").await.unwrap();
    field
        .update(FieldUpdate::new().description("Newest description").entity_type("list"))
        .await
        .unwrap();

    assert_eq!(field.record().entity_type, "list");
    let stored = c.mock.record(&c.fields_path(), field.id()).unwrap();
    assert_eq!(stored["type"], "list");
    assert_eq!(stored["data_type"], "number");
}

#[tokio::test]
async fn test_empty_update_is_rejected_locally() {
    let c = Catalog::new();
    let mut ds = c.ts.data_store(c.ds_id).await.unwrap();
    c.mock.clear_requests();
    let err = ds.update(DataStoreUpdate::new()).await.unwrap_err();
    assert!(matches!(err, TreeSchemaError::Validation { .. }));
    assert!(c.mock.requests().is_empty());
}

#[tokio::test]
async fn test_field_value_update() {
    let c = Catalog::new();
    let field = c
        .ts
        .data_store(c.ds_id)
        .await
        .unwrap()
        .schema(c.schema_id)
        .await
        .unwrap()
        .field(c.field_ids[0])
        .await
        .unwrap();
    let mut value = field.field_value(NewFieldValue::new("01")).await.unwrap();

    value.update(FieldValueUpdate::new().field_value("202")).await.unwrap();
    assert_eq!(value.value(), "202");
    value
        .update(FieldValueUpdate::new().field_value("303").description("third description"))
        .await
        .unwrap();
    assert_eq!(value.value(), "303");
    assert_eq!(value.record().description.as_deref(), Some("third description"));
    assert!(field.field_value("01").await.unwrap_err().is_not_found());
}

// --- Tags ---

#[tokio::test]
async fn test_adding_same_tag_twice_keeps_one() {
    let c = Catalog::new();
    let mut schema = c.ts.data_store(c.ds_id).await.unwrap().schema(c.schema_id).await.unwrap();

    let added = schema.add_tags("schema tag").await.unwrap();
    assert_eq!(added, vec!["schema tag"]);
    let added = schema.add_tags(vec!["schema tag", "marketing"]).await.unwrap();
    assert_eq!(added, vec!["marketing"]);
    let added = schema.add_tags(["marketing", "schema tag"]).await.unwrap();
    assert!(added.is_empty());

    schema.refresh().await.unwrap();
    let occurrences = schema.tags().iter().filter(|t| *t == "schema tag").count();
    assert_eq!(occurrences, 1);
    assert_eq!(schema.tags(), &["schema tag", "marketing"]);

    let tag_posts = c
        .mock
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Post && r.path.ends_with("/tags"))
        .count();
    assert_eq!(tag_posts, 2);
}

#[tokio::test]
async fn test_tag_conflict_from_server_is_a_no_op() {
    let c = Catalog::new();
    let mut ds = c.ts.data_store(c.ds_id).await.unwrap();
    c.mock.fail_next(409, r#"{"message":"tag already exists"}"#);
    let added = ds.add_tags("pii").await.unwrap();
    assert_eq!(added, vec!["pii"]);
    assert_eq!(ds.tags(), &["pii"]);
}

// --- Deprecation ---

#[tokio::test]
async fn test_delete_schemas_accepts_mixed_ids_and_handles() {
    let c = Catalog::new();
    let ds = c.ts.data_store(c.ds_id).await.unwrap();
    let extra = ds
        .schema(NewSchema::new("tmp_schema", "table", c.user_id))
        .await
        .unwrap();
    let seeded = ds.schema(c.schema_id).await.unwrap();

    ds.delete_schemas(vec![Id::from(c.schema_id), Id::from(&extra), Id::from(&seeded)])
        .await
        .unwrap();

    let deletes: Vec<_> = c
        .mock
        .requests()
        .into_iter()
        .filter(|r| r.method == Method::Delete)
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].body, Some(json!({ "ids": [c.schema_id, extra.id()] })));

    // Deprecated, not erased.
    let stored = c.mock.record(&c.schemas_path(), extra.id()).unwrap();
    assert_eq!(stored["deprecated"], true);
    assert!(ds.schema("tmp_schema").await.unwrap_err().is_not_found());
    assert!(ds.get_schemas().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_fields_shapes() {
    let c = Catalog::new();
    let schema = c.ts.data_store(c.ds_id).await.unwrap().schema(c.schema_id).await.unwrap();
    let fields = schema.get_fields().await.unwrap();
    assert_eq!(fields.len(), 2);

    schema.delete_fields(&fields[0]).await.unwrap();
    schema.delete_fields(vec![fields[1].id()]).await.unwrap();
    schema.delete_fields(Vec::<i64>::new()).await.unwrap();

    assert_eq!(c.mock.count(Method::Delete, &c.fields_path()), 2);
    assert!(schema.get_fields().await.unwrap().is_empty());
}

// --- Links ---

async fn fresh_transformation(c: &Catalog, name: &str) -> treeschema_core::Transformation {
    c.ts
        .transformation(NewTransformation::new(name, "etl", c.user_id))
        .await
        .unwrap()
}

fn last_link_post(c: &Catalog) -> serde_json::Value {
    c.mock
        .requests()
        .into_iter()
        .rev()
        .find(|r| r.method == Method::Post && r.path.ends_with("/links"))
        .and_then(|r| r.body)
        .unwrap()
}

#[tokio::test]
async fn test_all_link_shapes_submit_identical_batches() {
    let c = Catalog::new();
    let schema = c.ts.data_store(c.ds_id).await.unwrap().schema(c.schema_id).await.unwrap();
    let source = schema.field(c.field_ids[0]).await.unwrap();
    let target = schema.field(c.field_ids[1]).await.unwrap();
    let [s, t] = c.field_ids;
    let expected = json!({ "links": [{ "source_field_id": s, "target_field_id": t }] });

    let mut t1 = fresh_transformation(&c, "shape-mapping").await;
    let mapping = json!({ "source_field_id": s, "target_field_id": t });
    t1.create_links(LinkInput::try_from(mapping).unwrap()).await.unwrap();
    assert_eq!(last_link_post(&c), expected);

    let mut t2 = fresh_transformation(&c, "shape-list").await;
    t2.create_links(vec![LinkSpec::new(s, t)]).await.unwrap();
    assert_eq!(last_link_post(&c), expected);

    let mut t3 = fresh_transformation(&c, "shape-tuple").await;
    t3.create_links((&source, &target)).await.unwrap();
    assert_eq!(last_link_post(&c), expected);

    let mut t4 = fresh_transformation(&c, "shape-tuple-list").await;
    let batch = t4.create_links(vec![(&source, &target)]).await.unwrap();
    assert_eq!(last_link_post(&c), expected);

    assert!(batch.is_complete());
    assert_eq!(batch.created.len(), 1);
    assert_eq!(t4.links().len(), 1);
}

#[tokio::test]
async fn test_partial_link_failure_is_reported() {
    let c = Catalog::new();
    let [s, t] = c.field_ids;
    let mut transformation = fresh_transformation(&c, "partial").await;

    let batch = transformation
        .create_links(vec![LinkSpec::new(s, t), LinkSpec::new(s, 9_999)])
        .await
        .unwrap();

    assert_eq!(batch.created.len(), 1);
    assert_eq!(batch.failed.len(), 1);
    assert_eq!(batch.failed[0].spec, LinkSpec::new(s, 9_999));
    assert!(!batch.is_complete());
}

#[tokio::test]
async fn test_link_batch_is_not_replayed_after_timeout() {
    let c = Catalog::new();
    let [s, t] = c.field_ids;
    let created = fresh_transformation(&c, "lost reply").await;
    let retrying = TreeSchema::with_transport(
        c.mock.clone(),
        ClientConfig {
            email: "me@example.com".into(),
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1,
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let mut transformation = retrying.transformation(created.id()).await.unwrap();
    c.mock.lose_next_reply();

    let err = transformation
        .create_links(vec![LinkSpec::new(s, t)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TreeSchemaError::Api(treeschema_core::ApiError::Timeout { .. })
    ));
    let links_path = format!("transformations/{}/links", transformation.id());
    assert_eq!(c.mock.count(Method::Post, &links_path), 1);
    // The server kept the link; a fresh read sees it.
    assert_eq!(transformation.get_links().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_link_ids_never_reach_server() {
    let c = Catalog::new();
    let mut transformation = fresh_transformation(&c, "invalid").await;
    c.mock.clear_requests();

    let err = transformation
        .create_links(LinkSpec::new(0, c.field_ids[1]))
        .await
        .unwrap_err();
    assert!(matches!(err, TreeSchemaError::Validation { .. }));
    let empty = transformation.create_links(Vec::<LinkSpec>::new()).await.unwrap();
    assert!(empty.created.is_empty());
    assert!(c.mock.requests().is_empty());
}

#[tokio::test]
async fn test_link_get_or_create_by_pair() {
    let c = Catalog::new();
    let [s, t] = c.field_ids;
    let mut transformation = fresh_transformation(&c, "pairs").await;

    let first = transformation.link(LinkSpec::new(s, t)).await.unwrap();
    let second = transformation.link(LinkSpec::new(s, t)).await.unwrap();
    assert_eq!(first.id(), second.id());
    let links_path = format!("transformations/{}/links", transformation.id());
    assert_eq!(c.mock.count(Method::Post, &links_path), 1);

    let by_id = transformation.link(first.id()).await.unwrap();
    assert_eq!(by_id.spec(), LinkSpec::new(s, t));
}

#[tokio::test]
async fn test_delete_links_updates_known_links() {
    let c = Catalog::new();
    let [s, t] = c.field_ids;
    let mut transformation = fresh_transformation(&c, "deletes").await;
    transformation
        .create_links(vec![LinkSpec::new(s, t), LinkSpec::new(t, s)])
        .await
        .unwrap();
    assert_eq!(transformation.links().len(), 2);

    let all: Vec<_> = transformation.links().values().cloned().collect();
    transformation.delete_links(all).await.unwrap();
    assert!(transformation.links().is_empty());
    assert!(transformation.get_links().await.unwrap().is_empty());
}
