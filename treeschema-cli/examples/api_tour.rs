//! A walk through the SDK surface against a live Tree Schema server.
//!
//! ```sh
//! TREE_SCHEMA_HOST=https://api-treeschema.example.com \
//! TREE_SCHEMA_EMAIL=you@example.com \
//! TREE_SCHEMA_SECRET_KEY=... \
//! cargo run -p treeschema --example api_tour
//! ```

use serde_json::json;
use treeschema_core::{
    FieldUpdate, FieldValueUpdate, Link, LinkInput, NewDataStore, NewField, NewFieldValue,
    NewSchema, NewTransformation, SaveOptions, TreeSchema,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("treeschema_core=info"))
        .init();

    let email = std::env::var("TREE_SCHEMA_EMAIL")?;
    let secret = std::env::var("TREE_SCHEMA_SECRET_KEY")?;
    let ts = TreeSchema::new(email.as_str(), secret)?;

    // Users
    println!("{} users", ts.get_users().await?.len());
    let me = ts.user(email.as_str()).await?;
    let colleague = ts.user("colleague@example.com").await?;

    // Data stores: by ID, by name, or get-or-create
    println!("{} data stores", ts.get_data_stores().await?.len());
    let mut ds = ts
        .data_store(
            NewDataStore::new("Events", "postgres", &me).description("Created from the Rust SDK"),
        )
        .await?;
    ds.add_tags("single_tag").await?;
    ds.add_tags(["new tag", "data_store_tag"]).await?;

    // Schemas
    let mut schema = ds
        .schema(
            NewSchema::new("public.events", "table", &me)
                .description("Raw event stream")
                .steward(&colleague),
        )
        .await?;
    schema.add_tags(["marketing", "conversion"]).await?;

    // Fields
    let mut field = schema
        .field(
            NewField::new("event_ts", "scalar", "timestamp")
                .data_format("YYYY-MM-DD HH:MM:SS")
                .description("When the event was received")
                .tech_poc(&me),
        )
        .await?;
    field
        .update(FieldUpdate::new().description("Receipt time (UTC)").entity_type("list"))
        .await?;
    field
        .update(FieldUpdate::new().entity_type("scalar").data_type("datetime"))
        .await?;
    field.add_tags("field tag").await?;

    // Field values
    let mut value = field
        .field_value(NewFieldValue::new("101").description("status code 101"))
        .await?;
    value.update(FieldValueUpdate::new().field_value("202")).await?;
    value
        .update(
            FieldValueUpdate::new()
                .field_value("303")
                .description("third description"),
        )
        .await?;

    // Transformations and lineage
    let mut t = ts
        .transformation(NewTransformation::new("Event fan-out", "pub_sub_event", &me))
        .await?;
    t.add_tags(["a list of", "transform tags"]).await?;

    let user_id = schema
        .field(NewField::new("user_id", "scalar", "number").data_format("bigint"))
        .await?;

    // One mapping, a list of mappings, a field pair, or a list of field pairs
    let single = LinkInput::try_from(json!({
        "source_field_id": user_id.id(),
        "target_field_id": field.id(),
    }))?;
    t.create_links(single).await?;
    let many = LinkInput::try_from(json!([
        { "source_field_id": user_id.id(), "target_field_id": field.id() },
        { "source_field_id": field.id(), "target_field_id": user_id.id() },
    ]))?;
    t.create_links(many).await?;
    t.create_links((&user_id, &field)).await?;
    let batch = t
        .create_links(vec![(&user_id, &field), (&field, &user_id)])
        .await?;
    println!(
        "{} links created, {} rejected",
        batch.created.len(),
        batch.failed.len()
    );

    t.get_links().await?;
    let existing: Vec<Link> = t.links().values().cloned().collect();
    t.delete_links(existing).await?;

    // dbt manifests, from a path or from bytes fetched elsewhere
    let dbt = ds.dbt_mut();
    dbt.parse_dbt_manifest("./manifest.json").await?;
    dbt.wait_for_parse_complete().await?;
    println!("{:?}", dbt.get_manifest_parse_status().await?);
    let summary = dbt.save_parse_results(SaveOptions::all()).await?;
    println!("{summary:?}");

    let manifest = tokio::fs::read("./manifest.json").await?;
    dbt.parse_dbt_manifest(manifest).await?;
    dbt.wait_for_parse_complete().await?;
    dbt.save_parse_results(SaveOptions {
        add_lineage: true,
        ..Default::default()
    })
    .await?;

    // Deprecation
    schema.delete_fields(&user_id).await?;
    ds.delete_schemas(vec![&schema]).await?;

    Ok(())
}
