//! dbt manifest ingestion.
//!
//! A manifest is uploaded to the server, which parses it asynchronously. The
//! client polls the job until it completes and can then apply the extracted
//! schemas, fields, descriptions, tags and lineage to the catalog.

pub mod manifest;
pub mod processor;
pub mod results;

pub use manifest::ManifestSource;
pub use processor::{DbtManifest, ParseState, ParseStatus};
pub use results::{
    FieldPath, ParseResults, ParsedField, ParsedLink, ParsedSchema, SaveOptions, SaveSummary,
};
