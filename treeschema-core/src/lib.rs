//! # Tree Schema Core
//!
//! Client SDK for the Tree Schema metadata catalog.
//! Provides the session, get-or-create resolution for every catalog entity,
//! tagging, bulk deprecation, lineage links, and dbt manifest ingestion.

pub mod client;
pub mod config;
pub mod credentials;
pub mod dbt;
pub mod entities;
pub mod error;
pub mod resolver;
pub mod transport;

// Re-export commonly used types at the crate root.
pub use client::TreeSchema;
pub use config::{ClientConfig, PollPolicy, RetryConfig};
pub use dbt::{DbtManifest, ManifestSource, ParseState, ParseStatus, SaveOptions, SaveSummary};
pub use entities::{
    DataStore, DataStoreUpdate, FailedLink, Field, FieldUpdate, FieldValue, FieldValueUpdate,
    Link, LinkBatch, LinkInput, LinkLookup, LinkSpec, NewDataStore, NewField, NewFieldValue,
    NewSchema, NewTransformation, NewUser, Schema, SchemaUpdate, Transformation,
    TransformationUpdate, User,
};
pub use error::{ApiError, ConfigError, Result, TreeSchemaError};
pub use resolver::{Id, Ids, Lookup, Tags, UserRef};
pub use transport::{HttpTransport, MockTransport, Transport};
