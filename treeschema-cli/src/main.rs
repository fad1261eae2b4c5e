//! Tree Schema CLI: terminal interface for the Tree Schema metadata catalog.
//!
//! Browse and edit catalog entities, manage lineage links, and ingest dbt manifests.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// treeschema: command-line client for the Tree Schema catalog
#[derive(Parser, Debug)]
#[command(name = "treeschema", version, about, long_about = None)]
struct Cli {
    /// API endpoint (overrides configuration and TREE_SCHEMA_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Account e-mail (overrides configuration)
    #[arg(long, global = true)]
    email: Option<String>,

    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Catalog users
    Users {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Data stores
    DataStores {
        #[command(subcommand)]
        action: DataStoreAction,
    },
    /// Schemas within a data store
    Schemas {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Fields within a schema
    Fields {
        #[command(subcommand)]
        action: FieldAction,
    },
    /// Sample values of a field
    Values {
        #[command(subcommand)]
        action: ValueAction,
    },
    /// Transformations
    Transformations {
        #[command(subcommand)]
        action: TransformationAction,
    },
    /// Lineage links of a transformation
    Links {
        #[command(subcommand)]
        action: LinkAction,
    },
    /// dbt manifest ingestion
    Dbt {
        #[command(subcommand)]
        action: DbtAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the secret key stored in the OS keyring
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum UserAction {
    /// List all users
    List,
    /// Show a user by e-mail, or by ID as `id:<N>`
    Get { user: String },
}

#[derive(clap::Subcommand, Debug)]
enum DataStoreAction {
    /// List all data stores
    List,
    /// Show a data store by name, or by ID as `id:<N>`
    Get { data_store: String },
    /// Get or create a data store
    Create {
        #[arg(long)]
        name: String,
        /// Data store type (e.g. postgres, kafka, s3)
        #[arg(long = "type")]
        entity_type: String,
        /// Technical point of contact: user ID or e-mail
        #[arg(long)]
        tech_poc: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Attach tags to a data store
    Tag {
        data_store: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum SchemaAction {
    /// List the schemas of a data store
    List { data_store: String },
    /// Show a schema by name, or by ID as `id:<N>`
    Get { data_store: String, schema: String },
    /// Get or create a schema
    Create {
        data_store: String,
        #[arg(long)]
        name: String,
        /// Schema type (e.g. table, topic, file)
        #[arg(long = "type")]
        entity_type: String,
        /// Technical point of contact: user ID or e-mail
        #[arg(long)]
        tech_poc: String,
        /// Data steward: user ID or e-mail
        #[arg(long)]
        steward: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Deprecate schemas by ID
    Delete {
        data_store: String,
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum FieldAction {
    /// List the fields of a schema
    List { data_store: String, schema: String },
    /// Show a field by name, or by ID as `id:<N>`
    Get {
        data_store: String,
        schema: String,
        field: String,
    },
    /// Get or create a field
    Create {
        data_store: String,
        schema: String,
        #[arg(long)]
        name: String,
        /// Field type (e.g. scalar, list, object)
        #[arg(long = "type")]
        entity_type: String,
        #[arg(long)]
        data_type: String,
        #[arg(long)]
        data_format: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Technical point of contact: user ID or e-mail
        #[arg(long)]
        tech_poc: Option<String>,
    },
    /// Update named attributes of a field
    Update {
        data_store: String,
        schema: String,
        field: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        entity_type: Option<String>,
        #[arg(long)]
        data_type: Option<String>,
        #[arg(long)]
        data_format: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Deprecate fields by ID
    Delete {
        data_store: String,
        schema: String,
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ValueAction {
    /// List the sample values of a field
    List {
        data_store: String,
        schema: String,
        field: String,
    },
    /// Show a field value by value, or by ID with --id
    Get {
        data_store: String,
        schema: String,
        field: String,
        value: String,
        /// Treat VALUE as a field value ID
        #[arg(long)]
        id: bool,
    },
    /// Get or create a field value
    Create {
        data_store: String,
        schema: String,
        field: String,
        value: String,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum TransformationAction {
    /// List all transformations
    List,
    /// Show a transformation by name, or by ID as `id:<N>`
    Get { transformation: String },
    /// Get or create a transformation
    Create {
        #[arg(long)]
        name: String,
        /// Transformation type (e.g. pub_sub_event, etl, dbt)
        #[arg(long = "type")]
        entity_type: String,
        /// Technical point of contact: user ID or e-mail
        #[arg(long)]
        tech_poc: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Attach tags to a transformation
    Tag {
        transformation: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum LinkAction {
    /// List the links of a transformation
    List { transformation: String },
    /// Create links given as SOURCE_FIELD_ID:TARGET_FIELD_ID pairs
    Create {
        transformation: String,
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Deprecate links by ID
    Delete {
        transformation: String,
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum DbtAction {
    /// Submit a dbt manifest.json for parsing
    Parse {
        data_store: String,
        manifest: PathBuf,
        /// Wait for parsing to finish
        #[arg(long)]
        wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// Apply every category of parsed metadata (implies --wait)
        #[arg(long)]
        save_all: bool,
        /// Create schemas and fields found in the manifest (implies --wait)
        #[arg(long)]
        add_schemas_fields: bool,
        /// Overwrite existing descriptions (implies --wait)
        #[arg(long)]
        update_descriptions: bool,
        /// Merge manifest tags (implies --wait)
        #[arg(long)]
        update_tags: bool,
        /// Create lineage links (implies --wait)
        #[arg(long)]
        add_lineage: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file to the workspace
    Init,
    /// Show the resolved configuration
    Show,
}

#[derive(clap::Subcommand, Debug)]
enum AuthAction {
    /// Store a secret key in the OS keyring (read from TREE_SCHEMA_SECRET_KEY or stdin)
    Login,
    /// Remove the stored secret key
    Logout,
    /// Report whether a secret key is stored
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn,treeschema_core=info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("com", "treeschema", "treeschema")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "treeschema.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = commands::GlobalOptions {
        workspace,
        host: cli.host,
        email: cli.email,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, &options).await
}
