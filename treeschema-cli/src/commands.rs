//! Subcommand handlers.

use std::io::BufRead;
use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use treeschema_core::credentials::{CredentialStore, KeyringCredentialStore};
use treeschema_core::{
    ClientConfig, DataStore, Field, FieldUpdate, Lookup, LinkSpec, NewDataStore, NewField,
    NewFieldValue, NewSchema, NewTransformation, SaveOptions, Schema, TreeSchema, UserRef,
};

use crate::{
    AuthAction, Commands, ConfigAction, DataStoreAction, DbtAction, FieldAction, LinkAction,
    SchemaAction, TransformationAction, UserAction, ValueAction,
};

/// Flags shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub workspace: PathBuf,
    pub host: Option<String>,
    pub email: Option<String>,
    pub quiet: bool,
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, options: &GlobalOptions) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, options),
        Commands::Auth { action } => handle_auth(action, options),
        Commands::Users { action } => handle_users(action, &connect(options)?).await,
        Commands::DataStores { action } => handle_data_stores(action, &connect(options)?).await,
        Commands::Schemas { action } => handle_schemas(action, &connect(options)?).await,
        Commands::Fields { action } => handle_fields(action, &connect(options)?).await,
        Commands::Values { action } => handle_values(action, &connect(options)?).await,
        Commands::Transformations { action } => {
            handle_transformations(action, &connect(options)?).await
        }
        Commands::Links { action } => handle_links(action, &connect(options)?).await,
        Commands::Dbt { action } => handle_dbt(action, &connect(options)?, options.quiet).await,
    }
}

fn load_config(options: &GlobalOptions) -> anyhow::Result<ClientConfig> {
    let mut config = treeschema_core::config::load_config(Some(&options.workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    if let Some(host) = &options.host {
        config.host = host.clone();
    }
    if let Some(email) = &options.email {
        config.email = email.clone();
    }
    Ok(config)
}

fn connect(options: &GlobalOptions) -> anyhow::Result<TreeSchema> {
    let config = load_config(options)?;
    Ok(TreeSchema::from_config(config)?)
}

/// `id:<N>` selects by ID; any other argument is a natural key, digits included.
fn lookup<P>(arg: &str) -> anyhow::Result<Lookup<P>> {
    match arg.trim().strip_prefix("id:") {
        Some(id) => parse_id(id, arg).map(Lookup::Id),
        None => Ok(Lookup::Key(arg.to_string())),
    }
}

fn parse_id(id: &str, arg: &str) -> anyhow::Result<i64> {
    id.trim()
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("invalid ID in '{arg}': {e}"))
}

/// Field values are strings, so a value is only read as an ID when asked to.
fn value_lookup(value: &str, by_id: bool) -> anyhow::Result<Lookup<NewFieldValue>> {
    if by_id {
        let id = value.trim().strip_prefix("id:").unwrap_or(value);
        return parse_id(id, value).map(Lookup::Id);
    }
    Ok(Lookup::Key(value.to_string()))
}

/// E-mails are never numeric, so a bare number is a user ID here.
async fn user_ref(session: &TreeSchema, arg: &str) -> anyhow::Result<UserRef> {
    let trimmed = arg.trim();
    let id = trimmed.strip_prefix("id:").unwrap_or(trimmed);
    if let Ok(id) = id.trim().parse::<i64>() {
        return Ok(UserRef(id));
    }
    let user = session.user(arg).await?;
    Ok(UserRef::from(&user))
}

/// Parse a `SOURCE:TARGET` field ID pair.
fn parse_link_pair(pair: &str) -> anyhow::Result<LinkSpec> {
    let (source, target) = pair
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected SOURCE_FIELD_ID:TARGET_FIELD_ID, got '{pair}'"))?;
    let source = source
        .trim()
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("invalid source field ID in '{pair}': {e}"))?;
    let target = target
        .trim()
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("invalid target field ID in '{pair}': {e}"))?;
    Ok(LinkSpec::new(source, target))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn save_options(
    save_all: bool,
    add_schemas_fields: bool,
    update_descriptions: bool,
    update_tags: bool,
    add_lineage: bool,
) -> SaveOptions {
    if save_all {
        return SaveOptions::all();
    }
    SaveOptions {
        add_schemas_fields,
        update_descriptions,
        update_tags,
        add_lineage,
    }
}

fn handle_config(action: ConfigAction, options: &GlobalOptions) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = options.workspace.join(".treeschema");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = ClientConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(options)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            if !treeschema_core::config::config_exists(Some(&options.workspace)) && !options.quiet {
                println!("# no configuration file found; showing defaults and environment");
            }
            Ok(())
        }
    }
}

fn credential_account(config: &ClientConfig) -> anyhow::Result<String> {
    let account = config
        .credential_store_key
        .clone()
        .unwrap_or_else(|| config.email.clone());
    if account.trim().is_empty() {
        anyhow::bail!("No account configured: pass --email or set `email` in config.toml");
    }
    Ok(account)
}

fn handle_auth(action: AuthAction, options: &GlobalOptions) -> anyhow::Result<()> {
    let config = load_config(options)?;
    let account = credential_account(&config)?;
    let cred_store = KeyringCredentialStore::new();

    match action {
        AuthAction::Login => {
            let secret = match std::env::var(&config.secret_key_env) {
                Ok(key) if !key.trim().is_empty() => key,
                _ => {
                    eprintln!("Enter the secret key for {account}:");
                    let mut line = String::new();
                    std::io::stdin().lock().read_line(&mut line)?;
                    line.trim().to_string()
                }
            };
            if secret.is_empty() {
                anyhow::bail!("No secret key provided");
            }
            cred_store.store_key(&account, &secret)?;
            println!("Stored secret key for {account} in the OS keyring.");
            Ok(())
        }
        AuthAction::Logout => {
            cred_store.delete_key(&account)?;
            println!("Removed secret key for {account}.");
            Ok(())
        }
        AuthAction::Status => {
            if cred_store.has_key(&account) {
                println!("{account}: secret key stored in the OS keyring");
            } else if std::env::var(&config.secret_key_env).is_ok_and(|k| !k.is_empty()) {
                println!("{account}: secret key read from {}", config.secret_key_env);
            } else {
                println!("{account}: not configured");
            }
            Ok(())
        }
    }
}

async fn handle_users(action: UserAction, session: &TreeSchema) -> anyhow::Result<()> {
    match action {
        UserAction::List => {
            for user in session.get_users().await? {
                println!("{}\t{}", user.id(), user.email());
            }
        }
        UserAction::Get { user } => {
            let user = session.user(lookup(&user)?).await?;
            print_json(user.record())?;
        }
    }
    Ok(())
}

async fn handle_data_stores(action: DataStoreAction, session: &TreeSchema) -> anyhow::Result<()> {
    match action {
        DataStoreAction::List => {
            for ds in session.get_data_stores().await? {
                println!("{}\t{}\t{}", ds.id(), ds.name(), ds.record().entity_type);
            }
        }
        DataStoreAction::Get { data_store } => {
            let ds = session.data_store(lookup(&data_store)?).await?;
            print_json(ds.record())?;
        }
        DataStoreAction::Create {
            name,
            entity_type,
            tech_poc,
            description,
        } => {
            let tech_poc = user_ref(session, &tech_poc).await?;
            let mut payload = NewDataStore::new(name, entity_type, tech_poc);
            if let Some(description) = description {
                payload = payload.description(description);
            }
            let ds = session.data_store(payload).await?;
            print_json(ds.record())?;
        }
        DataStoreAction::Tag { data_store, tags } => {
            let mut ds = session.data_store(lookup(&data_store)?).await?;
            let added = ds.add_tags(tags).await?;
            print_json(&added)?;
        }
    }
    Ok(())
}

async fn data_store(session: &TreeSchema, arg: &str) -> anyhow::Result<DataStore> {
    Ok(session.data_store(lookup(arg)?).await?)
}

async fn schema(session: &TreeSchema, data_store_arg: &str, schema_arg: &str) -> anyhow::Result<Schema> {
    let ds = data_store(session, data_store_arg).await?;
    Ok(ds.schema(lookup(schema_arg)?).await?)
}

async fn field(
    session: &TreeSchema,
    data_store_arg: &str,
    schema_arg: &str,
    field_arg: &str,
) -> anyhow::Result<Field> {
    let schema = schema(session, data_store_arg, schema_arg).await?;
    Ok(schema.field(lookup(field_arg)?).await?)
}

async fn handle_schemas(action: SchemaAction, session: &TreeSchema) -> anyhow::Result<()> {
    match action {
        SchemaAction::List { data_store: ds } => {
            let ds = data_store(session, &ds).await?;
            for schema in ds.get_schemas().await? {
                println!("{}\t{}\t{}", schema.id(), schema.name(), schema.record().entity_type);
            }
        }
        SchemaAction::Get {
            data_store: ds,
            schema: name,
        } => {
            let schema = schema(session, &ds, &name).await?;
            print_json(schema.record())?;
        }
        SchemaAction::Create {
            data_store: ds,
            name,
            entity_type,
            tech_poc,
            steward,
            description,
        } => {
            let ds = data_store(session, &ds).await?;
            let mut payload = NewSchema::new(name, entity_type, user_ref(session, &tech_poc).await?);
            if let Some(steward) = steward {
                payload = payload.steward(user_ref(session, &steward).await?);
            }
            if let Some(description) = description {
                payload = payload.description(description);
            }
            let schema = ds.schema(payload).await?;
            print_json(schema.record())?;
        }
        SchemaAction::Delete { data_store: ds, ids } => {
            let ds = data_store(session, &ds).await?;
            ds.delete_schemas(ids).await?;
        }
    }
    Ok(())
}

async fn handle_fields(action: FieldAction, session: &TreeSchema) -> anyhow::Result<()> {
    match action {
        FieldAction::List {
            data_store: ds,
            schema: name,
        } => {
            let schema = schema(session, &ds, &name).await?;
            for field in schema.get_fields().await? {
                println!(
                    "{}\t{}\t{}",
                    field.id(),
                    field.name(),
                    field.record().data_type
                );
            }
        }
        FieldAction::Get {
            data_store: ds,
            schema: s,
            field: f,
        } => {
            let field = field(session, &ds, &s, &f).await?;
            print_json(field.record())?;
        }
        FieldAction::Create {
            data_store: ds,
            schema: s,
            name,
            entity_type,
            data_type,
            data_format,
            description,
            tech_poc,
        } => {
            let schema = schema(session, &ds, &s).await?;
            let mut payload = NewField::new(name, entity_type, data_type);
            if let Some(data_format) = data_format {
                payload = payload.data_format(data_format);
            }
            if let Some(description) = description {
                payload = payload.description(description);
            }
            if let Some(tech_poc) = tech_poc {
                payload = payload.tech_poc(user_ref(session, &tech_poc).await?);
            }
            let field = schema.field(payload).await?;
            print_json(field.record())?;
        }
        FieldAction::Update {
            data_store: ds,
            schema: s,
            field: f,
            name,
            entity_type,
            data_type,
            data_format,
            description,
        } => {
            let mut field = field(session, &ds, &s, &f).await?;
            let mut update = FieldUpdate::new();
            if let Some(name) = name {
                update = update.name(name);
            }
            if let Some(entity_type) = entity_type {
                update = update.entity_type(entity_type);
            }
            if let Some(data_type) = data_type {
                update = update.data_type(data_type);
            }
            if let Some(data_format) = data_format {
                update = update.data_format(data_format);
            }
            if let Some(description) = description {
                update = update.description(description);
            }
            field.update(update).await?;
            print_json(field.record())?;
        }
        FieldAction::Delete {
            data_store: ds,
            schema: s,
            ids,
        } => {
            let schema = schema(session, &ds, &s).await?;
            schema.delete_fields(ids).await?;
        }
    }
    Ok(())
}

async fn handle_values(action: ValueAction, session: &TreeSchema) -> anyhow::Result<()> {
    match action {
        ValueAction::List {
            data_store: ds,
            schema: s,
            field: f,
        } => {
            let field = field(session, &ds, &s, &f).await?;
            for value in field.get_field_values().await? {
                println!("{}\t{}", value.id(), value.value());
            }
        }
        ValueAction::Get {
            data_store: ds,
            schema: s,
            field: f,
            value,
            id,
        } => {
            let field = field(session, &ds, &s, &f).await?;
            let value = field.field_value(value_lookup(&value, id)?).await?;
            print_json(value.record())?;
        }
        ValueAction::Create {
            data_store: ds,
            schema: s,
            field: f,
            value,
            description,
        } => {
            let field = field(session, &ds, &s, &f).await?;
            let mut payload = NewFieldValue::new(value);
            if let Some(description) = description {
                payload = payload.description(description);
            }
            let value = field.field_value(payload).await?;
            print_json(value.record())?;
        }
    }
    Ok(())
}

async fn handle_transformations(
    action: TransformationAction,
    session: &TreeSchema,
) -> anyhow::Result<()> {
    match action {
        TransformationAction::List => {
            for t in session.get_transformations().await? {
                println!("{}\t{}\t{}", t.id(), t.name(), t.record().entity_type);
            }
        }
        TransformationAction::Get { transformation } => {
            let t = session.transformation(lookup(&transformation)?).await?;
            print_json(t.record())?;
        }
        TransformationAction::Create {
            name,
            entity_type,
            tech_poc,
            description,
        } => {
            let tech_poc = user_ref(session, &tech_poc).await?;
            let mut payload = NewTransformation::new(name, entity_type, tech_poc);
            if let Some(description) = description {
                payload = payload.description(description);
            }
            let t = session.transformation(payload).await?;
            print_json(t.record())?;
        }
        TransformationAction::Tag {
            transformation,
            tags,
        } => {
            let mut t = session.transformation(lookup(&transformation)?).await?;
            let added = t.add_tags(tags).await?;
            print_json(&added)?;
        }
    }
    Ok(())
}

async fn handle_links(action: LinkAction, session: &TreeSchema) -> anyhow::Result<()> {
    match action {
        LinkAction::List { transformation } => {
            let mut t = session.transformation(lookup(&transformation)?).await?;
            for link in t.get_links().await?.values() {
                println!(
                    "{}\t{} -> {}",
                    link.id(),
                    link.source_field_id(),
                    link.target_field_id()
                );
            }
        }
        LinkAction::Create {
            transformation,
            pairs,
        } => {
            let specs = pairs
                .iter()
                .map(|p| parse_link_pair(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let mut t = session.transformation(lookup(&transformation)?).await?;
            let batch = t.create_links(specs).await?;
            let created: Vec<_> = batch.created.values().map(|l| l.record()).collect();
            print_json(&serde_json::json!({
                "created": created,
                "failed": batch.failed,
            }))?;
            if !batch.is_complete() {
                anyhow::bail!("{} link(s) were rejected", batch.failed.len());
            }
        }
        LinkAction::Delete {
            transformation,
            ids,
        } => {
            let mut t = session.transformation(lookup(&transformation)?).await?;
            t.delete_links(ids).await?;
        }
    }
    Ok(())
}

async fn handle_dbt(action: DbtAction, session: &TreeSchema, quiet: bool) -> anyhow::Result<()> {
    match action {
        DbtAction::Parse {
            data_store: ds,
            manifest,
            wait,
            timeout,
            save_all,
            add_schemas_fields,
            update_descriptions,
            update_tags,
            add_lineage,
        } => {
            let options = save_options(
                save_all,
                add_schemas_fields,
                update_descriptions,
                update_tags,
                add_lineage,
            );
            let mut ds = data_store(session, &ds).await?;
            let dbt = ds.dbt_mut();
            let process_id = dbt.parse_dbt_manifest(manifest.as_path()).await?;
            if !quiet {
                eprintln!("Submitted {} as process {process_id}", manifest.display());
            }
            if !wait && options.is_empty() {
                print_json(&serde_json::json!({ "process_id": process_id }))?;
                return Ok(());
            }

            let mut policy = session.config().poll.clone();
            if let Some(timeout) = timeout {
                policy.timeout_secs = timeout;
                for warning in policy.validate() {
                    tracing::warn!(warning = warning.as_str(), "Suspicious --timeout");
                }
            }
            let token = CancellationToken::new();
            let ctrl_c = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let status = dbt.wait_for_parse_complete_with(&policy, Some(&token)).await?;
            if options.is_empty() {
                print_json(&status)?;
                return Ok(());
            }
            let summary = dbt.save_parse_results(options).await?;
            print_json(&summary)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prefixed_argument_is_an_id() {
        let parsed: Lookup<NewDataStore> = lookup(" id:42 ").unwrap();
        assert_eq!(parsed, Lookup::Id(42));
        let parsed: Lookup<NewDataStore> = lookup("Kafka").unwrap();
        assert_eq!(parsed, Lookup::Key("Kafka".to_string()));
        assert!(lookup::<NewDataStore>("id:abc").is_err());
    }

    #[test]
    fn test_numeric_names_stay_keys() {
        let parsed: Lookup<NewSchema> = lookup("2024").unwrap();
        assert_eq!(parsed, Lookup::Key("2024".to_string()));
        let parsed: Lookup<NewFieldValue> = lookup("01").unwrap();
        assert_eq!(parsed, Lookup::Key("01".to_string()));
    }

    #[test]
    fn test_field_values_are_keys_unless_flagged() {
        assert_eq!(value_lookup("01", false).unwrap(), Lookup::Key("01".to_string()));
        assert_eq!(value_lookup("id:7", false).unwrap(), Lookup::Key("id:7".to_string()));
        assert_eq!(value_lookup("7", true).unwrap(), Lookup::Id(7));
        assert_eq!(value_lookup("id:7", true).unwrap(), Lookup::Id(7));
        assert!(value_lookup("pending", true).is_err());
    }

    #[test]
    fn test_parse_link_pair() {
        assert_eq!(parse_link_pair("12:34").unwrap(), LinkSpec::new(12, 34));
        assert_eq!(parse_link_pair(" 5 : 6 ").unwrap(), LinkSpec::new(5, 6));
        assert!(parse_link_pair("12").is_err());
        assert!(parse_link_pair("a:1").is_err());
    }

    #[test]
    fn test_save_all_overrides_individual_flags() {
        assert_eq!(save_options(true, false, false, false, false), SaveOptions::all());
        let only_lineage = save_options(false, false, false, false, true);
        assert!(only_lineage.add_lineage);
        assert!(!only_lineage.add_schemas_fields);
        assert!(save_options(false, false, false, false, false).is_empty());
    }

    #[test]
    fn test_credential_account_prefers_store_key() {
        let config = ClientConfig {
            email: "me@example.com".into(),
            credential_store_key: Some("work".into()),
            ..Default::default()
        };
        assert_eq!(credential_account(&config).unwrap(), "work");
        assert!(credential_account(&ClientConfig::default()).is_err());
    }
}
