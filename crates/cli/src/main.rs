//! Administrative CLI for curator.

mod api_client;

use anyhow::{Context, Result};
use api_client::{
    ApiClient, AssetTarget, AssetUpload, ReconcileRequest, SweepReport, SweepRun,
};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Keys listed per section before the rest is summarized.
const LIST_PREVIEW: usize = 20;

#[derive(Parser)]
#[command(name = "curatorctl")]
#[command(about = "Administrative CLI for curator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClientConfigArgs {
    /// Client config file path
    #[arg(long, env = "CURATOR_CLIENT_CONFIG")]
    client_config: Option<String>,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL (overrides client config)
    #[arg(long)]
    server: Option<String>,

    /// Admin token (overrides client config)
    #[arg(long)]
    token: Option<String>,

    /// Profile to use from client config (default: default_profile)
    #[arg(long)]
    profile: Option<String>,

    #[command(flatten)]
    client: ClientConfigArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep a namespace for orphaned assets (preview unless --commit)
    Reconcile {
        /// Namespace (storage folder) to sweep
        namespace: String,
        /// Narrow the reference scan to one entity type
        #[arg(long)]
        entity_type: Option<String>,
        /// Delete orphans instead of only reporting them
        #[arg(long)]
        commit: bool,
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Show recent sweep runs
    Runs {
        /// Only runs of this namespace
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Content record commands
    Record {
        #[command(subcommand)]
        command: RecordCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Asset commands
    Asset {
        #[command(subcommand)]
        command: AssetCommands,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check server health and version
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Save a server profile locally after verifying the token
    Login {
        /// Profile name
        alias: String,
        /// Server URL (http:// or https://)
        url: String,
        /// Admin token
        #[arg(long, conflicts_with = "token_stdin")]
        token: Option<String>,
        /// Read the admin token from stdin
        #[arg(long)]
        token_stdin: bool,
        /// Make this the default profile
        #[arg(long)]
        set_default: bool,
        #[command(flatten)]
        client: ClientConfigArgs,
    },
    /// Select the default profile
    Use {
        alias: String,
        #[command(flatten)]
        client: ClientConfigArgs,
    },
}

#[derive(Subcommand)]
enum RecordCommands {
    /// List records of an entity type
    List {
        entity_type: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Print one record as JSON
    Get { entity_type: String, id: String },
    /// Delete a record and release the assets it references
    Delete {
        entity_type: String,
        id: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AssetCommands {
    /// Upload a file and link it into a record field
    Upload {
        entity_type: String,
        id: String,
        field: String,
        /// File to upload
        file: PathBuf,
        /// Target namespace for fields without a fixed one
        #[arg(long)]
        namespace: Option<String>,
        /// Item index for list fields
        #[arg(long)]
        index: Option<usize>,
        /// Content type sent with the upload
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Clear a reference from a record field and delete its blob
    Unlink {
        entity_type: String,
        id: String,
        field: String,
        /// Key or public URL held by the field
        key: String,
        #[arg(long)]
        index: Option<usize>,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Reconcile {
            namespace,
            entity_type,
            commit,
            json,
            api,
        } => handle_reconcile_command(namespace, entity_type, commit, json, &api).await,
        Commands::Runs {
            namespace,
            limit,
            api,
        } => handle_runs_command(namespace.as_deref(), limit, &api).await,
        Commands::Record { command, api } => handle_record_command(command, &api).await,
        Commands::Asset { command, api } => handle_asset_command(command, &api).await,
        Commands::Health { api } => handle_health_command(&api).await,
        Commands::Login {
            alias,
            url,
            token,
            token_stdin,
            set_default,
            client,
        } => handle_login_command(&alias, &url, token, token_stdin, set_default, &client).await,
        Commands::Use { alias, client } => handle_use_command(&alias, &client).await,
    }
}

async fn resolve_api_config(api: &ApiArgs) -> Result<(String, String)> {
    match (&api.server, &api.token) {
        (Some(server), Some(token)) => return Ok((server.clone(), token.clone())),
        (Some(_), None) | (None, Some(_)) => {
            anyhow::bail!("missing paired flag: use both --server and --token");
        }
        (None, None) => {}
    }

    let server_env = std::env::var("CURATOR_SERVER").ok();
    let token_env = std::env::var("CURATOR_TOKEN").ok();

    match (server_env, token_env) {
        (Some(server), Some(token)) => return Ok((server, token)),
        (Some(_), None) | (None, Some(_)) => {
            anyhow::bail!("missing paired env var: set both CURATOR_SERVER and CURATOR_TOKEN");
        }
        (None, None) => {}
    }

    let config_path = client_config_path(api.client.client_config.as_deref())?;
    let config = load_client_config(&config_path).await?;

    let profile_name = api
        .profile
        .as_ref()
        .or(config.default_profile.as_ref())
        .ok_or_else(|| anyhow::anyhow!("no profile specified and no default_profile set"))?;

    let profile = config
        .profiles
        .get(profile_name)
        .ok_or_else(|| anyhow::anyhow!("profile '{}' not found in client config", profile_name))?;

    Ok((profile.server.clone(), profile.token.clone()))
}

async fn get_api_client(api: &ApiArgs) -> Result<ApiClient> {
    let (server, token) = resolve_api_config(api).await?;
    let base_url = normalize_base_url(&server)?;
    ApiClient::new(&base_url, &token)
}

async fn handle_reconcile_command(
    namespace: String,
    entity_type: Option<String>,
    commit: bool,
    json: bool,
    api: &ApiArgs,
) -> Result<()> {
    let client = get_api_client(api).await?;
    let report = client
        .reconcile(&ReconcileRequest {
            namespace: namespace.clone(),
            entity_type,
            confirm: commit,
        })
        .await
        .with_context(|| format!("reconcile of '{namespace}' failed"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    match report.status.as_str() {
        "completed" => Ok(()),
        "partial_failure" => anyhow::bail!(
            "{} orphan(s) could not be deleted; re-run to retry",
            report.errors.len()
        ),
        other => anyhow::bail!("sweep stopped early ({other}); re-run to finish"),
    }
}

fn print_report(report: &SweepReport) {
    let committed = report.mode == "commit";
    println!(
        "Sweep of '{}' ({}) {}",
        report.namespace, report.mode, report.status
    );
    println!("  Run ID: {}", report.run_id);
    if let Some(filter) = &report.entity_filter {
        println!("  Entity filter: {filter}");
    }
    println!("  Grace window: {}s", report.grace_window_secs);
    println!("  Found: {}", report.found);
    println!("  Referenced: {}", report.referenced);
    println!("  Candidates: {}", report.candidates);
    if committed {
        print_keys("Deleted", &report.deleted);
    } else {
        print_keys("Would delete", &report.would_delete);
    }
    print_keys("Skipped (grace)", &report.skipped_grace);
    print_keys("Skipped (unknown age)", &report.skipped_unknown);
    println!("  Errors: {}", report.errors.len());
    for error in &report.errors {
        match &error.key {
            Some(key) => println!("    {key}: {}", error.message),
            None => println!("    {}", error.message),
        }
    }
    if !committed && !report.would_delete.is_empty() {
        println!("\nRe-run with --commit to delete.");
    }
}

fn print_keys(label: &str, keys: &[String]) {
    println!("  {label}: {}", keys.len());
    for key in keys.iter().take(LIST_PREVIEW) {
        println!("    {key}");
    }
    if keys.len() > LIST_PREVIEW {
        println!("    ... and {} more", keys.len() - LIST_PREVIEW);
    }
}

async fn handle_runs_command(
    namespace: Option<&str>,
    limit: Option<u32>,
    api: &ApiArgs,
) -> Result<()> {
    let client = get_api_client(api).await?;
    let runs = client.list_runs(namespace, limit).await?;
    if runs.is_empty() {
        println!("No sweep runs found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<16} {:<8} {:<10} {:<8} Started",
        "ID", "Namespace", "Mode", "State", "Deleted"
    );
    println!("{}", "-".repeat(104));
    for run in &runs {
        println!(
            "{:<38} {:<16} {:<8} {:<10} {:<8} {}",
            run.run_id,
            run.namespace,
            run.mode,
            run.state,
            deleted_count(run),
            run.started_at
        );
        if let Some(error) = &run.error {
            println!("    error: {error}");
        }
    }
    Ok(())
}

fn deleted_count(run: &SweepRun) -> String {
    match &run.report {
        Some(report) if report.mode == "commit" => report.deleted.len().to_string(),
        Some(report) => format!("({})", report.would_delete.len()),
        None => "-".to_string(),
    }
}

async fn handle_record_command(command: RecordCommands, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;

    match command {
        RecordCommands::List {
            entity_type,
            limit,
            offset,
        } => {
            let response = client.list_records(&entity_type, limit, offset).await?;
            if response.records.is_empty() {
                println!("No {} records found.", response.entity_type);
            }
            for record in response.records {
                println!(
                    "{:<40} v{:<5} updated {}",
                    record.id, record.version, record.updated_at
                );
            }
        }
        RecordCommands::Get { entity_type, id } => {
            let record = client.get_record(&entity_type, &id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        RecordCommands::Delete {
            entity_type,
            id,
            yes,
        } => {
            if !yes {
                anyhow::bail!("deleting {entity_type}/{id} also deletes its assets; pass --yes");
            }
            let response = client.delete_record(&entity_type, &id).await?;
            println!("Deleted {entity_type}/{id}");
            println!("  Assets released: {}", response.assets.released.len());
            if !response.assets.retained_shared.is_empty() {
                println!(
                    "  Kept (still referenced elsewhere): {}",
                    response.assets.retained_shared.len()
                );
            }
            if !response.assets.failed.is_empty() {
                eprintln!(
                    "Warning: {} asset(s) could not be deleted; the next sweep will reclaim them.",
                    response.assets.failed.len()
                );
            }
        }
    }
    Ok(())
}

async fn handle_asset_command(command: AssetCommands, api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;

    match command {
        AssetCommands::Upload {
            entity_type,
            id,
            field,
            file,
            namespace,
            index,
            content_type,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow::anyhow!("{} is not a file", file.display()))?;

            let target = AssetTarget {
                entity_type: &entity_type,
                id: &id,
                field: &field,
                index,
            };
            let response = client
                .upload_asset(
                    &target,
                    AssetUpload {
                        filename,
                        data,
                        content_type,
                        namespace,
                    },
                )
                .await?;

            println!("Uploaded {}", response.key);
            println!("  URL: {}", response.url);
            if let Some(replaced) = &response.replaced {
                if response.released {
                    println!("  Replaced and deleted: {replaced}");
                } else {
                    println!("  Replaced (kept): {replaced}");
                }
            }
        }
        AssetCommands::Unlink {
            entity_type,
            id,
            field,
            key,
            index,
            yes,
        } => {
            if !yes {
                anyhow::bail!("unlinking deletes the stored file; pass --yes");
            }
            let target = AssetTarget {
                entity_type: &entity_type,
                id: &id,
                field: &field,
                index,
            };
            let response = client.unlink_asset(&target, &key).await?;
            println!("Unlinked {}", response.key);
            match response.blob.reason {
                Some(reason) => println!("  Blob: {} ({reason})", response.blob.status),
                None => println!("  Blob: {}", response.blob.status),
            }
        }
    }
    Ok(())
}

async fn handle_health_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api).await?;
    let health = client.health().await.context("health request failed")?;

    println!("Status: {}", health.status);
    println!("Storage: {}", health.storage_backend);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
struct ClientConfig {
    default_profile: Option<String>,
    profiles: BTreeMap<String, Profile>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
struct Profile {
    server: String,
    token: String,
}

async fn handle_login_command(
    alias: &str,
    url: &str,
    token: Option<String>,
    token_stdin: bool,
    set_default: bool,
    client: &ClientConfigArgs,
) -> Result<()> {
    let token = read_token(token, token_stdin)?;
    let base_url = normalize_base_url(url)?;
    let config_path = client_config_path(client.client_config.as_deref())?;

    // An admin-only listing proves the token before it is saved.
    let api = ApiClient::new(&base_url, &token)?;
    api.list_runs(None, Some(1))
        .await
        .context("token verification failed")?;

    let mut config = load_client_config(&config_path).await?;
    config.profiles.insert(
        alias.to_string(),
        Profile {
            server: base_url.clone(),
            token,
        },
    );
    if set_default || config.default_profile.is_none() {
        config.default_profile = Some(alias.to_string());
    }

    save_client_config(&config_path, &config).await?;

    println!("Logged in as '{alias}'");
    println!("  URL: {base_url}");
    println!("Client config: {}", config_path.display());
    Ok(())
}

async fn handle_use_command(alias: &str, client: &ClientConfigArgs) -> Result<()> {
    let config_path = client_config_path(client.client_config.as_deref())?;
    let mut config = load_client_config(&config_path).await?;

    if !config.profiles.contains_key(alias) {
        anyhow::bail!("unknown profile: {alias}");
    }
    config.default_profile = Some(alias.to_string());
    save_client_config(&config_path, &config).await?;

    println!("Selected profile: {alias}");
    Ok(())
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = std::env::var_os("CURATOR_CLIENT_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set CURATOR_CLIENT_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("curator").join("client.toml"))
}

async fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("CURATOR_").split("__"));

    match figment.extract() {
        Ok(config) => Ok(config),
        Err(_) if !path.exists() => Ok(ClientConfig::default()),
        Err(err) => Err(anyhow::anyhow!(err).context("failed to load client configuration")),
    }
}

async fn save_client_config(path: &Path, config: &ClientConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let contents = toml::to_string_pretty(config)?;

    tokio::fs::write(path, contents).await?;

    // The file holds admin tokens.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}

fn read_token(token: Option<String>, token_stdin: bool) -> Result<String> {
    if let Some(token) = token {
        return Ok(token);
    }
    if token_stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        let token = buf.trim().to_string();
        if token.is_empty() {
            anyhow::bail!("token read from stdin is empty");
        }
        return Ok(token);
    }
    anyhow::bail!("token required: use --token or --token-stdin");
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.trim_end_matches('/').to_string())
}
