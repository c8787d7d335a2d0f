//! Command-line interface for authgrant
//!
//! Operator tasks against a configured store: initialise keys, manage
//! clients, print discovery documents and sweep expired grants.

use crate::Result;
use crate::config::Config;
use crate::constants::*;
use crate::context::OpContext;
use crate::keys::KeyMaterial;
use crate::model::Client;
use crate::provider::OAuthProvider;
use crate::storage::clients::generate_client_secret;
use crate::storage::{ClientManager, Storage, create_storage_from_config};
use crate::sweep::{spawn_sweeper, sweep_expired};
use crate::{AuthGrantError, init_logging};
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Parse a comma-separated list from CLI arguments
fn parse_comma_list(matches: &ArgMatches, key: &str) -> Vec<String> {
    matches
        .get_one::<String>(key)
        .map(|s| {
            s.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Print JSON output")
}

fn build_cli() -> Command {
    Command::new("authgrant")
        .about("OAuth 2.0 / OpenID Connect grant storage and token service")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .default_value(CONFIG_FILE_NAME)
                .help("Path to the JSON or YAML configuration file"),
        )
        .subcommand(
            Command::new("init")
                .about("Write a default configuration and create the signing keys")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing configuration file"),
                ),
        )
        .subcommand(
            Command::new("client")
                .about("Manage OAuth clients")
                .subcommand_required(true)
                .subcommand(
                    Command::new("create")
                        .about("Create a client")
                        .arg(Arg::new("name").long("name").required(true).help("Client name"))
                        .arg(
                            Arg::new("redirect-uris")
                                .long("redirect-uris")
                                .help("Comma-separated redirect URIs"),
                        )
                        .arg(
                            Arg::new("grant-types")
                                .long("grant-types")
                                .default_value("authorization_code,refresh_token")
                                .help("Comma-separated grant types"),
                        )
                        .arg(
                            Arg::new("scopes")
                                .long("scopes")
                                .help("Comma-separated allowed scopes"),
                        )
                        .arg(
                            Arg::new("public")
                                .long("public")
                                .action(ArgAction::SetTrue)
                                .help("Create a public client without a secret"),
                        )
                        .arg(json_flag()),
                )
                .subcommand(Command::new("list").about("List clients").arg(json_flag()))
                .subcommand(
                    Command::new("delete")
                        .about("Delete a client")
                        .arg(Arg::new("client-id").required(true)),
                ),
        )
        .subcommand(Command::new("jwks").about("Print the public signing keys"))
        .subcommand(Command::new("metadata").about("Print the OpenID provider metadata"))
        .subcommand(
            Command::new("sweep")
                .about("Delete expired grants once")
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("sweeper").about("Sweep expired grants on the configured schedule"),
        )
}

/// Main CLI entry point
pub async fn run() -> Result<()> {
    let matches = build_cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| CONFIG_FILE_NAME.to_string());

    if let Some(("init", sub)) = matches.subcommand() {
        return handle_init(&config_path, sub.get_flag("force")).await;
    }

    let config = Config::load_from_path(&config_path)?;
    init_logging(config.log.as_ref());
    let storage = create_storage_from_config(&config.storage).await?;
    let ctx = OpContext::background();

    match matches.subcommand() {
        Some(("client", sub)) => handle_client_command(&ctx, &config, storage, sub).await,
        Some(("jwks", _)) => {
            let keys = KeyMaterial::load_or_generate(&ctx, storage.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&keys.jwks())?);
            Ok(())
        }
        Some(("metadata", _)) => {
            let provider = OAuthProvider::bootstrap(&ctx, &config, storage, None).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&provider.openid_configuration())?
            );
            Ok(())
        }
        Some(("sweep", sub)) => {
            let report = sweep_expired(storage.as_ref(), Utc::now()).await;
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Deleted {} expired grants", report.total_deleted());
                for (kind, count) in &report.deleted {
                    println!("  {:<16} {}", kind, count);
                }
                println!("Expired JTIs deleted: {}", report.jtis_deleted);
                if report.failures > 0 {
                    println!("Failures: {}", report.failures);
                }
            }
            Ok(())
        }
        Some(("sweeper", _)) => run_sweeper(&config, storage).await,
        _ => Err(AuthGrantError::config("no command specified, see --help")),
    }
}

async fn handle_init(config_path: &str, force: bool) -> Result<()> {
    let path = std::path::Path::new(config_path);
    let config = if path.exists() && !force {
        println!("Using existing configuration at {}", path.display());
        Config::load_from_path(path)?
    } else {
        let config = Config::default();
        config.save_to_path(path)?;
        println!("Wrote default configuration to {}", path.display());
        config
    };
    init_logging(config.log.as_ref());

    if config.storage.driver == "sqlite"
        && let Some(parent) = std::path::Path::new(&config.storage.dsn).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let storage = create_storage_from_config(&config.storage).await?;
    let keys = KeyMaterial::load_or_generate(&OpContext::background(), storage.as_ref()).await?;
    println!("Signing key ready (kid {})", keys.kid());
    Ok(())
}

async fn handle_client_command(
    ctx: &OpContext,
    config: &Config,
    storage: Arc<dyn Storage>,
    matches: &ArgMatches,
) -> Result<()> {
    let hasher = crate::hasher::BcryptHasher::new(config.oauth.secret_hash_cost)?;
    let clients = ClientManager::new(
        storage,
        Arc::new(hasher),
        crate::storage::clients::RegistrationDefaults {
            scope: config.oauth.default_scope.clone(),
            access_token_strategy: config.oauth.access_token_strategy,
        },
    );

    match matches.subcommand() {
        Some(("create", sub)) => {
            let name = sub
                .get_one::<String>("name")
                .cloned()
                .unwrap_or_default();
            let public = sub.get_flag("public");
            let scopes = parse_comma_list(sub, "scopes");
            let secret = (!public).then(generate_client_secret);

            let client = Client {
                client_id: Uuid::new_v4().to_string(),
                client_name: name,
                client_secret: secret.clone(),
                redirect_uris: parse_comma_list(sub, "redirect-uris"),
                grant_types: parse_comma_list(sub, "grant-types"),
                response_types: vec![RESPONSE_TYPE_CODE.to_string()],
                scope: if scopes.is_empty() {
                    config.oauth.default_scope.clone()
                } else {
                    scopes.join(" ")
                },
                subject_type: "public".to_string(),
                token_endpoint_auth_method: if public {
                    AUTH_METHOD_NONE.to_string()
                } else {
                    AUTH_METHOD_CLIENT_SECRET_POST.to_string()
                },
                access_token_strategy: config.oauth.access_token_strategy.as_str().to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                ..Default::default()
            };
            let stored = clients.create_client(ctx, client).await?;

            if sub.get_flag("json") {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "client_id": stored.client_id,
                        "client_secret": secret,
                    }))?
                );
            } else {
                println!("OAuth client created");
                println!("Client ID:     {}", stored.client_id);
                if let Some(secret) = secret {
                    println!("Client Secret: {}", secret);
                    println!("The secret is not stored in plaintext and cannot be shown again.");
                }
            }
        }
        Some(("list", sub)) => {
            let listed: Vec<Client> = clients
                .list_clients(ctx)
                .await?
                .iter()
                .map(Client::without_secret)
                .collect();
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&listed)?);
            } else {
                println!("OAuth clients:");
                for client in listed {
                    println!(
                        "  {} ({}) [{}]",
                        client.client_name,
                        client.client_id,
                        client.grant_types.join(", ")
                    );
                }
            }
        }
        Some(("delete", sub)) => {
            let client_id = sub
                .get_one::<String>("client-id")
                .ok_or_else(|| AuthGrantError::config("client-id is required"))?;
            clients.get_client(ctx, client_id).await?;
            clients.delete_client(ctx, client_id).await?;
            println!("Client '{}' deleted", client_id);
        }
        _ => {}
    }
    Ok(())
}

async fn run_sweeper(config: &Config, storage: Arc<dyn Storage>) -> Result<()> {
    let sweep = config.get_sweep();
    if !sweep.enabled {
        return Err(AuthGrantError::config("sweeping is disabled in the configuration"));
    }
    let schedule: cron::Schedule = sweep.schedule.parse().map_err(|e| {
        AuthGrantError::config(format!("invalid sweep schedule '{}': {}", sweep.schedule, e))
    })?;

    let cancel = CancellationToken::new();
    let handle = spawn_sweeper(storage, schedule, cancel.clone());
    tracing::info!(schedule = %sweep.schedule, "Sweeper running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    handle
        .await
        .map_err(|e| AuthGrantError::config(format!("sweeper task failed: {}", e)))?;
    Ok(())
}
