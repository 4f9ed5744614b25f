use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vaults::{
    connect_messenger, connect_storage, ConnectionInfo, ConnectionType, Credentials, JsonAdapter,
    MessengerDriver, MessengerExt, Profile, ProfileStore, Provider,
};

/// Connect to storage and messaging backends from saved profiles
#[derive(Parser)]
#[command(name = "vaults", version)]
struct Cli {
    /// Profile store location (defaults to the local data directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage saved profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Connect with a profile (or environment variables) and report server info
    Ping {
        /// Profile name
        name: Option<String>,
        /// Read credentials from PREFIX_* environment variables instead
        #[arg(long, conflicts_with = "name")]
        env: Option<String>,
    },
    /// Publish a message through a broker profile
    Publish {
        name: String,
        channel: String,
        payload: String,
        /// Validate the payload as JSON and publish it in compact form
        #[arg(long)]
        json: bool,
    },
    /// Print messages arriving on a broker channel until interrupted
    Subscribe {
        name: String,
        channel: String,
        /// Decode payloads as JSON and pretty-print them
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Save a profile, replacing any profile with the same name
    Add {
        name: String,
        #[arg(long)]
        driver: String,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value = "")]
        database: String,
        #[arg(long, default_value = "")]
        username: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long)]
        ssl: bool,
        #[arg(long = "type", default_value = "local")]
        connection_type: ConnectionType,
        /// Extra backend property, e.g. --property uri=mongodb://...
        #[arg(long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
    /// List saved profiles
    List,
    /// Remove a saved profile
    Remove { name: String },
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vaults={}", level)));

    // try_init: a subscriber may already be installed
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

fn open_store(path: Option<PathBuf>) -> Result<ProfileStore> {
    match path {
        Some(path) => ProfileStore::open(path),
        None => ProfileStore::open_default(),
    }
}

fn print_info(backend: &str, info: &ConnectionInfo) {
    println!(
        "{}: {} ({} ms)",
        backend,
        info.server_version.as_deref().unwrap_or("unknown version"),
        info.latency_ms
    );
}

async fn ping(credentials: Credentials, connection_type: ConnectionType) -> Result<()> {
    let driver = credentials.driver().unwrap_or_default().to_string();

    if driver.parse::<MessengerDriver>().is_ok() {
        let messenger = connect_messenger(credentials, connection_type).await?;
        let result = messenger.ping().await;
        messenger.shutdown().await?;
        print_info(messenger.backend(), &result?);
    } else {
        let provider = connect_storage(credentials, connection_type).await?;
        let result = provider.ping().await;
        provider.shutdown().await?;
        print_info(provider.backend(), &result?);
    }
    Ok(())
}

fn require_profile(store: &ProfileStore, name: &str) -> Result<Profile> {
    store
        .get(name)?
        .with_context(|| format!("no profile named {:?}", name))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Profile { action } => {
            let store = open_store(cli.store)?;
            match action {
                ProfileAction::Add {
                    name,
                    driver,
                    host,
                    port,
                    database,
                    username,
                    password,
                    ssl,
                    connection_type,
                    properties,
                } => {
                    let port = match port {
                        Some(port) => port,
                        None => default_port(&driver)?,
                    };
                    let properties: BTreeMap<_, _> = properties.into_iter().collect();
                    let mut builder = Credentials::builder()
                        .hostname(host)
                        .port(port)
                        .database(database)
                        .username(username)
                        .password(password)
                        .ssl(ssl)
                        .driver(driver);
                    for (key, value) in properties {
                        builder = builder.property(key, value);
                    }

                    store.save(&Profile::new(&name, builder.build(), connection_type))?;
                    info!(profile = %name, "Profile saved");
                }
                ProfileAction::List => {
                    for profile in store.list()? {
                        let credentials = &profile.credentials;
                        println!(
                            "{}\t{}\t{}:{}/{}\t{}",
                            profile.name,
                            credentials.driver().unwrap_or("-"),
                            credentials.hostname(),
                            credentials.port(),
                            credentials.database(),
                            profile.connection_type
                        );
                    }
                }
                ProfileAction::Remove { name } => {
                    if !store.delete(&name)? {
                        bail!("no profile named {:?}", name);
                    }
                }
            }
        }
        Commands::Ping { name, env } => match (name, env) {
            (_, Some(prefix)) => {
                let credentials = Credentials::from_env(&prefix)?;
                ping(credentials, ConnectionType::Local).await?;
            }
            (Some(name), None) => {
                let profile = require_profile(&open_store(cli.store)?, &name)?;
                ping(profile.credentials, profile.connection_type).await?;
            }
            (None, None) => bail!("give a profile name or --env PREFIX"),
        },
        Commands::Publish {
            name,
            channel,
            payload,
            json,
        } => {
            let profile = require_profile(&open_store(cli.store)?, &name)?;
            let messenger = connect_messenger(profile.credentials, profile.connection_type).await?;
            let result = if json {
                let value: serde_json::Value = JsonAdapter.deserialize(&payload)?;
                messenger.publish_json(&channel, &value).await
            } else {
                messenger.publish(&channel, &payload).await
            };
            messenger.shutdown().await?;
            println!("delivered to {} subscriber(s)", result?);
        }
        Commands::Subscribe {
            name,
            channel,
            json,
        } => {
            let profile = require_profile(&open_store(cli.store)?, &name)?;
            let messenger = connect_messenger(profile.credentials, profile.connection_type).await?;
            let mut subscription = messenger.subscribe(&channel).await?;
            info!(channel = subscription.channel(), "Waiting for messages");

            if json {
                while let Some(value) = subscription.next_json::<serde_json::Value>().await {
                    match value {
                        Ok(value) => println!("{}", JsonAdapter.serialize_pretty(&value)?),
                        Err(e) => warn!(error = %e, "Skipping non-JSON message"),
                    }
                }
            } else {
                while let Some(message) = subscription.next().await {
                    println!("[{}] {}", message.channel, message.payload);
                }
            }
            messenger.shutdown().await?;
        }
    }

    Ok(())
}

fn default_port(driver: &str) -> Result<u16> {
    if let Ok(driver) = driver.parse::<vaults::StorageDriver>() {
        return Ok(driver.default_port());
    }
    if let Ok(driver) = driver.parse::<MessengerDriver>() {
        return Ok(driver.default_port());
    }
    bail!("unknown driver {:?}", driver)
}
