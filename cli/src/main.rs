// meshbase — command-line node for replicated mesh bases
//
// Keeps a local mesh base in a sled database, edits its objects, and
// replicates them with partners over TCP.

mod config;
mod node;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use meshbase_core::{
    EntityTypeId, LoopbackNetwork, NetMeshBase, NetMeshBaseIdentifier, NetMeshObject, NetMeshObjectIdentifier,
    PropertyTypeId, PropertyValue, SimpleModelBase, TcpNetwork,
};
use node::Node;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::warn;

/// Time given to writer tasks to drain before an offline command exits.
const SEND_GRACE: Duration = Duration::from_millis(300);

#[derive(Parser)]
#[command(name = "meshbase")]
#[command(about = "Replicated object graphs between mesh bases", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the local mesh base
    Init {
        /// Identifier of the mesh base, e.g. tcp://127.0.0.1:7420
        #[arg(short, long)]
        identifier: Option<String>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Create an object
    Create {
        /// Entity types to bless the object with
        #[arg(short = 't', long = "type")]
        types: Vec<String>,
        /// Local id; a random one is generated otherwise
        #[arg(long)]
        id: Option<String>,
        /// Initial property values as key=value
        #[arg(short, long = "property", value_parser = parse_assignment)]
        properties: Vec<(String, String)>,
    },
    /// Set a property of an object whose lock is held here
    Set {
        object: String,
        property: String,
        value: String,
    },
    /// Show one object
    Show { object: String },
    /// List all objects
    Objects,
    /// List proxies towards partner mesh bases
    Proxies,
    /// Run a TCP node until Ctrl-C
    Serve {
        /// Seconds between freshening rounds
        #[arg(short, long, default_value = "5")]
        freshen_interval: u64,
    },
    /// Obtain a replica from a partner
    Fetch {
        /// External form of the object, e.g. tcp://10.0.0.2:7420#note
        object: String,
        /// Also obtain the lock
        #[arg(long)]
        lock: bool,
        /// Seconds to wait for the partner
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
    /// Replicate an object between two in-process mesh bases
    Demo,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Add a peer whose home object `serve` replicates
    AddPeer { identifier: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { identifier } => cmd_init(config, identifier).await,
        Commands::Config { action } => cmd_config(config, action).await,
        Commands::Create { types, id, properties } => cmd_create(config, types, id, properties).await,
        Commands::Set { object, property, value } => cmd_set(config, object, property, value).await,
        Commands::Show { object } => cmd_show(config, object).await,
        Commands::Objects => cmd_objects(config).await,
        Commands::Proxies => cmd_proxies(config).await,
        Commands::Serve { freshen_interval } => cmd_serve(config, freshen_interval).await,
        Commands::Fetch { object, lock, timeout } => cmd_fetch(config, object, lock, timeout).await,
        Commands::Demo => cmd_demo().await,
    }
}

async fn cmd_init(mut config: config::Config, identifier: Option<String>) -> Result<()> {
    println!("{}", "Initializing mesh base...".bold());
    println!();

    if let Some(identifier) = identifier {
        config.set("identifier", &identifier)?;
    }
    config.save()?;
    println!("  {} Configuration: {}", "✓".green(), config::Config::config_file()?.display());

    let storage = config.storage_dir()?;
    let node = Node::open(&config, None)?;
    println!("  {} Storage: {}", "✓".green(), storage.display());
    println!("  {} Home object: {}", "✓".green(), node.base.home_object().identifier().to_string().bright_cyan());
    if config.passphrase.is_some() {
        println!("  {} Storage is encrypted", "✓".green());
    }
    node.close()?;
    println!();

    println!("{}", "Next steps:".bold());
    println!("  • Create an object: {}", "meshbase create --type cli/Note -p cli/Note_Text=hello".bright_green());
    println!("  • Serve it:         {}", "meshbase serve".bright_green());
    println!("  • From a partner:   {}", "meshbase fetch <identifier>#<local-id>".bright_green());

    Ok(())
}

async fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None => println!("{} {}", key.bright_cyan(), "(not set)".dimmed()),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<16} {}", key.bright_cyan(), value);
            }
            println!();
            println!("{}", "Peers:".bold());
            if config.peers.is_empty() {
                println!("  {}", "(none configured)".dimmed());
            } else {
                for (i, peer) in config.peers.iter().enumerate() {
                    println!("  {}. {}", i + 1, peer);
                }
            }
            println!();
            println!("{}", "Types:".bold());
            for (entity_type, properties) in &config.types {
                println!("  {} {}", entity_type.bright_cyan(), properties.join(", ").dimmed());
            }
        }
        ConfigAction::AddPeer { identifier } => {
            let peer = NetMeshBaseIdentifier::guess_from_external_form(&identifier)
                .context("Invalid mesh base identifier")?;
            config.add_peer(peer.to_external_form())?;
            config.save()?;
            println!("{} Added peer: {}", "✓".green(), peer);
        }
    }

    Ok(())
}

async fn cmd_create(
    config: config::Config,
    types: Vec<String>,
    id: Option<String>,
    properties: Vec<(String, String)>,
) -> Result<()> {
    let types = if types.is_empty() { vec!["cli/Note".to_string()] } else { types };
    let types: Vec<EntityTypeId> = types.iter().map(|t| EntityTypeId::new(t.as_str())).collect();

    let node = open_offline(&config)?;
    let base = &node.base;
    let mut tx = base.create_transaction().context("Mesh base is busy")?;
    let object = match id {
        Some(local) => {
            let id = base.identifier_factory().create_identifier_from(&local)?;
            tx.create_object_with_id(id, &types)
        }
        None => tx.create_object(&types),
    }
    .context("Failed to create object")?;
    for (property, value) in properties {
        tx.set_property(&object, &PropertyTypeId::new(property.as_str()), PropertyValue::String(value))
            .with_context(|| format!("Failed to set {}", property))?;
    }
    tx.commit().context("Failed to commit")?;

    println!("{} Created {}", "✓".green(), object.identifier().to_string().bright_cyan());
    drop(object);
    close_offline(node).await
}

async fn cmd_set(config: config::Config, object: String, property: String, value: String) -> Result<()> {
    let node = open_offline(&config)?;
    let object = find(&node.base, &object)?;

    let mut tx = node.base.create_transaction().context("Mesh base is busy")?;
    tx.set_property(&object, &PropertyTypeId::new(property.as_str()), PropertyValue::String(value.clone()))
        .with_context(|| {
            if object.has_lock() {
                format!("Failed to set {}", property)
            } else {
                format!("Lock of {} is not held here; try `meshbase fetch --lock`", object.identifier())
            }
        })?;
    tx.commit().context("Failed to commit")?;

    println!("{} {} {} = {}", "✓".green(), object.identifier().to_string().bright_cyan(), property, value);
    let replicas = object.proxy_partners();
    if !replicas.is_empty() {
        println!("  Propagated to {} partner(s)", replicas.len());
    }
    drop(object);
    close_offline(node).await
}

async fn cmd_show(config: config::Config, object: String) -> Result<()> {
    let node = Node::open(&config, None)?;
    let object = find(&node.base, &object)?;
    print_object(&object);
    drop(object);
    node.close()
}

async fn cmd_objects(config: config::Config) -> Result<()> {
    let node = Node::open(&config, None)?;
    let objects = node.base.objects()?;

    println!("{} ({} total)", "Objects".bold(), objects.len());
    println!();
    for object in &objects {
        let types: Vec<String> = object.entity_types().iter().map(|t| t.to_string()).collect();
        let marker = if object.has_lock() { "●".bright_green() } else { "○".yellow() };
        println!("  {} {}", marker, object.identifier().to_string().bright_cyan());
        if !types.is_empty() {
            println!("    {}", types.join(", ").dimmed());
        }
    }
    drop(objects);
    node.close()
}

async fn cmd_proxies(config: config::Config) -> Result<()> {
    let node = Node::open(&config, None)?;
    let proxies = node.base.proxies();

    if proxies.is_empty() {
        println!("{}", "No partners yet.".dimmed());
    } else {
        println!("{} ({} total)", "Proxies".bold(), proxies.len());
        println!();
        for proxy in &proxies {
            println!("  {} {}", "•".bright_green(), proxy.partner().to_string().bright_cyan());
            println!("    Role:      {}", proxy.role());
            println!("    Coherence: {}", proxy.coherence());
            println!("    Locks:     {}", if proxy.lock_held() { "some held by partner" } else { "none across" });
            println!("    Homes:     {} across", proxy.homes_across().len());
            let awaiting = proxy.awaiting_objects();
            if !awaiting.is_empty() {
                println!("    Awaiting:  {}", awaiting.len().to_string().yellow());
            }
            println!("    Updated:   {}", format_timestamp(proxy.time_updated()));
        }
    }
    drop(proxies);
    node.close()
}

async fn cmd_serve(config: config::Config, freshen_interval: u64) -> Result<()> {
    let (network, identifier) = listen(&config).await?;
    let node = Node::open(&config, Some(Arc::new(network)))?;

    println!("{}", "meshbase — Serving".bold());
    println!();
    println!("{} Listening as {}", "✓".green(), identifier.to_string().bright_cyan());
    println!("{} {} stored objects", "✓".green(), node.base.size()?);

    for peer in &config.peers {
        let peer = match NetMeshBaseIdentifier::guess_from_external_form(peer) {
            Ok(peer) => peer,
            Err(e) => {
                warn!("Skipping peer {}: {}", peer, e);
                continue;
            }
        };
        if let Err(e) = node.base.obtain_replica(&NetMeshObjectIdentifier::home(peer.clone())) {
            warn!("Cannot replicate home object of {}: {}", peer, e);
        } else {
            println!("{} Replicating home object of {}", "✓".green(), peer);
        }
    }
    println!();
    println!("Press Ctrl-C to stop.");

    let mut ticker = tokio::time::interval(Duration::from_secs(freshen_interval.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let base = node.base.clone();
                let freshened = tokio::task::spawn_blocking(move || {
                    let freshened = base.freshen_due_replicas(meshbase_core::now_millis());
                    base.purge_reclaimed();
                    freshened
                })
                .await
                .context("Freshen task failed")?;
                if freshened > 0 {
                    println!("{} Freshened {} replica(s)", "↻".bright_blue(), freshened);
                }
            }
        }
    }

    println!("Shutting down...");
    node.close()
}

async fn cmd_fetch(config: config::Config, object: String, lock: bool, timeout: u64) -> Result<()> {
    let (network, _) = listen(&config).await?;
    let node = Node::open(&config, Some(Arc::new(network)))?;
    let id = node
        .base
        .identifier_factory()
        .guess_from_external_form(&object)
        .with_context(|| format!("Invalid object identifier: {}", object))?;
    if id.mesh_base() == node.base.identifier() {
        anyhow::bail!("{} is a local object", id);
    }
    let timeout = Duration::from_secs(timeout);

    node.base.obtain_replica(&id).context("Failed to request replica")?;
    let base = node.base.clone();
    let found = wait_for(timeout, || base.find(&id).is_some()).await;
    let Some(replica) = found.then(|| node.base.find(&id)).flatten() else {
        node.close()?;
        anyhow::bail!("No replica of {} arrived within {:?}", id, timeout);
    };
    println!("{} Obtained {}", "✓".green(), id.to_string().bright_cyan());

    if lock && !replica.has_lock() {
        node.base.try_to_obtain_locks(&[replica.clone()]).context("Failed to request lock")?;
        if wait_for(timeout, || replica.has_lock()).await {
            println!("{} Lock obtained", "✓".green());
        } else {
            println!("{} Lock not granted within {:?}", "✗".red(), timeout);
        }
    }

    println!();
    print_object(&replica);
    drop(replica);
    node.close()
}

async fn cmd_demo() -> Result<()> {
    println!("{}", "Replication demo (in-process)".bold());
    println!();

    let network = LoopbackNetwork::new();
    let model = Arc::new(node::model_from(&config::Config::default()));
    let alice = demo_base(&network, &model, "loop://alice")?;
    let bob = demo_base(&network, &model, "loop://bob")?;
    let text = PropertyTypeId::new("cli/Note_Text");

    let mut tx = alice.create_transaction()?;
    let id = alice.identifier_factory().create_identifier_from("note")?;
    let note = tx.create_object_with_id(id.clone(), &["cli/Note".into()])?;
    tx.set_property(&note, &text, PropertyValue::String("written by alice".into()))?;
    tx.commit()?;
    println!("{} alice created {}", "✓".green(), id.to_string().bright_cyan());

    bob.obtain_replica(&id)?;
    let delivered = network.deliver_all();
    let replica = bob.find(&id).context("bob did not receive the replica")?;
    println!("{} bob obtained a replica ({} messages)", "✓".green(), delivered);
    anyhow::ensure!(!replica.has_lock(), "replica must not hold the lock");

    bob.try_to_obtain_locks(&[replica.clone()])?;
    network.deliver_all();
    anyhow::ensure!(replica.has_lock() && !note.has_lock(), "lock did not move to bob");
    println!("{} lock moved to bob", "✓".green());

    let mut tx = bob.create_transaction()?;
    tx.set_property(&replica, &text, PropertyValue::String("edited by bob".into()))?;
    tx.commit()?;
    network.deliver_all();
    anyhow::ensure!(
        note.property_value(&text) == Some(PropertyValue::String("edited by bob".into())),
        "alice did not see bob's change"
    );
    println!("{} bob's change reached alice", "✓".green());

    println!();
    print_object(&note);
    println!();
    println!("{}", "Demo complete!".green().bold());
    Ok(())
}

fn demo_base(network: &LoopbackNetwork, model: &Arc<SimpleModelBase>, raw: &str) -> Result<Arc<NetMeshBase>> {
    let identifier = NetMeshBaseIdentifier::from_external_form(raw)?;
    NetMeshBase::builder(identifier)
        .model(model.clone())
        .endpoint_factory(Arc::new(network.clone()))
        .build()
        .context("Failed to build demo mesh base")
}

/// Binds the listener named by the configured identifier.
async fn listen(config: &config::Config) -> Result<(TcpNetwork, NetMeshBaseIdentifier)> {
    let identifier = config.mesh_base_identifier()?;
    let address = TcpNetwork::address_of(&identifier)
        .with_context(|| format!("{} is not a tcp:// identifier", identifier))?;
    let network = TcpNetwork::new(Handle::current());
    let bound = network
        .bind(&address)
        .await
        .with_context(|| format!("Failed to listen on {}", address))?;
    if bound != identifier {
        warn!("Listening as {} but partners know this node as {}", bound, identifier);
    }
    Ok((network, identifier))
}

/// Opens the node with a TCP network that can send but does not listen.
fn open_offline(config: &config::Config) -> Result<Node> {
    Node::open(config, Some(Arc::new(TcpNetwork::new(Handle::current()))))
}

async fn close_offline(node: Node) -> Result<()> {
    tokio::time::sleep(SEND_GRACE).await;
    node.close()
}

fn find(base: &NetMeshBase, raw: &str) -> Result<Arc<NetMeshObject>> {
    let id = base
        .identifier_factory()
        .guess_from_external_form(raw)
        .with_context(|| format!("Invalid object identifier: {}", raw))?;
    base.find(&id).with_context(|| format!("Object not found: {}", id))
}

async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}

fn print_object(object: &NetMeshObject) {
    println!("{}", object.identifier().to_string().bold());
    let types: Vec<String> = object.entity_types().iter().map(|t| t.to_string()).collect();
    println!("  Types:      {}", if types.is_empty() { "(none)".to_string() } else { types.join(", ") });

    let properties = object.properties();
    if !properties.is_empty() {
        println!("  Properties:");
        for (property, value) in properties {
            println!("    {:<20} {}", property.to_string().bright_cyan(), format_value(&value));
        }
    }

    let neighbors = object.neighbors();
    if !neighbors.is_empty() {
        println!("  Neighbors:");
        for neighbor in neighbors {
            let roles: Vec<String> = neighbor.role_types.iter().map(|r| r.to_string()).collect();
            println!("    {} {}", neighbor.identifier, roles.join(", ").dimmed());
        }
    }
    for equivalent in object.equivalents() {
        println!("  Equivalent: {}", equivalent);
    }

    let lock = match object.proxy_towards_lock() {
        None => "held here".green().to_string(),
        Some(proxy) => format!("towards {}", proxy.partner()),
    };
    let home = match object.proxy_towards_home() {
        None => "here".green().to_string(),
        Some(proxy) => format!("towards {}", proxy.partner()),
    };
    println!("  Lock:       {}", lock);
    println!("  Home:       {}", home);
    let partners: Vec<String> = object.proxy_partners().iter().map(|p| p.to_string()).collect();
    if !partners.is_empty() {
        println!("  Replicas:   {}", partners.join(", "));
    }
    println!("  Created:    {}", format_timestamp(object.time_created()));
    println!("  Updated:    {}", format_timestamp(object.time_updated()));
}

fn format_value(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Blob { mime_type, data } => {
            let shown = &data[..data.len().min(16)];
            let ellipsis = if data.len() > shown.len() { "…" } else { "" };
            format!("<{}> {}{}", mime_type, hex::encode(shown), ellipsis)
        }
        PropertyValue::Timestamp(millis) => format_timestamp(*millis),
        other => other.to_string(),
    }
}

fn format_timestamp(millis: i64) -> String {
    use chrono::{DateTime, Local, Utc};

    if millis <= 0 {
        return "-".to_string();
    }
    let dt = DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now);
    let local: DateTime<Local> = dt.into();

    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("cli/Note_Text=a=b").unwrap(),
            ("cli/Note_Text".to_string(), "a=b".to_string())
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_format_value_blob() {
        let value = PropertyValue::Blob {
            mime_type: "application/octet-stream".into(),
            data: vec![0xde, 0xad],
        };
        assert_eq!(format_value(&value), "<application/octet-stream> dead");
    }

    #[test]
    fn test_format_timestamp_unset() {
        assert_eq!(format_timestamp(0), "-");
    }

    #[tokio::test]
    async fn test_demo_runs() {
        cmd_demo().await.unwrap();
    }
}
