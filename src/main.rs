use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod archive;
mod cache;
mod config;
mod error;
mod events;
mod mutate;
mod node;
mod sync;
mod tree;
mod tui;
mod watch;

use api::RestClient;
use cache::LocalStore;
use config::Config;
use events::{ActionRequest, EventBus};
use sync::SyncEngine;

#[derive(Parser)]
#[command(name = "cabinet")]
#[command(about = "Offline-first file manager client", long_about = None)]
struct Cli {
    /// Force offline mode for this invocation
    #[arg(long, global = true)]
    offline: bool,

    /// Server URL (overrides the configured one)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the access token
    Login { email: String },
    /// Print the full folder tree
    Tree,
    /// List the children of a folder (or the roots)
    Ls { folder_id: Option<String> },
    /// Create a folder
    Mkdir {
        name: String,
        /// Parent folder id; omit for the root
        #[arg(long)]
        parent: Option<String>,
    },
    /// Upload a local file into a folder
    Upload {
        file: PathBuf,
        #[arg(long)]
        parent: String,
    },
    /// Rename a node; the old name goes into its version history
    Rename { id: String, new_name: String },
    /// Delete nodes together with all their descendants
    Rm { ids: Vec<String> },
    /// Move a node into another folder
    Mv { id: String, dest: String },
    /// Copy a node into another folder
    Cp { id: String, dest: String },
    /// Replace a node's tags
    Tag { id: String, tags: Vec<String> },
    /// Compress a file into a sibling zip node
    Compress { id: String, name: String },
    /// Restore the previous name from version history
    Revert { id: String },
    /// Write a file node's content to a local file
    Export {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replay queued changes, then refresh from server truth
    Sync,
    /// Leave offline mode and replay queued changes
    Online,
    /// Enter offline mode: mutations queue locally
    Offline,
    /// Show connection, cache and queue state
    Status,
    /// Interactive tree browser
    Browse,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cabinet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(server) = &cli.server {
        config.server_url = Some(server.clone());
    }

    // Mode switches only touch the config
    match &cli.command {
        Commands::Login { email } => {
            return login(&config, email).await;
        }
        Commands::Offline => {
            config.offline = true;
            config.save()?;
            println!("offline: changes will queue locally");
            return Ok(());
        }
        _ => {}
    }

    let remote = RestClient::new(config.server_url(), config.token.clone());
    let store = LocalStore::open_default()?;
    let online = !(config.offline || cli.offline) || matches!(cli.command, Commands::Sync);
    let mut engine = SyncEngine::new(remote, store, online);

    match cli.command {
        Commands::Login { .. } | Commands::Offline => unreachable!(),
        Commands::Tree => print_tree(&engine).await?,
        Commands::Ls { folder_id } => list(&engine, folder_id.as_deref()).await?,
        Commands::Mkdir { name, parent } => {
            perform(&engine, ActionRequest::Create { name, parent_id: parent }).await?
        }
        Commands::Upload { file, parent } => {
            let bytes = std::fs::read(&file)?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "file".to_string());
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            perform(
                &engine,
                ActionRequest::Upload {
                    parent_id: parent,
                    name,
                    size_bytes: bytes.len() as u64,
                    kind: None,
                    content: Some(STANDARD.encode(&bytes)),
                },
            )
            .await?
        }
        Commands::Rename { id, new_name } => {
            perform(&engine, ActionRequest::Rename { id, new_name }).await?
        }
        Commands::Rm { ids } => perform(&engine, ActionRequest::Delete { ids }).await?,
        Commands::Mv { id, dest } => {
            perform(&engine, ActionRequest::Move { id, dest_id: dest }).await?
        }
        Commands::Cp { id, dest } => {
            perform(&engine, ActionRequest::Copy { id, dest_id: dest }).await?
        }
        Commands::Tag { id, tags } => perform(&engine, ActionRequest::Tags { id, tags }).await?,
        Commands::Compress { id, name } => {
            perform(&engine, ActionRequest::Compress { id, archive_name: name }).await?
        }
        Commands::Revert { id } => perform(&engine, ActionRequest::Revert { id }).await?,
        Commands::Export { id, out } => export(&engine, &id, out).await?,
        Commands::Sync => replay(&mut engine).await?,
        Commands::Online => {
            config.offline = false;
            config.save()?;
            replay(&mut engine).await?;
            println!("online");
        }
        Commands::Status => status(&config, &engine)?,
        Commands::Browse => {
            let bus = Arc::new(EventBus::new());
            tui::run_browser(&mut engine, bus).await?;
        }
    }

    Ok(())
}

/// Single dispatcher for every mutation the UI can trigger.
async fn perform(engine: &SyncEngine<RestClient>, action: ActionRequest) -> anyhow::Result<()> {
    match action {
        ActionRequest::Create { name, parent_id } => {
            let folder = engine.create_folder(&name, parent_id).await?;
            println!("created folder {} ({})", folder.name, folder.id);
        }
        ActionRequest::Rename { id, new_name } => {
            let node = engine.rename(&id, &new_name).await?;
            println!("renamed to {} ({} prior versions)", node.name, node.versions.len());
        }
        ActionRequest::Delete { ids } => {
            let removed = engine.delete(&ids).await?;
            println!("removed {} node(s)", removed.len());
        }
        ActionRequest::Upload {
            parent_id,
            name,
            size_bytes,
            kind,
            content,
        } => {
            let node = engine
                .upload_node(&parent_id, &name, size_bytes, kind, content)
                .await?;
            println!(
                "uploaded {} ({} KB)",
                node.name,
                node.size.unwrap_or_default()
            );
        }
        ActionRequest::Move { id, dest_id } => {
            let node = engine.move_node(&id, &dest_id).await?;
            println!("moved {} into {}", node.name, dest_id);
        }
        ActionRequest::Copy { id, dest_id } => {
            let node = engine.copy_node(&id, &dest_id).await?;
            println!("copied as {} ({})", node.name, node.id);
        }
        ActionRequest::Tags { id, tags } => {
            let node = engine.add_tags(&id, tags).await?;
            println!("tags of {}: {}", node.name, node.tags.join(", "));
        }
        ActionRequest::Compress { id, archive_name } => {
            let node = engine.compress(&id, &archive_name).await?;
            println!(
                "compressed into {} ({} KB)",
                node.name,
                node.size.unwrap_or_default()
            );
        }
        ActionRequest::Revert { id } => {
            let node = engine.revert(&id).await?;
            println!("reverted to {}", node.name);
        }
    }

    if !engine.is_online() {
        let queued = engine.store().pending_count()?;
        println!("(offline: {queued} change(s) queued for replay)");
    }
    Ok(())
}

async fn login(config: &Config, email: &str) -> anyhow::Result<()> {
    let password = rpassword::prompt_password("password: ")?;
    let client = RestClient::new(config.server_url(), None);
    let auth = client.login(email, &password).await?;

    let mut config = config.clone();
    config.token = Some(auth.access_token);
    config.user_id = Some(auth.user.id.to_string().trim_matches('"').to_string());
    config.email = Some(auth.user.email);
    config.save()?;
    println!("logged in as {email}");
    Ok(())
}

async fn print_tree(engine: &SyncEngine<RestClient>) -> anyhow::Result<()> {
    let nodes = engine.get_data_tree().await?;
    if nodes.is_empty() {
        println!("no nodes");
        return Ok(());
    }
    let rows = tree::flatten(&tree::build_tree(&nodes));
    for row in rows {
        let marker = if row.is_folder { "+" } else { "-" };
        println!("{}{} {}  [{}]", "  ".repeat(row.level), marker, row.name, row.id);
    }
    Ok(())
}

async fn list(engine: &SyncEngine<RestClient>, folder_id: Option<&str>) -> anyhow::Result<()> {
    let children = match folder_id {
        Some(id) => engine.get_children(id).await?,
        None => engine
            .get_data_tree()
            .await?
            .into_iter()
            .filter(|n| n.parent_id.is_none())
            .collect(),
    };
    if children.is_empty() {
        println!("empty");
        return Ok(());
    }
    for node in children {
        let size = node
            .size
            .map(|kb| format!("{kb:>8.2} KB"))
            .unwrap_or_else(|| "         -".to_string());
        let tags = if node.tags.is_empty() {
            String::new()
        } else {
            format!("  #{}", node.tags.join(" #"))
        };
        println!("{size}  {}  [{}]{tags}", node.name, node.id);
    }
    Ok(())
}

async fn export(
    engine: &SyncEngine<RestClient>,
    id: &str,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let nodes = engine.get_data_tree().await?;
    let node = mutate::find(&nodes, id)?;
    let content = node
        .content
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("{} has no inline content", node.name))?;
    let bytes = archive::decode_content(content);
    let path = out.unwrap_or_else(|| PathBuf::from(&node.name));
    std::fs::write(&path, bytes)?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn replay(engine: &mut SyncEngine<RestClient>) -> anyhow::Result<()> {
    let queued = engine.store().pending_count()?;
    if queued == 0 {
        println!("nothing queued; refreshing");
    }
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("replaying {queued} queued change(s)"));
    pb.enable_steady_tick(Duration::from_millis(80));
    let report = engine.replay_pending().await?;
    pb.finish_and_clear();
    println!("applied {}, failed {}", report.applied, report.failed);
    Ok(())
}

fn status(config: &Config, engine: &SyncEngine<RestClient>) -> anyhow::Result<()> {
    println!("server: {}", config.server_url());
    match &config.email {
        Some(email) => println!("user: {email}"),
        None => println!("user: not logged in"),
    }
    println!("mode: {}", if engine.is_online() { "online" } else { "offline" });
    println!("cached nodes: {}", engine.cached().len());
    println!("queued changes: {}", engine.store().pending_count()?);
    if let Some(ts) = engine.store().last_broadcast() {
        let time = chrono::DateTime::from_timestamp_millis(ts)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("last cache broadcast: {time}");
    }
    Ok(())
}
