//! Atelier CLI.
//!
//! - `atelier serve` - run the session gateway
//! - `atelier token` - mint a handshake token
//! - `atelier project create` - create a project in the local store
//! - `atelier run` - run a directory in the execution sandbox
//! - `atelier join` - join a project room from the terminal

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use atelier_core::ai::{responder_from_config, AiMergeService, DisabledResponder};
use atelier_core::sandbox::{RunEvent, RunHandle};
use atelier_core::session;
use atelier_core::sync::WorkspaceUpdate;
use atelier_core::{JsonFileStore, MemoryStore, SandboxController, Workspace, WorkspaceStore};
use atelier_protocol::{FileTree, ServerEvent, UserId};
use atelier_server::{Gateway, JwtAuthority, ServerConfig};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

/// Directories never copied into a sandbox run.
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", ".atelier"];

#[derive(Parser)]
#[command(name = "atelier")]
#[command(about = "Collaborative workspaces with an AI collaborator", version)]
struct Cli {
    /// Directory holding .atelier/config.yaml
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "ATELIER_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session gateway
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Keep projects in memory only
        #[arg(long)]
        memory: bool,
    },

    /// Mint a handshake token for a user
    Token {
        #[arg(long)]
        user: String,

        /// Token lifetime; defaults to the configured value
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Run a directory in the execution sandbox
    Run {
        dir: PathBuf,
    },

    /// Join a project room from the terminal
    Join {
        /// Gateway URL
        #[arg(long, default_value = "ws://127.0.0.1:4870")]
        url: String,

        #[arg(long)]
        project: String,

        #[arg(long, env = "ATELIER_TOKEN")]
        token: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project in the configured store
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        owner: String,

        /// Additional members
        #[arg(long = "member")]
        members: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    if cli.json_logs {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = ServerConfig::load_from_root(&root)?;

    match cli.command {
        Commands::Serve { bind, memory } => serve(config, bind, memory).await,
        Commands::Token { user, ttl_secs } => mint_token(&config, &user, ttl_secs),
        Commands::Project { command } => match command {
            ProjectCommands::Create {
                name,
                owner,
                members,
            } => create_project(&config, &name, &owner, &members).await,
        },
        Commands::Run { dir } => run_directory(&config, &dir).await,
        Commands::Join {
            url,
            project,
            token,
        } => join(&config, &url, &project, token.as_deref()).await,
    }
}

fn authority(config: &ServerConfig) -> Result<JwtAuthority> {
    let auth = &config.gateway.auth;
    let secret = auth.secret_from_env()?;
    Ok(JwtAuthority::new(secret.as_bytes(), auth.issuer.clone()))
}

fn open_store(config: &ServerConfig) -> Result<Arc<dyn WorkspaceStore>> {
    let dir = config.workspace.store.resolve_data_dir();
    let store = JsonFileStore::open(&dir)
        .with_context(|| format!("Failed to open store at {}", dir.display()))?;
    Ok(Arc::new(store))
}

async fn serve(config: ServerConfig, bind: Option<SocketAddr>, memory: bool) -> Result<()> {
    let store: Arc<dyn WorkspaceStore> = if memory {
        tracing::warn!("Using in-memory store; projects are lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        open_store(&config)?
    };

    let responder = match responder_from_config(&config.workspace.ai) {
        Ok(responder) => responder,
        Err(e) => {
            tracing::warn!(error = %e, "AI collaborator unavailable; mentions get a notice");
            Arc::new(DisabledResponder)
        }
    };

    let address = bind.unwrap_or(config.gateway.bind_address);
    let gateway = Gateway::new(store.clone(), authority(&config)?, config.gateway.clone())
        .with_ai(AiMergeService::new(responder, store));

    let listener = atelier_server::bind(address).await?;
    tokio::select! {
        result = atelier_server::serve(listener, gateway) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    Ok(())
}

fn mint_token(config: &ServerConfig, user: &str, ttl_secs: Option<u64>) -> Result<()> {
    let ttl = Duration::from_secs(ttl_secs.unwrap_or(config.gateway.auth.token_ttl_secs));
    let token = authority(config)?.issue(&UserId::new(user), ttl)?;
    println!("{token}");
    Ok(())
}

async fn create_project(
    config: &ServerConfig,
    name: &str,
    owner: &str,
    members: &[String],
) -> Result<()> {
    let store = open_store(config)?;
    let project = store.create_project(name, &UserId::new(owner)).await?;
    for member in members {
        store.add_member(&project.id, &UserId::new(member.as_str())).await?;
    }
    println!("{}", project.id);
    Ok(())
}

/// Read a directory into a tree. Binary files are skipped.
fn load_tree(dir: &Path) -> Result<FileTree> {
    fn walk(root: &Path, dir: &Path, tree: &mut FileTree) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            if entry.file_type()?.is_dir() {
                if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                    continue;
                }
                walk(root, &path, tree)?;
                continue;
            }
            let relative = path
                .strip_prefix(root)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            match std::fs::read_to_string(&path) {
                Ok(contents) => tree.write_file(relative, contents)?,
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Skipping file"),
            }
        }
        Ok(())
    }

    let mut tree = FileTree::new();
    walk(dir, dir, &mut tree)?;
    Ok(tree)
}

async fn print_run(mut run: RunHandle) {
    while let Some(event) = run.next_event().await {
        match event {
            RunEvent::Status(status) => eprintln!("[sandbox] {status}"),
            RunEvent::Output(chunk) => print!("{chunk}"),
            RunEvent::Notice(notice) => eprintln!("[sandbox] {notice}"),
            RunEvent::ServerReady { host, port } => {
                eprintln!("[sandbox] server ready at http://{host}:{port}")
            }
        }
    }
}

async fn run_directory(config: &ServerConfig, dir: &Path) -> Result<()> {
    let tree = load_tree(dir)?;
    tracing::info!(dir = %dir.display(), files = tree.len(), "Loaded workspace");

    let mut sandbox = SandboxController::new(config.workspace.sandbox.clone());
    let run = sandbox.run(tree).await;
    tokio::select! {
        _ = print_run(run) => {}
        _ = tokio::signal::ctrl_c() => {
            sandbox.stop().await;
        }
    }
    eprintln!("[sandbox] final status: {}", sandbox.status());
    Ok(())
}

fn render(workspace: &Workspace, update: &WorkspaceUpdate) {
    match update {
        WorkspaceUpdate::Message(_) => {
            if let Some(entry) = workspace.messages().entries().last() {
                println!("<{}> {}", entry.sender(), entry.content());
            }
        }
        WorkspaceUpdate::TreeMerged { paths } => {
            if let Some(entry) = workspace.messages().entries().last() {
                println!("<{}> {}", entry.sender(), entry.content());
            }
            println!("* AI updated {}", paths.join(", "));
        }
        WorkspaceUpdate::Typing(user) => println!("* {user} is typing"),
        WorkspaceUpdate::Error(message) => println!("! {message}"),
        WorkspaceUpdate::Rejected(reason) => println!("! rejected: {reason:?}"),
        other => tracing::debug!(?other, "Room update"),
    }
}

async fn join(config: &ServerConfig, url: &str, project: &str, token: Option<&str>) -> Result<()> {
    let session = session::connect(url, token, project).await?;
    let (mut workspace, handle, mut inbound) =
        session.into_workspace(config.workspace.sync.save_debounce());
    println!(
        "Joined {} as {} ({} files). /run, /ls, /write <path> <text>, /quit",
        workspace.project_name(),
        workspace.identity(),
        workspace.tree().len()
    );

    let mut sandbox = SandboxController::new(config.workspace.sandbox.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = inbound.recv() => {
                let Some(event) = event else {
                    println!("! connection closed");
                    break;
                };
                let closing = matches!(event, ServerEvent::Rejected { .. });
                let update = workspace.apply_server_event(event);
                render(&workspace, &update);
                if closing {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line.split_once(' ').unwrap_or((line, "")) {
                    ("", _) => {}
                    ("/quit", _) => break,
                    ("/ls", _) => {
                        for path in workspace.tree().paths() {
                            println!("  {path}");
                        }
                    }
                    ("/write", rest) => match rest.split_once(' ') {
                        Some((path, text)) => {
                            if let Err(e) = workspace.edit_file(path, text) {
                                println!("! {e}");
                            }
                        }
                        None => println!("! usage: /write <path> <text>"),
                    },
                    ("/run", _) => {
                        let run = sandbox.run_workspace(&workspace).await;
                        tokio::spawn(print_run(run));
                    }
                    _ => {
                        let pending = workspace.send_message(line, None);
                        handle.send(pending.to_event())?;
                    }
                }
            }
        }
    }

    sandbox.stop().await;
    workspace.close_session().await;
    Ok(())
}
