//! biblio entry point.

use biblio::{
    config::{Cli, Command, Config},
    db::Database,
    library::Library,
    publication::EpubOpener,
    scanner::{Poller, RootSet, TokioClock, Walk, WalkOutcome, Walker},
    server::{self, DavState},
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Scan { all }) => cmd_scan(&config, all),
        Some(Command::Books) => cmd_books(&config),
        Some(Command::Serve { bind, root }) => cmd_serve(config, bind, root).await,
        None => cmd_serve(config, None, None).await,
    }
}

/// Write a default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());
    println!("\nEdit config.toml, then run: biblio serve");

    Ok(())
}

/// Build the catalog service from config.
fn open_library(config: &Config) -> anyhow::Result<Library> {
    let db = Database::open(&config.database.path)?;
    Ok(Library::new(
        db,
        Arc::new(EpubOpener),
        config.sync.app,
        config.scan.extensions.clone(),
        config.scan.workers,
    ))
}

/// Walk configuration shared by `scan` and `serve`.
fn root_set(config: &Config, extensions: Option<Vec<String>>) -> RootSet {
    RootSet {
        walker: Walker::new(&config.scan.storage_root, config.scan.include_dirs),
        roots: config.scan.effective_roots(&config.server.root),
        extensions,
    }
}

/// One-shot walk.
fn cmd_scan(config: &Config, all: bool) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let extensions = (!all).then(|| library.wanted_extensions());

    match root_set(config, extensions).walk() {
        WalkOutcome::Success(files) => {
            for file in &files {
                println!("{}", file.display());
            }
            println!("\n{} entries", files.len());
            Ok(())
        }
        WalkOutcome::PermissionDenied(path) => {
            anyhow::bail!("Permission denied: {}", path.display())
        }
        WalkOutcome::IoError { path, cause } => {
            anyhow::bail!("Cannot read {}: {}", path.display(), cause)
        }
    }
}

/// List the catalog.
fn cmd_books(config: &Config) -> anyhow::Result<()> {
    let library = open_library(config)?;
    let books = library.books()?;

    if books.is_empty() {
        println!("No books found.");
        return Ok(());
    }

    println!("{:<40} {:<30} PROGRESS", "TITLE", "AUTHORS");
    println!("{}", "-".repeat(80));
    for book in books {
        println!(
            "{:<40} {:<30} {:>5.1}%",
            book.title,
            book.authors().join(", "),
            book.progress * 100.0
        );
    }

    Ok(())
}

/// Start the WebDAV server, the poller and the catalog follower.
async fn cmd_serve(
    mut config: Config,
    bind: Option<std::net::SocketAddr>,
    root: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind = addr;
    }
    if let Some(root) = root {
        config.server.root = root;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "biblio=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !config.server.bind.ip().is_loopback() {
        tracing::warn!(bind = %config.server.bind, "WebDAV server is reachable beyond this device");
    }

    let state = DavState::new(&config.server.root)?;
    let library = Arc::new(open_library(&config)?);

    tracing::info!(
        bind = %config.server.bind,
        root = %state.root().display(),
        database = %config.database.path.display(),
        "Starting biblio"
    );

    let poller = Poller::new(
        root_set(&config, Some(library.wanted_extensions())),
        config.scan.interval(),
        TokioClock,
    );
    let source = poller.source();
    let outcomes = poller.subscribe();
    let changes = state.changes().subscribe();

    tokio::spawn(poller.run());
    tokio::spawn(Arc::clone(&library).follow(source, outcomes, changes));

    let app = server::create_router(state);
    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "WebDAV server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
