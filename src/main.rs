use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use findex::api::{self, AppState};
use findex::db::{migrate, Db};
use findex::error::FindexError;
use findex::Config;

#[derive(Parser)]
#[command(name = "findex", version, about = "Local desktop search service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server (default)
    Serve,
    /// Verify the database schema and exit
    Verify,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logger from environment variable, default info
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let cli = Cli::parse();

    // Invalid configuration is exit code 2; startup failures are 1
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Verify => verify(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    log::info!("Starting findex v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Data root: {}", config.storage.data_dir.display());
    log::info!(
        "Embeddings: {} ({})",
        config.embeddings.provider,
        config.embeddings.model
    );
    if config.admin_key().is_none() {
        log::warn!(
            "{} is not set; key management endpoints are disabled",
            config.server.admin_key_env
        );
    }

    let state = AppState::build(config, Path::new("migrations")).await?;
    api::serve(state).await?;
    Ok(())
}

/// Open the database, apply migrations, and check the expected schema.
async fn verify(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db = Db::new(config.db_path());

    db.with_connection(|conn| migrate::run_migrations(conn, Path::new("migrations"))).await?;

    db.with_connection(|conn| {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        for table in ["chunks", "sources", "directories", "api_keys", "schema_migrations"] {
            if !tables.iter().any(|t| t == table) {
                return Err(FindexError::Config(format!("missing table: {}", table)));
            }
            log::debug!("table exists: {}", table);
        }

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(FindexError::Config(format!("journal mode is not WAL: {}", journal_mode)));
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(FindexError::Config(format!("integrity check failed: {}", integrity)));
        }

        Ok(())
    })
    .await?;

    log::info!("Database schema verified at {}", config.db_path().display());
    Ok(())
}
