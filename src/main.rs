use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use secrecy::SecretString;
use tracing::Level;

use persona_core::ContentProvider;
use persona_integrations::{DocumentExporter, LogMailer, NotionConfig, NotionExporter};
use persona_llm::{OfflineProvider, OpenAiConfig, OpenAiProvider};
use persona_server::{ServerConfig, Services};
use persona_store::{seed_demo_characters, CharacterRepo, Database};
use persona_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Persona: collaborative character authoring server.
#[derive(Parser, Debug)]
#[command(name = "persona")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON config file. Flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file. Defaults to an in-memory database.
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    #[arg(long, value_enum, default_value_t = Format::Json)]
    log_format: Format,

    /// Insert the demo characters when the database is empty.
    #[arg(long)]
    seed: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Pretty,
}

impl From<Format> for LogFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Json => LogFormat::Json,
            Format::Pretty => LogFormat::Pretty,
        }
    }
}

impl Cli {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(db) = &self.db {
            config.database_path = Some(db.clone());
        }
        Ok(config)
    }
}

fn secret_from_env(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn content_provider() -> Result<Arc<dyn ContentProvider>> {
    match secret_from_env("OPENAI_API_KEY") {
        Some(key) => {
            let provider = OpenAiProvider::new(OpenAiConfig::new(key)).context("building OpenAI provider")?;
            tracing::info!("using OpenAI content provider");
            Ok(Arc::new(provider))
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set, using offline content provider");
            Ok(Arc::new(OfflineProvider::new()))
        }
    }
}

fn notion_exporter() -> Result<Option<Arc<dyn DocumentExporter>>> {
    let Some(api_key) = secret_from_env("NOTION_API_KEY") else {
        tracing::info!("NOTION_API_KEY not set, Notion export disabled");
        return Ok(None);
    };
    let exporter = NotionExporter::new(NotionConfig { api_key, base_url: None }).context("building Notion exporter")?;
    Ok(Some(Arc::new(exporter)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        module_levels: Vec::new(),
        format: cli.log_format.into(),
    })
    .context("installing tracing subscriber")?;

    let config = cli.server_config()?;

    let db = match &config.database_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {}", parent.display()))?;
            }
            Database::open(path).context("opening database")?
        }
        None => {
            tracing::warn!("no database path configured, data will not survive a restart");
            Database::in_memory().context("opening in-memory database")?
        }
    };

    if cli.seed {
        let inserted = seed_demo_characters(&CharacterRepo::new(db.clone())).context("seeding demo characters")?;
        tracing::info!(inserted, "demo seed complete");
    }

    let services = Services {
        db,
        provider: content_provider()?,
        exporter: notion_exporter()?,
        mailer: Arc::new(LogMailer),
    };

    let handle = persona_server::start(config, services).await.context("starting server")?;
    tracing::info!(port = handle.port(), "persona server ready");

    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    handle.shutdown().await;
    Ok(())
}
