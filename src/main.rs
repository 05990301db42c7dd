use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use platinum_uploader::config::{default_config_path, Config};
use platinum_uploader::upload::{
    ApiClient, Backend, LeafFile, Notice, NoticeLevel, SessionManager, SessionStorage, UploadEngine,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Upload files and archives to the Platinum Sequence analysis backend.
#[derive(Parser, Debug)]
#[command(name = "platinum", version, about)]
struct Cli {
    /// Path to config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend origin, overrides the config file and environment
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files; zip archives are expanded first
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show the session token, creating and registering it if needed
    Session,
    /// Check backend liveness
    Health,
    /// Fetch analysis results for this session or a single file
    Results {
        #[arg(long)]
        file_id: Option<String>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the JSON Schema of config.toml
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let client = Arc::new(ApiClient::new(&config.api_url, config.request_timeout())?);
    let sessions = || {
        SessionManager::new(
            SessionStorage::new(&config.data_dir),
            client.clone() as Arc<dyn Backend>,
        )
    };

    match cli.command {
        Command::Upload { paths } => upload(client.clone(), sessions(), paths).await,
        Command::Session => {
            let mut manager = sessions();
            let (token, failure) = manager.ensure_registered().await?;
            println!("{}", token);
            if let Some(e) = failure {
                warn!(error = %e, "Session is usable locally but not registered");
            }
            Ok(())
        }
        Command::Health => {
            let health = client.health().await?;
            println!("{} ({}) at {}", health.status, health.service, health.timestamp);
            Ok(())
        }
        Command::Results { file_id } => {
            let verdicts = match file_id {
                Some(id) => vec![client.file_analysis(&id).await?],
                None => {
                    let token = sessions().ensure_session().await?;
                    client.analysis_results(token.as_str()).await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&verdicts)?);
            Ok(())
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Show => {
                    if let Some(path) = cli.config.or_else(default_config_path) {
                        eprintln!("# {}", path.display());
                    }
                    print!("{}", toml::to_string_pretty(&config)?);
                }
                ConfigAction::Schema => println!("{}", Config::schema_json()?),
            }
            Ok(())
        }
    }
}

async fn upload(client: Arc<ApiClient>, mut sessions: SessionManager, paths: Vec<PathBuf>) -> Result<()> {
    let mut selection = Vec::with_capacity(paths.len());
    for path in &paths {
        selection.push(LeafFile::from_path(path).await?);
    }

    let mut engine = UploadEngine::new(client);
    engine.add_files(selection);
    print_notices(engine.drain_notices());

    let (token, failure) = sessions
        .ensure_registered()
        .await
        .context("Failed to prepare session")?;
    if let Some(e) = failure {
        print_notices(vec![Notice {
            id: 0,
            level: NoticeLevel::Warning,
            message: e.to_string(),
        }]);
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut progress = engine.subscribe_progress();
    let display = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let pct = *progress.borrow_and_update();
            if let Err(e) = show_progress(&mut std::io::stderr(), pct) {
                warn!(error = %e, "Failed to draw progress");
            }
        }
    });

    let result = engine.submit(&token, cancel).await;
    eprintln!();

    for file in engine.files() {
        match &file.error {
            Some(err) => println!("{:<10} {}  ({})", file.status, file.name(), err),
            None => println!("{:<10} {}", file.status, file.name()),
        }
    }
    print_notices(engine.drain_notices());
    drop(engine);
    if let Err(e) = display.await {
        warn!(error = %e, "Progress display task failed");
    }

    if let Err(e) = result {
        bail!("Upload failed: {}", e);
    }
    Ok(())
}

fn show_progress(out: &mut impl Write, pct: u8) -> std::io::Result<()> {
    write!(out, "\rUploading... {:>3}%", pct)?;
    out.flush()
}

fn print_notices(notices: Vec<Notice>) {
    for notice in notices {
        let tag = match notice.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Error => "error",
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
        };
        eprintln!("[{}] {}", tag, notice.message);
    }
}
