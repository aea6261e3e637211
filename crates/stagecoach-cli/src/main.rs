use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use stagecoach_core::domain::{Content, ContentFormat, ContentKind, ContentModel};
use stagecoach_core::impls::{TokioLocalStore, TransferApiClient};
use stagecoach_core::ports::SystemClock;
use stagecoach_core::{ContentStore, ContentsConfig, StoreBuilder, TransferApiConfig};

/// stagecoach - files, directories and notebooks on a remote transfer endpoint
#[derive(Parser, Debug)]
#[command(name = "stagecoach", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Show a model, optionally staging its content
    Get {
        path: String,
        #[arg(long)]
        content: bool,
        /// text, base64 or json
        #[arg(long)]
        format: Option<ContentFormat>,
        /// file, directory or notebook
        #[arg(long = "type")]
        kind: Option<ContentKind>,
    },
    /// Upload a local file
    Put { local: PathBuf, path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Delete a file or directory tree
    Rm { path: String },
    /// Rename a file or directory
    Mv { from: String, to: String },
    /// Copy a file or directory tree
    Cp { from: String, to: String },
    /// Report whether a path is a file or a directory
    Exists { path: String },
}

#[derive(Debug, Serialize)]
struct Existence {
    path: String,
    directory: bool,
    file: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagecoach=info,stagecoach_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = connect()?;

    match cli.command {
        Command::Ls { path } => {
            let model = store
                .get(&path, true, Some(ContentKind::Directory), None)
                .await?;
            print_json(&model)?;
        }
        Command::Get {
            path,
            content,
            format,
            kind,
        } => {
            let model = store.get(&path, content, kind, format).await?;
            print_json(&model)?;
        }
        Command::Put { local, path } => {
            let bytes = tokio::fs::read(&local).await?;
            let model = upload_model(&path, bytes)?;
            let saved = store.save(&model, &path).await?;
            info!(path = %saved.path, "uploaded {}", local.display());
            print_json(&saved)?;
        }
        Command::Mkdir { path } => {
            let saved = store.save(&ContentModel::directory(&path), &path).await?;
            print_json(&saved)?;
        }
        Command::Rm { path } => {
            store.delete(&path).await?;
            info!(%path, "deleted");
        }
        Command::Mv { from, to } => {
            store.rename(&from, &to).await?;
            info!(%from, %to, "renamed");
        }
        Command::Cp { from, to } => {
            let copied = store.copy(&from, &to).await?;
            print_json(&copied)?;
        }
        Command::Exists { path } => {
            let existence = Existence {
                directory: store.dir_exists(&path).await?,
                file: store.file_exists(&path).await?,
                path,
            };
            print_json(&existence)?;
        }
    }

    Ok(())
}

fn connect() -> Result<ContentStore, Box<dyn Error>> {
    let config = ContentsConfig::from_env()?;
    let api = TransferApiConfig::from_env()?;
    let client = TransferApiClient::new(&api)?;

    info!(
        endpoint = %config.remote_endpoint_id,
        base = %config.remote_base_path,
        cache = %config.local_cache_directory.display(),
        "connecting"
    );
    let store = StoreBuilder::new(config)
        .remote(Arc::new(client))
        .local_store(Arc::new(TokioLocalStore::new()))
        .clock(Arc::new(SystemClock))
        .build()?;
    Ok(store)
}

/// Notebooks go up as documents, UTF-8 as text, anything else as base64.
fn upload_model(path: &str, bytes: Vec<u8>) -> Result<ContentModel, Box<dyn Error>> {
    let model = match ContentKind::infer(path) {
        ContentKind::Notebook => {
            let mut model = ContentModel::notebook(path);
            model.content = Some(Content::Document(serde_json::from_slice(&bytes)?));
            model
        }
        _ => {
            let mut model = ContentModel::file(path);
            let (format, content) = match String::from_utf8(bytes) {
                Ok(text) => (ContentFormat::Text, text),
                Err(err) => (ContentFormat::Base64, STANDARD.encode(err.into_bytes())),
            };
            model.format = Some(format);
            model.content = Some(Content::Text(content));
            model
        }
    };
    Ok(model)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
