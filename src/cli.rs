//! CLI for songbook-generator: assemble a songbook PDF from Drive folders.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::warn;

use crate::drive::DriveClient;
use crate::filter::FilterExpression;
use crate::load_config::load_config;
use crate::pdf::{generate_songbook, GenerateRequest};

#[derive(Parser)]
#[clap(
    name = "songbook-generator",
    version,
    about = "Generate a single songbook PDF from documents in Drive folders, with cover and table of contents"
)]
pub struct Cli {
    /// Drive folder IDs to read files from (can be passed multiple times)
    #[clap(short = 's', long = "source-folder")]
    pub source_folder: Vec<String>,

    /// Where to save the generated pdf
    #[clap(short = 'd', long = "destination-path")]
    pub destination_path: PathBuf,

    /// File ID of the cover template
    #[clap(short = 'c', long = "cover-file-id")]
    pub cover_file_id: Option<String>,

    /// Limit the number of files to process (no limit by default)
    #[clap(short = 'l', long = "limit")]
    pub limit: Option<usize>,

    /// Filter files using property syntax, e.g. 'year:gte:2000',
    /// 'artist:equals:Beatles', 'difficulty:in:easy,medium'
    #[clap(short = 'f', long = "filter")]
    pub filter: Option<String>,

    /// Drive file IDs for preface pages (after cover, before TOC).
    /// Can be specified multiple times.
    #[clap(long = "preface-file-id")]
    pub preface_file_id: Vec<String>,

    /// Drive file IDs for postface pages (at the very end).
    /// Can be specified multiple times.
    #[clap(long = "postface-file-id")]
    pub postface_file_id: Vec<String>,

    /// Path to the YAML config file (defaults to the user config dir)
    #[clap(long = "config")]
    pub config: Option<PathBuf>,

    /// Open the generated pdf
    #[clap(long = "open-generated-pdf")]
    pub open_generated_pdf: bool,
}

/// Async CLI entrypoint shared by `main()` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    // Parse the filter before touching anything remote.
    let filter = match &cli.filter {
        Some(text) => {
            let parsed = FilterExpression::parse(text)?;
            println!("Applying client-side filter: {text}");
            Some(parsed)
        }
        None => None,
    };

    let config = load_config(cli.config.as_deref())?;

    let source_folders = if cli.source_folder.is_empty() {
        config.source_folders.clone()
    } else {
        cli.source_folder.clone()
    };
    if source_folders.is_empty() {
        anyhow::bail!("no source folders given: pass --source-folder or set source_folders in the config file");
    }

    let cover_template_id = cli.cover_file_id.clone().or(config.cover_file_id.clone());
    let preface_ids = if cli.preface_file_id.is_empty() {
        config.preface_file_ids.clone()
    } else {
        cli.preface_file_id.clone()
    };
    let postface_ids = if cli.postface_file_id.is_empty() {
        config.postface_file_ids.clone()
    } else {
        cli.postface_file_id.clone()
    };
    if !preface_ids.is_empty() {
        println!("Using {} preface file(s)", preface_ids.len());
    }
    if !postface_ids.is_empty() {
        println!("Using {} postface file(s)", postface_ids.len());
    }

    let request = GenerateRequest {
        source_folders,
        destination: cli.destination_path.clone(),
        limit: cli.limit,
        cover_template_id,
        filter,
        preface_ids,
        postface_ids,
        cover_cache_dir: config.cover_cache_dir.clone(),
    };

    let client = DriveClient::new_from_env()
        .map_err(|e| anyhow::anyhow!("failed to set up Drive client: {e}"))?;

    let progress = |fraction: f64, message: Option<&str>| {
        let percentage = (fraction * 100.0) as u32;
        println!("[{percentage:3}%] {}", message.unwrap_or(""));
    };

    let path = generate_songbook(&client, &request, &progress).await?;

    if cli.open_generated_pdf {
        println!("Opening generated songbook: {}", path.display());
        open_artifact(&path);
    }
    Ok(())
}

/// Best-effort launch of the platform's default PDF viewer.
fn open_artifact(path: &Path) {
    let spawned = if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(path).spawn()
    } else if cfg!(target_os = "windows") {
        std::process::Command::new("cmd")
            .args(["/C", "start", ""])
            .arg(path)
            .spawn()
    } else {
        std::process::Command::new("xdg-open").arg(path).spawn()
    };
    if let Err(e) = spawned {
        warn!(error = %e, path = %path.display(), "Failed to open generated songbook");
    }
}
