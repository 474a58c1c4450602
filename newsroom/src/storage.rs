use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::types::{PostRecord, Storage};
use crate::utils::files::slug;

pub const LEDGER_FILE: &str = "used_article_links.txt";

/// Post file as written to disk.
#[derive(Debug, Serialize)]
struct SavedPost<'a> {
    run_id: &'a str,
    platform: &'a str,
    language: &'a str,
    post_text: &'a str,
    image_prompt: &'a str,
    hashtags: &'a [String],
    source_ids: &'a [String],
    image_file: Option<String>,
    saved_at: DateTime<Utc>,
}

/// Stores approved posts as JSON files and the ledger as a text file with
/// one link per line.
pub struct FileStorage {
    output_dir: PathBuf,
    ledger_path: PathBuf,
}

impl FileStorage {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        let output_dir = output_dir.as_ref().to_path_buf();
        Self {
            ledger_path: output_dir.join(LEDGER_FILE),
            output_dir,
        }
    }

    pub fn with_ledger_path(mut self, path: impl AsRef<Path>) -> Self {
        self.ledger_path = path.as_ref().to_path_buf();
        self
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn save(&self, post: &PostRecord, image: Option<&[u8]>) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Cannot create output directory {}", self.output_dir.display()))?;

        let saved_at = Utc::now();
        let stem = format!(
            "{}_post_{}_{}",
            slug(&post.platform),
            slug(&post.language),
            saved_at.format("%Y%m%d_%H%M%S")
        );

        let image_file = match image {
            Some(bytes) => {
                let name = format!("{}.png", stem);
                let path = self.output_dir.join(&name);
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("Cannot write image {}", path.display()))?;
                debug!("Wrote image {} ({} bytes)", path.display(), bytes.len());
                Some(name)
            }
            None => None,
        };

        let record = SavedPost {
            run_id: &post.run_id,
            platform: &post.platform,
            language: &post.language,
            post_text: &post.post_text,
            image_prompt: &post.image_prompt,
            hashtags: &post.hashtags,
            source_ids: &post.source_ids,
            image_file,
            saved_at,
        };
        let path = self.output_dir.join(format!("{}.json", stem));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&record)?)
            .await
            .with_context(|| format!("Cannot write post {}", path.display()))?;

        info!("Saved {} post to {}", post.platform, path.display());
        Ok(())
    }

    async fn load_ledger(&self) -> anyhow::Result<BTreeSet<String>> {
        let raw = match tokio::fs::read_to_string(&self.ledger_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No ledger at {}, starting empty", self.ledger_path.display());
                return Ok(BTreeSet::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read ledger {}", self.ledger_path.display()))
            }
        };

        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != "#")
            .map(str::to_string)
            .collect())
    }

    async fn append_ledger(&self, ids: &[String]) -> anyhow::Result<()> {
        if let Some(parent) = self.ledger_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)
            .await
            .with_context(|| format!("Cannot open ledger {}", self.ledger_path.display()))?;

        let mut lines = String::new();
        for id in ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty() && *id != "#") {
            lines.push_str(id);
            lines.push('\n');
        }
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        info!("Appended {} links to {}", ids.len(), self.ledger_path.display());
        Ok(())
    }
}
