use std::path::Path;

use anyhow::{Context, Result};
use civic_core::{KbChunk, KbDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::chunking::chunk_document;
use crate::EmbeddingModel;

pub const CHUNK_MAX_WORDS: usize = 300;

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#\s+(.+)$").expect("valid heading regex"));
static SOURCE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^source:\s*(\S+)\s*$").expect("valid source regex"));

#[derive(Debug, Deserialize)]
struct JsonEntry {
    title: String,
    body: String,
    #[serde(default)]
    source_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonEntries {
    Many(Vec<JsonEntry>),
    One(JsonEntry),
}

/// Chunks `body` and embeds every chunk once.
pub fn build_document(
    id: impl Into<String>,
    title: impl Into<String>,
    body: impl Into<String>,
    source_url: Option<String>,
    embedder: &dyn EmbeddingModel,
) -> KbDocument {
    let id = id.into();
    let body = body.into();

    let chunks = chunk_document(&body, CHUNK_MAX_WORDS)
        .into_iter()
        .enumerate()
        .map(|(idx, text)| {
            let embedding = serde_json::to_string(&embedder.embed(&text)).ok();
            KbChunk {
                id: format!("{}::{}", id, idx),
                text,
                embedding,
            }
        })
        .collect();

    KbDocument {
        id,
        title: title.into(),
        body,
        source_url,
        chunks,
    }
}

/// Loads `.md` and `.json` documents below `root`, in file-name order.
///
/// Markdown documents take their title from the first `# ` heading (falling
/// back to the file stem) and an optional `source: <url>` line. JSON files hold
/// one `{title, body, source_url?}` entry or an array of them.
pub fn load_kb_dir(root: &Path, embedder: &dyn EmbeddingModel) -> Result<Vec<KbDocument>> {
    let mut docs = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
    {
        let path = entry.path();
        let extension = path.extension().and_then(|ext| ext.to_str());
        if !matches!(extension, Some("md") | Some("json")) {
            continue;
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading knowledge document: {}", path.display()))?;
        let rel_path = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string_lossy().to_string());
        let base_id = rel_path.replace(['/', '\\'], "::");

        if extension == Some("json") {
            let entries = match serde_json::from_str::<JsonEntries>(&raw) {
                Ok(JsonEntries::Many(entries)) => entries,
                Ok(JsonEntries::One(entry)) => vec![entry],
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping malformed knowledge file");
                    continue;
                }
            };

            for (idx, entry) in entries.into_iter().enumerate() {
                docs.push(build_document(
                    format!("{}#{}", base_id, idx),
                    entry.title,
                    entry.body,
                    entry.source_url,
                    embedder,
                ));
            }
            continue;
        }

        let title = HEADING
            .captures(&raw)
            .and_then(|captures| captures.get(1).map(|value| value.as_str().trim().to_string()))
            .unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or("untitled")
                    .replace('-', " ")
            });
        let source_url = SOURCE_LINE
            .captures(&raw)
            .and_then(|captures| captures.get(1).map(|value| value.as_str().to_string()));

        let body = raw
            .lines()
            .filter(|line| !HEADING.is_match(line) && !SOURCE_LINE.is_match(line))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        docs.push(build_document(base_id, title, body, source_url, embedder));
    }

    Ok(docs)
}
