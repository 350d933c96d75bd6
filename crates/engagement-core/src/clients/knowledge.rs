//! File-backed knowledge base
//!
//! Markdown and text files below the knowledge root are split into paragraphs. Files
//! directly in the root are shared by every user; files in `<root>/<user_id>/` belong
//! to that user only.

use async_trait::async_trait;
use engagement_types::UserId;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::pipeline::traits::KnowledgeSource;
use crate::types::KnowledgeSnippet;

/// Words shorter than this do not count towards relevance
const MIN_TERM_CHARS: usize = 3;

pub struct FileKnowledgeBase {
    root: PathBuf,
}

impl FileKnowledgeBase {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn user_dir(&self, user_id: &UserId) -> Option<PathBuf> {
        let id = user_id.as_str();
        let safe = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.root.join(id))
    }

    fn load_dir(dir: &Path, snippets: &mut Vec<KnowledgeSnippet>) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && matches!(path.extension().and_then(|s| s.to_str()), Some("md") | Some("txt"))
            })
            .collect();
        files.sort();

        for path in files {
            let source = path.file_name().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
            match fs::read_to_string(&path) {
                Ok(content) => snippets.extend(
                    content
                        .split("\n\n")
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(|p| KnowledgeSnippet { source: source.clone(), text: p.to_string() }),
                ),
                Err(e) => log::warn!("Skipping unreadable knowledge file {}: {}", path.display(), e),
            }
        }
        Ok(())
    }

    fn load(&self, user_id: &UserId) -> Result<Vec<KnowledgeSnippet>> {
        let mut snippets = Vec::new();
        if let Some(dir) = self.user_dir(user_id) {
            Self::load_dir(&dir, &mut snippets)?;
        }
        Self::load_dir(&self.root, &mut snippets)?;
        Ok(snippets)
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_CHARS)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl KnowledgeSource for FileKnowledgeBase {
    /// Paragraphs ranked by how many query terms they share; an empty query keeps
    /// file order with the user's own files first.
    async fn snippets(&self, user_id: &UserId, query: &str, limit: usize) -> Result<Vec<KnowledgeSnippet>> {
        let snippets = self.load(user_id)?;
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(snippets.into_iter().take(limit).collect());
        }

        let mut scored: Vec<(usize, usize, KnowledgeSnippet)> = snippets
            .into_iter()
            .enumerate()
            .map(|(position, snippet)| (terms(&snippet.text).intersection(&query_terms).count(), position, snippet))
            .filter(|(score, _, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored.into_iter().take(limit).map(|(_, _, snippet)| snippet).collect())
    }
}
