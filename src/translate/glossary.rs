//! Name glossary loading.
//! Term pairs live in a JSON file and are rendered into the system prompt so
//! character and sect names stay consistent across chapters.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TranslateError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlossaryEntry {
    pub source: String,
    pub target: String,
}

/// On-disk glossary file format.
#[derive(Debug, Deserialize)]
struct GlossaryFile {
    version: u32,
    entries: Vec<GlossaryEntry>,
}

/// Loaded glossary with its version.
#[derive(Debug, Clone)]
pub struct Glossary {
    version: u32,
    entries: Vec<GlossaryEntry>,
}

impl Glossary {
    /// Load glossary from a JSON file.
    pub async fn load_from_file(path: &Path) -> Result<Self, TranslateError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, TranslateError> {
        let file: GlossaryFile = serde_json::from_str(content)
            .map_err(|e| TranslateError::Config(format!("glossary parse error: {e}")))?;
        Ok(Self {
            version: file.version,
            entries: file.entries,
        })
    }

    /// Create an empty glossary (fallback when file is missing).
    pub fn empty() -> Self {
        Self {
            version: 0,
            entries: Vec::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prompt section listing every entry, or `None` when empty.
    pub fn render_section(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let mut out = String::from(
            "Name glossary. Always render these names exactly as given:\n",
        );
        for entry in &self.entries {
            out.push_str(&format!("- {} => {}\n", entry.source, entry.target));
        }
        Some(out)
    }
}
