//! Knowledge base document discovery.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A knowledge base source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the knowledge base directory, with `/` separators.
    pub source: String,
    /// Full text.
    pub content: String,
}

/// Load every file under `dir` matching `pattern`, sorted by path.
///
/// A missing directory yields no documents. Files that cannot be read as
/// UTF-8 text are skipped with a warning.
///
/// # Errors
///
/// Returns an error if `pattern` is not a valid glob.
pub fn load_documents(dir: &Path, pattern: &str) -> Result<Vec<Document>> {
    if !dir.is_dir() {
        debug!("Knowledge base directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let full = dir.join(pattern);
    let full = full.to_string_lossy();
    let entries = glob::glob(&full)
        .map_err(|e| Error::knowledge_base(format!("invalid glob '{pattern}': {e}")))?;

    let mut documents = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping unreadable knowledge base entry: {}", e);
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let source = path
                    .strip_prefix(dir)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                documents.push(Document { source, content });
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    documents.sort_by(|a, b| a.source.cmp(&b.source));
    debug!("Loaded {} knowledge base documents", documents.len());
    Ok(documents)
}
