use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Loads every `*.md` file in `dir_path` as a character prompt, sorted by file
/// name so the rotation order is stable between runs.
///
/// A missing directory is not an error: the companion simply runs without
/// character rotation.
pub fn load_characters(dir_path: &Path) -> Result<Vec<String>> {
    if !dir_path.exists() {
        tracing::info!(
            "Characters directory {} not found, rotation disabled.",
            dir_path.display()
        );
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read characters directory: {}", dir_path.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            files.push(path);
        }
    }
    files.sort();

    let mut characters = Vec::with_capacity(files.len());
    for path in files {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read character file: {}", path.display()))?;
        let content = content.trim();
        if content.is_empty() {
            tracing::warn!("Skipping empty character file {}", path.display());
            continue;
        }
        characters.push(content.to_string());
    }

    Ok(characters)
}
