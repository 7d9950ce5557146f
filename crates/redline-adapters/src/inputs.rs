//! Loading and writing the files the CLI works on.

use anyhow::{bail, Context, Result};
use redline_core::{Plan, ResearchPool};
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn read_article(path: &Path) -> Result<String> {
    let markdown = fs::read_to_string(path)
        .with_context(|| format!("failed to read article {}", path.display()))?;
    if markdown.trim().is_empty() {
        bail!("article {} is empty", path.display());
    }
    Ok(markdown)
}

pub fn read_plan(path: &Path) -> Result<Plan> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("plan {} is not valid plan JSON", path.display()))
}

/// Research is optional; `None` gives an empty pool.
pub fn read_research(path: Option<&Path>) -> Result<ResearchPool> {
    let Some(path) = path else {
        return Ok(ResearchPool::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read research {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("research {} is not valid research JSON", path.display()))
}

/// Write `content` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("failed to write {}", path.display()));
    }
    Ok(())
}
