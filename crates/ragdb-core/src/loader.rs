use anyhow::{bail, Context};
use std::fs;
use std::path::{Path, PathBuf};

use crate::traits::{DocumentLoader, LoadedDocument};
use crate::types::{Meta, SourceInfo};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "log"];

/// Loads plain-text formats. Invalid UTF-8 is decoded lossily.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFileLoader;

impl TextFileLoader {
    pub fn new() -> Self {
        Self
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase)
}

impl DocumentLoader for TextFileLoader {
    fn supports(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
    }

    fn load(&self, path: &Path) -> anyhow::Result<LoadedDocument> {
        if !self.supports(path) {
            bail!("unsupported file type: {}", path.display());
        }
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let size = bytes.len() as u64;
        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        let source = SourceInfo {
            filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            format: extension_of(path),
            size: Some(size),
        };
        let mut metadata: Meta = source.to_meta();
        metadata.insert("path".into(), path.to_string_lossy().into_owned().into());
        Ok(LoadedDocument { content, metadata })
    }
}

/// Every regular file under `root`, sorted, that `loader` accepts.
pub fn list_supported_files(root: &Path, loader: &dyn DocumentLoader) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| loader.supports(p))
        .collect();
    files.sort();
    files
}
