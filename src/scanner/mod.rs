//! File scanner for discovering and filtering source files.
//!
//! Each file found becomes one submission, analyzed in the language its
//! extension maps to.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include (e.g., ["js", "py"])
    pub extensions: Vec<String>,
    /// Directory or file names to skip (e.g., ["node_modules", ".git"])
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: usize,
    /// Maximum number of files to scan
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from(&crate::config::Config::default())
    }
}

impl From<&crate::config::Config> for ScanConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            extensions: config.scanner.extensions.clone(),
            excludes: config.scanner.excludes.clone(),
            max_file_size: config.limits.max_code_bytes,
            max_files: Some(config.scanner.max_files),
        }
    }
}

/// Scanned file information.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    /// Path relative to the scan root
    pub path: String,
    /// Path on disk
    pub full_path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Language the file is analyzed as
    pub language: String,
}

impl ScannedFile {
    pub fn read(&self) -> Result<String> {
        fs::read_to_string(&self.full_path)
            .with_context(|| format!("Failed to read {}", self.full_path.display()))
    }
}

/// Language for a file extension, if the analyzers know it.
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "py" | "pyw" => "python",
        "html" | "htm" => "html",
        "vue" => "vue",
        "svelte" => "svelte",
        "rb" => "ruby",
        "go" => "go",
        "java" => "java",
        "rs" => "rust",
        "php" => "php",
        "sh" | "bash" => "shell",
        _ => return None,
    };
    Some(language)
}

/// File scanner for discovering source files.
pub struct FileScanner {
    config: ScanConfig,
    root: PathBuf,
}

impl FileScanner {
    /// Create a new file scanner.
    pub fn new(root: PathBuf, config: ScanConfig) -> Self {
        Self { config, root }
    }

    /// Scan for all matching files, in path order.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        if !self.root.is_dir() {
            anyhow::bail!("Not a directory: {}", self.root.display());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file) = self.accept(&entry) {
                files.push(file);
                if self.config.max_files.is_some_and(|max| files.len() >= max) {
                    break;
                }
            }
        }

        debug!("Scanned {} files under {}", files.len(), self.root.display());
        Ok(files)
    }

    fn accept(&self, entry: &DirEntry) -> Option<ScannedFile> {
        let path = entry.path();
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            return None;
        }
        let language = language_for_path(path)?;

        let size = entry.metadata().ok()?.len();
        if size == 0 || size > self.config.max_file_size as u64 {
            debug!("Skipping {} ({} bytes)", path.display(), size);
            return None;
        }

        let rel_path = path.strip_prefix(&self.root).unwrap_or(path);
        Some(ScannedFile {
            path: rel_path.to_string_lossy().to_string(),
            full_path: path.to_path_buf(),
            size,
            language: language.to_string(),
        })
    }

    /// Hidden entries and configured names are skipped.
    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.config.excludes.iter().any(|pattern| name == pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path(Path::new("a/app.JSX")), Some("javascript"));
        assert_eq!(language_for_path(Path::new("main.py")), Some("python"));
        assert_eq!(language_for_path(Path::new("index.html")), Some("html"));
        assert_eq!(language_for_path(Path::new("README")), None);
        assert_eq!(language_for_path(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_scan_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/b.js", "let b = 1;");
        write(root, "src/a.py", "a = 1");
        write(root, "node_modules/dep/index.js", "module.exports = 1;");
        write(root, ".hidden/secret.js", "x");
        write(root, "notes.txt", "hello");
        write(root, "empty.js", "");

        let scanner = FileScanner::new(root.to_path_buf(), ScanConfig::default());
        let files = scanner.scan().unwrap();
        let paths: Vec<_> = files
            .iter()
            .map(|f| f.path.replace('\\', "/"))
            .collect();

        assert_eq!(paths, vec!["src/a.py", "src/b.js"]);
        assert_eq!(files[0].language, "python");
        assert_eq!(files[1].read().unwrap(), "let b = 1;");
    }

    #[test]
    fn test_scan_respects_limits() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.js", "let a = 1;");
        write(root, "b.js", &"x".repeat(64));
        write(root, "c.js", "let c = 1;");

        let config = ScanConfig {
            max_file_size: 32,
            max_files: Some(1),
            ..ScanConfig::default()
        };
        let files = FileScanner::new(root.to_path_buf(), config).scan().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.js");

        let config = ScanConfig {
            max_file_size: 32,
            max_files: None,
            ..ScanConfig::default()
        };
        let files = FileScanner::new(root.to_path_buf(), config).scan().unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.js", "c.js"]);
    }

    #[test]
    fn test_scan_missing_root() {
        let scanner = FileScanner::new(PathBuf::from("does/not/exist"), ScanConfig::default());
        assert!(scanner.scan().is_err());
    }
}
