//! File scanning and per-file analysis.
//!
//! Walks source files respecting .gitignore and runs Layers 1, 3 and 4 on
//! each. Files are independent at this stage, so analysis runs on the rayon
//! pool; call resolution happens later over the combined results.

use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

use super::types::FileAnalysis;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::flow;
use crate::parser::{extractor, parse_path, SupportedLanguage};
use crate::semantic::summary::hex;
use crate::storage::STATE_DIR;

/// Directories never scanned or watched.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    STATE_DIR,
    "__pycache__",
    ".venv",
    "dist",
    "build",
];

/// True when any component of `path` is an ignored directory.
pub fn should_ignore(path: &Path, extra: &[String]) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            IGNORED_DIRS.contains(&name.as_ref()) || extra.iter().any(|e| *e == name)
        }
        _ => false,
    })
}

/// Supported source files under `root`, as sorted paths relative to `root`.
pub fn scan(root: &Path, config: &Config) -> Vec<PathBuf> {
    let extra = config.ignored_dirs.clone();
    let mut files: Vec<PathBuf> = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .filter_entry(move |entry| !should_ignore(Path::new(entry.file_name()), &extra))
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| SupportedLanguage::from_path(entry.path()).is_some())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

/// Hex SHA-256 of file content.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

/// Bytes, hash and mtime of a project file, with the size limit applied.
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub hash: String,
    pub modified: u64,
}

pub fn read_file(root: &Path, rel: &Path, config: &Config) -> Result<FileContent> {
    let full = root.join(rel);
    let meta = fs::metadata(&full)?;
    if meta.len() > config.max_file_bytes {
        return Err(StrataError::FileTooLarge {
            path: rel.to_path_buf(),
            size: meta.len(),
        });
    }
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let bytes = fs::read(&full)?;
    let hash = hash_bytes(&bytes);
    Ok(FileContent { bytes, hash, modified })
}

/// Run Layers 1, 3 and 4 on one file's content.
pub fn analyze_source(rel: &Path, content: FileContent, preview_lines: usize) -> Result<FileAnalysis> {
    let tree = parse_path(rel, &content.bytes)?;
    let language = tree.language();
    let walked = extractor::walk(&tree, rel, preview_lines);
    let flows = walked
        .extraction
        .units
        .iter()
        .zip(&walked.nodes)
        .map(|(unit, node)| unit.kind.is_callable().then(|| flow::analyze(&tree, *node)))
        .collect();

    debug!(
        file = %rel.display(),
        units = walked.extraction.units.len(),
        calls = walked.extraction.calls.len(),
        "analyzed file"
    );

    Ok(FileAnalysis {
        path: rel.to_path_buf(),
        language,
        hash: content.hash,
        modified: content.modified,
        extraction: walked.extraction,
        flows,
    })
}

/// Analyze many files in parallel. Results keep the input order.
pub fn analyze_files(files: Vec<(PathBuf, FileContent)>, preview_lines: usize) -> Vec<(PathBuf, Result<FileAnalysis>)> {
    files
        .into_par_iter()
        .map(|(rel, content)| {
            let result = analyze_source(&rel, content, preview_lines);
            (rel, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_scan_skips_ignored_and_unsupported() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        fs::create_dir_all(root.join("vendored")).unwrap();
        fs::write(root.join("src/a.py"), "def a():\n    pass\n").unwrap();
        fs::write(root.join("src/notes.txt"), "hello").unwrap();
        fs::write(root.join("node_modules/dep/x.js"), "function x() {}").unwrap();
        fs::write(root.join("vendored/v.go"), "package v\n").unwrap();

        let mut config = Config::default();
        config.ignored_dirs = vec!["vendored".into()];
        assert_eq!(scan(root, &config), vec![PathBuf::from("src/a.py")]);
    }

    #[test]
    fn test_analyze_source_runs_flow_for_callables() {
        let src = "class K:\n    def m(self, x):\n        if x:\n            return 1\n        return 2\n";
        let content = FileContent {
            bytes: src.as_bytes().to_vec(),
            hash: hash_bytes(src.as_bytes()),
            modified: 0,
        };
        let analysis = analyze_source(Path::new("k.py"), content, 5).unwrap();
        assert_eq!(analysis.units().len(), 2);
        assert!(analysis.flows[0].is_none(), "classes have no flow");
        let (_, flow) = analysis.flow_for("K.m").or_else(|| analysis.flow_for("k.K.m")).unwrap();
        assert_eq!(flow.complexity(), 2);
    }

    #[test]
    fn test_binary_and_oversized_files_are_parse_errors() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("blob.py"), [0u8, 159, 146, 150]).unwrap();
        let config = Config::default();
        let content = read_file(dir.path(), Path::new("blob.py"), &config).unwrap();
        let err = analyze_source(Path::new("blob.py"), content, 5).unwrap_err();
        assert!(err.is_parse_error());

        let small = Config {
            max_file_bytes: 2,
            ..Config::default()
        };
        let err = read_file(dir.path(), Path::new("blob.py"), &small).err().unwrap();
        assert!(matches!(err, StrataError::FileTooLarge { .. }));
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
