//! Local tree walk.
//!
//! Produces the relative path to signature map of a context directory.
//! Files are signed `<size>-<sha256 hex>`, directories with [`DIR_SIGNATURE`].

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SyncError};
use crate::state::STATE_DIR;

/// Ignore file read from the context directory.
pub const IGNORE_FILE: &str = ".kdoignore";

/// Signature recorded for directories.
pub const DIR_SIGNATURE: &str = "dir";

/// Relative path to signature.
pub type FileSet = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Dir(String),
    Suffix(String),
    Name(String),
}

/// Paths excluded from sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::new([".git", STATE_DIR])
    }
}

impl IgnoreRules {
    /// Builds rules from ignore-file style patterns.
    ///
    /// Blank lines and `#` comments are skipped.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .filter_map(|pattern| {
                let pattern = pattern.as_ref().trim();
                if pattern.is_empty() || pattern.starts_with('#') {
                    return None;
                }
                let rule = if let Some(dir) = pattern.strip_suffix('/') {
                    Rule::Dir(dir.trim_start_matches("./").to_string())
                } else if let Some(suffix) = pattern.strip_prefix('*') {
                    Rule::Suffix(suffix.to_string())
                } else {
                    Rule::Name(pattern.trim_start_matches("./").to_string())
                };
                Some(rule)
            })
            .collect();
        Self { rules }
    }

    /// Loads the default rules plus the context's ignore file, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the ignore file exists but cannot be read.
    pub fn load(root: &Path) -> Result<Self> {
        let mut rules = Self::default();
        let path = root.join(IGNORE_FILE);
        if path.is_file() {
            let content = std::fs::read_to_string(&path).map_err(|e| SyncError::Walk {
                path: path.clone(),
                message: e.to_string(),
            })?;
            rules.rules.extend(Self::new(content.lines()).rules);
            debug!("Loaded ignore rules from {}", path.display());
        }
        Ok(rules)
    }

    /// Returns true if the relative path is excluded.
    #[must_use]
    pub fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        let name = rel.rsplit('/').next().unwrap_or(rel);
        self.rules.iter().any(|rule| match rule {
            Rule::Dir(dir) => is_dir && (name == dir || rel == dir),
            Rule::Suffix(suffix) => name.ends_with(suffix.as_str()),
            Rule::Name(pattern) => name == pattern || rel == pattern,
        })
    }
}

/// Walks `root` and signs every path not excluded by `rules`.
///
/// # Errors
///
/// Returns a [`SyncError::Walk`] if the tree cannot be read.
pub fn scan(root: &Path, rules: &IgnoreRules) -> Result<FileSet> {
    let walk_error = |path: &Path, message: String| SyncError::Walk {
        path: path.to_path_buf(),
        message,
    };

    let mut files = FileSet::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !excluded(root, rules, entry));

    for entry in walker {
        let entry = entry.map_err(|e| walk_error(root, e.to_string()))?;
        let Some(rel) = relative(root, entry.path())? else {
            continue;
        };

        let signature = if entry.file_type().is_dir() {
            DIR_SIGNATURE.to_string()
        } else if entry.file_type().is_file() {
            sign(entry.path()).map_err(|e| walk_error(entry.path(), e.to_string()))?
        } else {
            trace!("Skipping special file {rel}");
            continue;
        };
        files.insert(rel, signature);
    }

    debug!("Scanned {} path(s) under {}", files.len(), root.display());
    Ok(files)
}

fn excluded(root: &Path, rules: &IgnoreRules, entry: &DirEntry) -> bool {
    // Unreadable names are kept so the walk reports them.
    matches!(
        relative(root, entry.path()),
        Ok(Some(rel)) if rules.is_ignored(&rel, entry.file_type().is_dir())
    )
}

/// Relative path with `/` separators, `None` for the root itself.
///
/// # Errors
///
/// Returns a [`SyncError::Walk`] naming the path if a component is not
/// valid UTF-8, since it could not be addressed remotely.
fn relative(root: &Path, path: &Path) -> std::result::Result<Option<String>, SyncError> {
    let Ok(rel) = path.strip_prefix(root) else {
        return Ok(None);
    };
    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            let part = part.to_str().ok_or_else(|| SyncError::Walk {
                path: path.to_path_buf(),
                message: "path is not valid UTF-8".to_string(),
            })?;
            parts.push(part);
        }
    }
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

/// Computes the `<size>-<sha256 hex>` signature of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn sign(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{}-{}", bytes.len(), hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/left-pad")).unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::write(dir.path().join("src/index.js"), "console.log(1)").unwrap();
        fs::write(dir.path().join("src/lib/util.js"), "module.exports = {}").unwrap();
        fs::write(dir.path().join("src/debug.log"), "noise").unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(dir.path().join("node_modules/left-pad/index.js"), "").unwrap();
        dir
    }

    #[test]
    fn test_scan_signs_files_and_dirs() {
        let dir = tree();
        let files = scan(dir.path(), &IgnoreRules::default()).unwrap();

        assert_eq!(files.get("src").map(String::as_str), Some(DIR_SIGNATURE));
        assert_eq!(
            files.get("package.json").map(String::as_str),
            Some("2-44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a")
        );
        assert!(files.contains_key("src/lib/util.js"));
        assert!(!files.keys().any(|k| k.starts_with(".git")));
    }

    #[test]
    fn test_ignore_file_rules() {
        let dir = tree();
        fs::write(dir.path().join(IGNORE_FILE), "# deps\nnode_modules/\n*.log\n").unwrap();
        let rules = IgnoreRules::load(dir.path()).unwrap();
        let files = scan(dir.path(), &rules).unwrap();

        assert!(!files.keys().any(|k| k.starts_with("node_modules")));
        assert!(!files.contains_key("src/debug.log"));
        assert!(files.contains_key("src/index.js"));
    }

    #[test]
    fn test_rule_kinds() {
        let rules = IgnoreRules::new(["build/", "*.tmp", "secret.env", "docs/draft.md"]);
        assert!(rules.is_ignored("build", true));
        assert!(!rules.is_ignored("build", false));
        assert!(rules.is_ignored("a/b/c.tmp", false));
        assert!(rules.is_ignored("config/secret.env", false));
        assert!(rules.is_ignored("docs/draft.md", false));
        assert!(!rules.is_ignored("draft.md", false));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_fails_the_walk() {
        use crate::error::KdoError;
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tree();
        let bad = dir.path().join("src").join(OsStr::from_bytes(b"caf\xe9.js"));
        fs::write(&bad, "x").unwrap();

        let err = scan(dir.path(), &IgnoreRules::default()).unwrap_err();
        match err {
            KdoError::Sync(SyncError::Walk { path, message }) => {
                assert_eq!(path, bad);
                assert!(message.contains("UTF-8"));
            }
            other => panic!("expected walk error, got {other:?}"),
        }
    }

    #[test]
    fn test_signature_changes_with_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "one").unwrap();
        let first = sign(&path).unwrap();
        fs::write(&path, "two").unwrap();
        assert_ne!(first, sign(&path).unwrap());
        assert!(first.starts_with("3-"));
    }
}
