use crate::error::IngestError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const NAME_SEPARATOR: &str = "__";
const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub stored_path: PathBuf,
    pub sha256: String,
    pub relative_path: String,
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn stored_name(sha256: &str, basename: &str) -> String {
    format!("{sha256}{NAME_SEPARATOR}{basename}")
}

fn partial_name(relative_path: &str) -> String {
    format!(".{relative_path}.{}{PARTIAL_SUFFIX}", std::process::id())
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self, bytes: &[u8], original_name: &str) -> Result<StoredFile, IngestError> {
        let basename = Path::new(original_name)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(original_name.to_string()))?;

        let sha256 = digest_bytes(bytes);
        let relative_path = stored_name(&sha256, basename);
        let stored_path = self.root.join(&relative_path);

        if stored_path.exists() {
            debug!(path = %stored_path.display(), "source copy already present");
        } else {
            self.write_atomically(&relative_path, &stored_path, bytes)
                .map_err(|error| IngestError::StoreWrite {
                    name: relative_path.clone(),
                    reason: error.to_string(),
                })?;
            info!(path = %stored_path.display(), "source copied to store");
        }

        Ok(StoredFile {
            stored_path,
            sha256,
            relative_path,
        })
    }

    // Readers only ever see complete copies under the canonical name.
    fn write_atomically(&self, relative_path: &str, target: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let partial = self.root.join(partial_name(relative_path));
        let written = fs::write(&partial, bytes).and_then(|_| fs::rename(&partial, target));
        if written.is_err() {
            let _ = fs::remove_file(&partial);
        }
        written
    }

    pub fn resolve(&self, metadata: &BTreeMap<String, String>) -> Option<PathBuf> {
        let hints = ResolveHints::from_metadata(metadata);
        RESOLVERS.iter().find_map(|(name, resolver)| {
            let found = resolver(self, &hints)?;
            debug!(strategy = name, path = %found.display(), "source resolved");
            Some(found)
        })
    }
}

#[derive(Debug, Default)]
struct ResolveHints {
    relative_path: Option<String>,
    basename: Option<String>,
    sha256: Option<String>,
}

impl ResolveHints {
    fn from_metadata(metadata: &BTreeMap<String, String>) -> Self {
        let non_empty = |key: &str| {
            metadata
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let basename = non_empty("source_basename").or_else(|| {
            non_empty("source").and_then(|source| {
                Path::new(&source)
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
            })
        });

        Self {
            relative_path: non_empty("source_relpath"),
            basename,
            sha256: non_empty("source_sha256"),
        }
    }
}

type Resolver = fn(&ContentStore, &ResolveHints) -> Option<PathBuf>;

const RESOLVERS: [(&str, Resolver); 4] = [
    ("relative_path", by_relative_path),
    ("canonical_name", by_canonical_name),
    ("wildcard_basename", by_wildcard_basename),
    ("bare_basename", by_bare_basename),
];

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

fn by_relative_path(store: &ContentStore, hints: &ResolveHints) -> Option<PathBuf> {
    let relative = hints.relative_path.as_deref()?;
    existing(store.root.join(relative)).or_else(|| existing(PathBuf::from(relative)))
}

fn by_canonical_name(store: &ContentStore, hints: &ResolveHints) -> Option<PathBuf> {
    let sha256 = hints.sha256.as_deref()?;
    let basename = hints.basename.as_deref()?;
    existing(store.root.join(stored_name(sha256, basename)))
}

fn by_wildcard_basename(store: &ContentStore, hints: &ResolveHints) -> Option<PathBuf> {
    if hints.sha256.is_some() {
        return None;
    }
    let suffix = format!("{NAME_SEPARATOR}{}", hints.basename.as_deref()?);

    WalkDir::new(&store.root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.len() > suffix.len() && name.ends_with(&suffix))
        })
        .map(|entry| entry.into_path())
}

fn by_bare_basename(store: &ContentStore, hints: &ResolveHints) -> Option<PathBuf> {
    existing(store.root.join(hints.basename.as_deref()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn metadata(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn identical_bytes_are_stored_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = ContentStore::new(dir.path().join("store"));

        let first = store.store(b"workbook bytes", "uploads/a/RFI.xlsx")?;
        let second = store.store(b"workbook bytes", "uploads/b/RFI.xlsx")?;

        assert_eq!(first, second);
        assert_eq!(first.relative_path, format!("{}__RFI.xlsx", first.sha256));
        assert_eq!(fs::read_dir(store.root())?.count(), 1);
        Ok(())
    }

    #[test]
    fn interrupted_write_leaves_no_canonical_copy() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = ContentStore::new(dir.path());
        let relative_path = stored_name(&digest_bytes(b"full workbook"), "RFI.xlsx");

        // Leftover of a copy cut short before the rename.
        let leftover = dir.path().join(partial_name(&relative_path));
        fs::write(&leftover, b"full wor")?;
        let by_basename = metadata(&[("source_basename", "RFI.xlsx")]);
        assert_eq!(store.resolve(&by_basename), None);

        let stored = store.store(b"full workbook", "RFI.xlsx")?;
        assert_eq!(fs::read(&stored.stored_path)?, b"full workbook");
        assert!(!leftover.exists());
        assert_eq!(store.resolve(&by_basename), Some(stored.stored_path));

        let names: Vec<String> = fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![relative_path]);
        Ok(())
    }

    #[test]
    fn existing_copy_is_not_rewritten() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = ContentStore::new(dir.path());
        let stored = store.store(b"v1", "F.xlsx")?;

        fs::write(&stored.stored_path, b"tampered")?;
        store.store(b"v1", "F.xlsx")?;
        assert_eq!(fs::read(&stored.stored_path)?, b"tampered");
        Ok(())
    }

    #[test]
    fn resolves_canonical_name_from_hash_and_basename() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = ContentStore::new(dir.path());
        let expected = dir.path().join("H__F.xlsx");
        fs::write(&expected, b"x")?;

        let lookup = metadata(&[("source_sha256", "H"), ("source_basename", "F.xlsx")]);
        assert_eq!(store.resolve(&lookup), Some(expected));

        let empty = tempdir()?;
        assert_eq!(ContentStore::new(empty.path()).resolve(&lookup), None);
        Ok(())
    }

    #[test]
    fn relative_path_takes_precedence() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = ContentStore::new(dir.path());
        fs::write(dir.path().join("H__F.xlsx"), b"canonical")?;
        fs::write(dir.path().join("other.xlsx"), b"relpath")?;

        let lookup = metadata(&[
            ("source_relpath", "other.xlsx"),
            ("source_sha256", "H"),
            ("source_basename", "F.xlsx"),
        ]);
        assert_eq!(store.resolve(&lookup), Some(dir.path().join("other.xlsx")));
        Ok(())
    }

    #[test]
    fn basename_only_uses_wildcard_then_bare_name() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = ContentStore::new(dir.path());
        let lookup = metadata(&[("source", "/data/in/F.xlsx")]);

        fs::write(dir.path().join("F.xlsx"), b"bare")?;
        assert_eq!(store.resolve(&lookup), Some(dir.path().join("F.xlsx")));

        fs::write(dir.path().join("abc__F.xlsx"), b"hashed")?;
        assert_eq!(store.resolve(&lookup), Some(dir.path().join("abc__F.xlsx")));
        Ok(())
    }

    #[test]
    fn unwritable_root_reports_store_write() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file")?;

        let result = ContentStore::new(&blocker).store(b"bytes", "F.xlsx");
        assert!(matches!(result, Err(IngestError::StoreWrite { .. })));
        Ok(())
    }
}
