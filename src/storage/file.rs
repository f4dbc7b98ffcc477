//! JSON-document backed [`KeyValueStore`].
//!
//! The whole store is one JSON object `{ key: value }`.  It is read once on
//! open and rewritten on every `set` through a temp file in the same
//! directory followed by a rename, so a crash never leaves a half-written
//! document behind.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use super::KeyValueStore;

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`.  A missing file is an empty store; a file
    /// that is not a JSON object of strings is an error.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse state file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("state file does not exist yet, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read state file: {}", path.display()))
            }
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create state directory: {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .context("failed to create temporary state file")?;
        serde_json::to_writer_pretty(&mut tmp, values).context("failed to encode state")?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;
        // Memory only changes once the document on disk does.
        let mut updated = values.clone();
        updated.insert(key.to_string(), value.to_string());
        self.persist(&updated)?;
        *values = updated;
        debug!(key, path = %self.path.display(), "state value written");
        Ok(())
    }
}
