//! Flat `KEY=VALUE` store backing a deployment's `.env` file.
//!
//! The store is the only component allowed to touch the file. Writes follow
//! one rule: an existing line for the key is removed and the new line is
//! appended at the end, so repeated runs converge to exactly one live line per
//! key. Values are stored verbatim after the first `=`; nothing is quoted or
//! escaped.
//!
//! Writing to a store whose file does not exist yet is a silent no-op. The
//! caller decides when a deployment has a store (see
//! [`EnvStore::create_if_missing`]).

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EnvStoreError {
    #[error("failed to read env file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write env file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid env key `{key}`")]
    InvalidKey { key: String },
    #[error("value for {key} contains a line break")]
    MultilineValue { key: String },
}

/// Result of a single [`EnvStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// No line existed; a new one was appended.
    Appended,
    /// Prior line(s) removed and the new value appended.
    Replaced,
    /// Exactly one line already held this value.
    Unchanged,
    /// The env file does not exist; nothing was written.
    SkippedMissingStore,
}

/// Summary of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub skipped_missing_store: bool,
    pub appended: Vec<String>,
    pub replaced: Vec<String>,
    pub unchanged: Vec<String>,
}

impl BatchOutcome {
    pub fn changed(&self) -> bool {
        !self.appended.is_empty() || !self.replaced.is_empty()
    }
}

/// Handle to one deployment's env file.
#[derive(Debug, Clone)]
pub struct EnvStore {
    path: PathBuf,
}

impl EnvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create an empty store (and parent directories). Returns `true` when the
    /// file was created by this call.
    pub fn create_if_missing(&self) -> Result<bool, EnvStoreError> {
        if self.exists() {
            return Ok(false);
        }
        if let Some(parent) = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent).map_err(|source| {
                EnvStoreError::Write {
                    path: parent.to_path_buf(),
                    source,
                }
            })?;
        }
        fs::write(&self.path, b"").map_err(|source| EnvStoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(env_file = %self.path.display(), "Created empty env file");
        Ok(true)
    }

    /// Parse every `KEY=VALUE` line. A missing file yields an empty map.
    pub fn load_all(&self) -> Result<HashMap<String, String>, EnvStoreError> {
        match self.read_raw()? {
            Some(contents) => Ok(parse_env_contents(&contents)),
            None => Ok(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, EnvStoreError> {
        Ok(self.load_all()?.remove(key))
    }

    pub fn set(
        &self,
        key: &str,
        value: &str,
    ) -> Result<SetOutcome, EnvStoreError> {
        validate_pair(key, value)?;
        let Some(contents) = self.read_raw()? else {
            debug!(
                env_file = %self.path.display(),
                key,
                "Env file missing; skipping write"
            );
            return Ok(SetOutcome::SkippedMissingStore);
        };

        let (next, outcome) = apply_set(&contents, key, value);
        if outcome != SetOutcome::Unchanged {
            self.replace_file(&next)?;
        }
        Ok(outcome)
    }

    /// Apply every pair in order with a single file replacement, so readers
    /// never observe half of the batch. Validation happens up front: one bad
    /// pair rejects the whole batch.
    pub fn set_many<K, V>(
        &self,
        pairs: &[(K, V)],
    ) -> Result<BatchOutcome, EnvStoreError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            validate_pair(key.as_ref(), value.as_ref())?;
        }

        let mut batch = BatchOutcome::default();
        let Some(mut contents) = self.read_raw()? else {
            debug!(
                env_file = %self.path.display(),
                count = pairs.len(),
                "Env file missing; skipping batch write"
            );
            batch.skipped_missing_store = true;
            return Ok(batch);
        };

        for (key, value) in pairs {
            let key = key.as_ref();
            let (next, outcome) = apply_set(&contents, key, value.as_ref());
            contents = next;
            match outcome {
                SetOutcome::Appended => batch.appended.push(key.to_string()),
                SetOutcome::Replaced => batch.replaced.push(key.to_string()),
                SetOutcome::Unchanged => batch.unchanged.push(key.to_string()),
                SetOutcome::SkippedMissingStore => {}
            }
        }

        if batch.changed() {
            self.replace_file(&contents)?;
        }
        debug!(
            env_file = %self.path.display(),
            appended = batch.appended.len(),
            replaced = batch.replaced.len(),
            unchanged = batch.unchanged.len(),
            "Applied env batch"
        );
        Ok(batch)
    }

    fn read_raw(&self) -> Result<Option<String>, EnvStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EnvStoreError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Write through a sibling temp file and rename over the original,
    /// keeping the original permissions.
    fn replace_file(&self, contents: &str) -> Result<(), EnvStoreError> {
        let write_err = |source| EnvStoreError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(contents.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(tmp.path(), meta.permissions())
                .map_err(write_err)?;
        }
        tmp.persist(&self.path).map_err(|err| write_err(err.error))?;
        Ok(())
    }
}

/// Parse env contents into a map. Comments and lines without `=` are ignored;
/// a key that appears twice resolves to its last occurrence.
pub fn parse_env_contents(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        if let Some((key, value)) = split_entry(line) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

/// Pure form of [`EnvStore::set`] over in-memory contents.
pub fn apply_set(contents: &str, key: &str, value: &str) -> (String, SetOutcome) {
    let mut matches = contents
        .lines()
        .filter(|line| split_entry(line).is_some_and(|(k, _)| k == key));
    let first = matches.next();
    let more = matches.next().is_some();

    if let Some(line) = first
        && !more
        && split_entry(line).is_some_and(|(_, v)| v == value)
    {
        return (contents.to_string(), SetOutcome::Unchanged);
    }

    let mut next = String::with_capacity(contents.len() + key.len() + value.len() + 2);
    for line in contents.lines() {
        if split_entry(line).is_some_and(|(k, _)| k == key) {
            continue;
        }
        next.push_str(line);
        next.push('\n');
    }
    // `lines()` above already normalised the trailing newline, so appending
    // can never merge into the previous entry.
    next.push_str(key);
    next.push('=');
    next.push_str(value);
    next.push('\n');

    let outcome = if first.is_some() {
        SetOutcome::Replaced
    } else {
        SetOutcome::Appended
    };
    (next, outcome)
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim_end();
    if key.is_empty() {
        return None;
    }
    Some((key, value.strip_suffix('\r').unwrap_or(value)))
}

fn validate_pair(key: &str, value: &str) -> Result<(), EnvStoreError> {
    let bad_key = key.is_empty()
        || key.starts_with('#')
        || key.chars().any(|c| c == '=' || c.is_whitespace());
    if bad_key {
        return Err(EnvStoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    if value.contains('\n') || value.contains('\r') {
        return Err(EnvStoreError::MultilineValue {
            key: key.to_string(),
        });
    }
    Ok(())
}
