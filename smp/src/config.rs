//! Profile store backed by a YAML file. Every load and every save goes through
//! `validate`, so an active namespace that has no profile never reaches disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::crypto::derive::{Options, DEFAULT_ALPHABET, DEFAULT_SIZE};

/// Name of the profile created by `smp init`.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Complexity flags given to the profile created by `smp init`.
pub const DEFAULT_COMPLEXITY: &str = "utc";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("config unreadable at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("config at {} is malformed: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("config encoding failed: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("invalid config: current namespace {0:?} has no profile")]
    Validate(String),
    #[error("namespace {0:?} not found")]
    ProfileNotFound(String),
    #[error("config write failed at {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Derivation policy and secret for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub secret: String,
    pub alphabet: String,
    pub size: i64,
    pub complexity: String,
}

impl Profile {
    /// Translates the stored policy into derivation options. The complexity
    /// string is scanned one character at a time; anything other than `u`,
    /// `t` or `c` is ignored and repeats are harmless.
    pub fn options(&self) -> Options {
        let mut options = Options {
            size: self.size,
            alphabet: self.alphabet.clone(),
            ..Options::default()
        };
        for flag in self.complexity.chars() {
            match flag {
                'u' => options.unique = true,
                't' => options.no_type_repetition = true,
                'c' => options.no_char_repetition = true,
                _ => {}
            }
        }
        options
    }
}

/// The persisted root: every profile plus the name of the active one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSet {
    #[serde(rename = "namespace")]
    pub current: String,
    #[serde(rename = "namespaces")]
    pub profiles: BTreeMap<String, Profile>,
}

impl ProfileSet {
    /// Builds the single-profile set written by a fresh `init`.
    pub fn new_default(secret: impl Into<String>) -> Self {
        let profile = Profile {
            secret: secret.into(),
            alphabet: DEFAULT_ALPHABET.to_string(),
            size: DEFAULT_SIZE,
            complexity: DEFAULT_COMPLEXITY.to_string(),
        };
        Self {
            current: DEFAULT_NAMESPACE.to_string(),
            profiles: BTreeMap::from([(DEFAULT_NAMESPACE.to_string(), profile)]),
        }
    }

    /// Reads, decodes and validates the profile set stored at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let set: ProfileSet = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        set.validate()?;
        debug!(path = %path.display(), namespace = %set.current, "config loaded");
        Ok(set)
    }

    /// Validates and writes the set to `path`. The encoded document goes to a
    /// freshly created sibling temporary file, is synced, and then renamed
    /// over the target, so an interrupted save leaves the previous file
    /// intact. An existing target keeps its permission bits.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        self.validate()?;
        let encoded = serde_yaml::to_string(self)?;

        replace_file(path, encoded.as_bytes()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), namespace = %self.current, "config saved");
        Ok(())
    }

    /// Succeeds iff the current namespace names an existing profile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.profiles.contains_key(&self.current) {
            Ok(())
        } else {
            Err(ConfigError::Validate(self.current.clone()))
        }
    }

    /// Switches the active namespace. An empty name leaves the set untouched,
    /// which lets callers pass an optional override straight through.
    pub fn set_current(&mut self, name: &str) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Ok(());
        }
        if !self.profiles.contains_key(name) {
            return Err(ConfigError::ProfileNotFound(name.to_string()));
        }
        self.current = name.to_string();
        Ok(())
    }

    pub fn current_profile(&self) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(&self.current)
            .ok_or_else(|| ConfigError::ProfileNotFound(self.current.clone()))
    }
}

/// The temporary file is created with create-new semantics under a random
/// name, so a planted file or symlink in the directory is never written
/// through. It is removed on drop if anything fails before `persist`.
fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    match fs::metadata(path) {
        Ok(existing) => tmp.as_file().set_permissions(existing.permissions())?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
