//! Creation and forced re-creation of the config file.
//!
//! An existing config is never overwritten silently: without `force` init
//! refuses, and with `force` the current bytes are first copied to a
//! timestamped sibling file. Nothing touches the original until that copy
//! has succeeded.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rand::{CryptoRng, RngCore};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, ProfileSet};
use crate::crypto::secrets::generate_secret;

/// `strftime` pattern embedded in backup file names (day.month.year-time).
pub const BACKUP_TIME_FORMAT: &str = "%d.%m.%y-%H:%M:%S";

#[derive(Debug, Error)]
pub enum InitError {
    #[error("config already exists at {} (use --force to reinitialize)", .0.display())]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to backup config to {}: {source}", path.display())]
    Backup { path: PathBuf, source: io::Error },
    #[error("unable to create config directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy)]
pub struct InitRequest<'a> {
    pub path: &'a Path,
    pub force: bool,
    /// Used verbatim when present and non-empty; otherwise a secret is generated.
    pub secret: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
}

/// Location of the backup taken at `now` for the config at `path`.
pub fn backup_path(path: &Path, now: NaiveDateTime) -> PathBuf {
    let name = format!(".backup.{}.yaml", now.format(BACKUP_TIME_FORMAT));
    match path.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Writes a fresh default config to `request.path`, backing up any valid
/// existing config first when `request.force` is set.
pub fn init<R: RngCore + CryptoRng>(
    request: &InitRequest<'_>,
    rng: &mut R,
    now: NaiveDateTime,
) -> Result<InitReport, InitError> {
    let path = request.path;
    let backup = match ProfileSet::open(path) {
        Ok(_) if !request.force => return Err(InitError::AlreadyExists(path.to_path_buf())),
        Ok(_) => Some(backup_config(path, now)?),
        Err(ConfigError::NotFound(_)) => None,
        Err(err) => return Err(err.into()),
    };

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| InitError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let secret = match request.secret.filter(|secret| !secret.is_empty()) {
        Some(secret) => secret.to_string(),
        None => {
            debug!("no secret supplied, generating one");
            generate_secret(rng)
        }
    };
    ProfileSet::new_default(secret).save(path)?;
    info!(path = %path.display(), "config created");

    Ok(InitReport {
        path: path.to_path_buf(),
        backup,
    })
}

/// Copies the config byte for byte, permission bits included. The target is
/// opened with create-new semantics so an earlier backup from the same second
/// is never clobbered.
fn backup_config(path: &Path, now: NaiveDateTime) -> Result<PathBuf, InitError> {
    let target = backup_path(path, now);
    let backup_err = |source: io::Error| InitError::Backup {
        path: target.clone(),
        source,
    };

    let mut source = File::open(path).map_err(backup_err)?;
    let mut dest = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .map_err(backup_err)?;
    let copied = source
        .metadata()
        .and_then(|meta| dest.set_permissions(meta.permissions()))
        .and_then(|_| io::copy(&mut source, &mut dest))
        .and_then(|_| dest.sync_all());
    if let Err(err) = copied {
        drop(dest);
        let _ = fs::remove_file(&target);
        return Err(backup_err(err));
    }

    info!(backup = %target.display(), "previous config backed up");
    Ok(target)
}
