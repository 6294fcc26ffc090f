//! Extraction into a fresh or reused directory.
//!
//! A persistent directory is trusted only when it is empty or when its
//! marker file holds the key of the archive being run. Anything else is
//! erased and extracted again. The marker is written last, so its presence
//! means a previous extraction completed.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt, symlink};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use tempfile::TempDir;

use super::codec::{EntryKind, EntryReader};
use super::layout::{KEY_FILE_NAME, Key};
use super::path::clean_relative;
use crate::error::Error;

/// Mode given to every extracted directory. Recorded directory modes are
/// ignored: read-only directories would break both extraction and cleanup.
const DIR_MODE: u32 = 0o755;

/// How the extraction directory was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    /// Fresh temporary directory, removed on cleanup.
    Ephemeral,
    /// Did not exist and was created.
    Created,
    /// Existed and was empty.
    Empty,
    /// Marker matches the current key; extraction is skipped.
    Reusable,
    /// Held foreign or stale content, which was erased.
    Cleaned,
}

enum Location {
    Temporary(TempDir),
    Persistent(PathBuf),
}

/// Counters for a finished extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub entries: usize,
    pub skipped: bool,
}

/// An extraction directory ready to receive the payload of one archive.
pub struct ExtractionDir {
    location: Location,
    state: DirState,
    key: Key,
}

impl ExtractionDir {
    /// Resolve the directory for the archive identified by `key`.
    ///
    /// Without a `target` a unique temporary directory is created. With one,
    /// the directory is created, accepted as is, marked for reuse, or emptied,
    /// depending on what it holds.
    pub fn prepare(target: Option<&Path>, key: Key) -> Result<Self> {
        let Some(target) = target else {
            let temp = tempfile::Builder::new()
                .prefix("selfextract")
                .tempdir()
                .context("creating temporary extraction directory")?;
            return Ok(Self {
                location: Location::Temporary(temp),
                state: DirState::Ephemeral,
                key,
            });
        };

        let state = inspect(target, &key)?;
        Ok(Self {
            location: Location::Persistent(target.to_path_buf()),
            state,
            key,
        })
    }

    pub fn path(&self) -> &Path {
        match &self.location {
            Location::Temporary(dir) => dir.path(),
            Location::Persistent(path) => path,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self.location, Location::Temporary(_))
    }

    pub fn state(&self) -> DirState {
        self.state
    }

    /// Unpack `payload` unless the directory already holds this archive.
    ///
    /// On failure everything written so far is erased before the error is
    /// returned. On success the marker file is written last.
    pub fn extract<R: Read>(&self, payload: R) -> Result<ExtractReport> {
        let root = self.path();
        debug!("using extraction dir {}", root.display());

        if self.state == DirState::Reusable {
            debug!("skipping extraction");
            return Ok(ExtractReport {
                entries: 0,
                skipped: true,
            });
        }

        let entries = match unpack(root, payload) {
            Ok(entries) => entries,
            Err(err) => {
                if let Err(cleanup) = clear_dir(root) {
                    return Err(err.context(format!(
                        "got error while cleaning up after failed extraction: {cleanup}"
                    )));
                }
                return Err(err);
            }
        };

        fs::write(root.join(KEY_FILE_NAME), self.key.to_hex()).context("writing key file")?;
        debug!("extracted {entries} entries");

        Ok(ExtractReport {
            entries,
            skipped: false,
        })
    }

    /// Remove the directory if it is temporary. Failures are only logged.
    pub fn cleanup(self) {
        if let Location::Temporary(dir) = self.location {
            debug!("removing extraction dir");
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                debug!("removing {} failed: {err}", path.display());
            }
        }
    }
}

/// Classify a persistent extraction directory, creating or emptying it as
/// needed.
///
/// # Arguments
///
/// * `dir` - The configured extraction directory
/// * `key` - Identity of the archive being run
///
/// # Returns
///
/// - [`DirState::Created`] when `dir` did not exist
/// - [`DirState::Empty`] when it exists with nothing in it
/// - [`DirState::Reusable`] when its marker file holds `key`
/// - [`DirState::Cleaned`] when its contents were erased
///
/// A path that is not a directory or a marker that cannot be read is an error.
fn inspect(dir: &Path, key: &Key) -> Result<DirState> {
    let metadata = match fs::metadata(dir) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(dir)
                .with_context(|| format!("creating extraction directory {}", dir.display()))?;
            return Ok(DirState::Created);
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("inspecting extraction directory {}", dir.display()));
        }
    };

    // Never erase anything that is not a directory
    if !metadata.is_dir() {
        return Err(Error::NotADirectory {
            path: dir.to_path_buf(),
        }
        .into());
    }

    let first = fs::read_dir(dir)
        .and_then(|mut entries| entries.next().transpose())
        .context("listing extraction dir")?;
    if first.is_none() {
        return Ok(DirState::Empty);
    }

    // Non-empty: only a matching marker makes the content trustworthy
    match fs::read(dir.join(KEY_FILE_NAME)) {
        Ok(marker) if key.matches_marker(&String::from_utf8_lossy(&marker)) => {
            debug!("extraction dir has matching key");
            return Ok(DirState::Reusable);
        }
        Ok(_) => debug!("key doesn't match, cleaning extraction dir"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("no key file, cleaning extraction dir");
        }
        Err(err) => return Err(err).context("reading key file"),
    }

    clear_dir(dir).context("cleaning extraction dir")?;
    Ok(DirState::Cleaned)
}

/// Remove the contents of a directory but not the directory itself.
fn clear_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Unpack every entry of `payload` below `root`.
///
/// # Arguments
///
/// * `root` - Extraction directory, already created
/// * `payload` - The compressed entry stream
///
/// # Returns
///
/// The number of entries written. A zero-length payload holds no entries.
fn unpack<R: Read>(root: &Path, payload: R) -> Result<usize> {
    // The gzip decoder rejects an empty stream, so check for one first
    let mut payload = BufReader::new(payload);
    if payload
        .fill_buf()
        .context("reading embedded archive")?
        .is_empty()
    {
        debug!("empty payload");
        return Ok(0);
    }

    let mut reader = EntryReader::new(payload);
    let mut count = 0;

    for entry in reader.entries().context("reading embedded archive")? {
        let mut entry = entry.context("reading embedded archive")?;
        let name = clean_relative(entry.path()).ok_or_else(|| Error::UnsafePath {
            path: entry.path().to_path_buf(),
        })?;
        if name.as_os_str().is_empty() {
            continue;
        }
        let target = root.join(&name);

        // Ancestors are checked for symlinks before anything is written
        match entry.kind().clone() {
            EntryKind::File => {
                debug!("extracting file {} of size {}", name.display(), entry.size());
                create_parents(root, &name)?;
                remove_existing(&target)?;
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)
                    .with_context(|| format!("creating file {}", name.display()))?;
                io::copy(&mut entry, &mut file)
                    .with_context(|| format!("writing file {}", name.display()))?;
                file.set_permissions(fs::Permissions::from_mode(entry.mode()))
                    .with_context(|| format!("setting mode of file {}", name.display()))?;
            }
            EntryKind::Directory => {
                debug!("creating directory {}", name.display());
                create_parents(root, &name)?;
                create_dir(&target)
                    .with_context(|| format!("creating directory {}", name.display()))?;
            }
            EntryKind::Symlink(link) => {
                debug!("creating symlink {}", name.display());
                create_parents(root, &name)?;
                remove_existing(&target)?;
                symlink(&link, &target)
                    .with_context(|| format!("creating symlink {}", name.display()))?;
            }
            EntryKind::Unsupported(kind) => {
                return Err(Error::UnsupportedEntry { path: name, kind }.into());
            }
        }
        count += 1;
    }

    Ok(count)
}

/// Drop a file or symlink left by an earlier entry with the same path.
///
/// The link itself is removed, never what it points to. Directories are left
/// alone and make the following create fail.
fn remove_existing(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(metadata) if !metadata.is_dir() => {
            debug!("replacing {}", target.display());
            fs::remove_file(target)
                .with_context(|| format!("replacing {}", target.display()))
        }
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("inspecting {}", target.display())),
    }
}

/// Create the missing ancestors of `name` below `root`.
///
/// Refuses to descend through a symlink, which could point anywhere.
fn create_parents(root: &Path, name: &Path) -> Result<()> {
    let Some(parent) = name.parent() else {
        return Ok(());
    };

    let mut current = root.to_path_buf();
    for component in parent.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(Error::UnsafePath {
                    path: name.to_path_buf(),
                }
                .into());
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                create_dir(&current)
                    .with_context(|| format!("creating directory {}", current.display()))?;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("inspecting {}", current.display()));
            }
        }
    }
    Ok(())
}

fn create_dir(path: &Path) -> io::Result<()> {
    match fs::DirBuilder::new().mode(DIR_MODE).create(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let metadata = fs::symlink_metadata(path)?;
            // Never erase anything that is not a directory
    if !metadata.is_dir() {
                return Err(err);
            }
        }
        Err(err) => return Err(err),
    }
    // DirBuilder is subject to the umask.
    fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))
}
