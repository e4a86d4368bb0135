//! Filesystem side of the pipelines.
//!
//! - **Staged writes**: output goes to `<dest>.tmp.<random>` first and only
//!   reaches the final name by rename (or a no-clobber link), so a crash
//!   never leaves a half-written destination.
//! - **Cleanup**: a [`StagedFile`] removes its temp path on drop unless it
//!   was published, which covers every early return.
//! - **Permission hardening**: on Unix, sensitive outputs are created 0o600.
//! - **Source removal**: optional best-effort overwrite before unlinking.
//!
//! # Limitations
//!
//! Overwriting before delete is best-effort. SSD wear-leveling, CoW
//! filesystems and journals may all retain old blocks.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::crypto;
use crate::error::{Error, Result};

/// Fail early if `dest` exists and overwriting is not allowed.
pub fn ensure_writable(dest: &Path, force_overwrite: bool) -> Result<()> {
    if !force_overwrite && dest.exists() {
        return Err(Error::DestinationExists(dest.to_path_buf()));
    }
    Ok(())
}

/// Per-invocation temp path next to `dest`. The random suffix keeps
/// parallel runs from colliding.
fn temp_path_for(dest: &Path) -> Result<PathBuf> {
    let suffix: [u8; 8] = crypto::random_bytes()?;
    let suffix: String = suffix.iter().map(|b| format!("{b:02x}")).collect();
    let mut name = dest.as_os_str().to_owned();
    name.push(format!(".tmp.{suffix}"));
    Ok(PathBuf::from(name))
}

/// A fully written temp file that has not reached its final name yet.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    published: bool,
}

impl StagedFile {
    /// Write `data` to a fresh temp file beside `dest` and fsync it.
    pub fn stage(dest: &Path, data: &[u8], sensitive: bool) -> Result<Self> {
        let path = temp_path_for(dest)?;

        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true); // never reuse an existing path
        #[cfg(unix)]
        if sensitive {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        #[cfg(not(unix))]
        let _ = sensitive;

        let mut file = opts.open(&path).map_err(|e| Error::io(&path, e))?;
        // From here on the guard owns cleanup.
        let staged = Self {
            path,
            published: false,
        };
        file.write_all(data)
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::io(&staged.path, e))?;
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_back(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| Error::io(&self.path, e))
    }

    /// Move the staged file to `dest`.
    ///
    /// Without `force_overwrite` this links instead of renaming, so a file
    /// that appeared at `dest` after [`ensure_writable`] is never clobbered.
    pub fn publish(mut self, dest: &Path, force_overwrite: bool) -> Result<()> {
        if force_overwrite {
            replace(&self.path, dest).map_err(|e| Error::io(dest, e))?;
            self.published = true;
            return Ok(());
        }

        // After a link the temp name is still ours to drop; after a rename
        // it is gone.
        if publish_no_clobber(&self.path, dest, |from, to| fs::hard_link(from, to))?
            == Publish::Renamed
        {
            self.published = true;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Publish {
    Linked,
    Renamed,
}

/// Link `from` to `dest` without replacing anything. Filesystems with no
/// hard links (vfat, exFAT, many SMB mounts) report `PermissionDenied` or
/// `Unsupported`; there the destination is re-checked and a rename used.
fn publish_no_clobber(
    from: &Path,
    dest: &Path,
    link: fn(&Path, &Path) -> std::io::Result<()>,
) -> Result<Publish> {
    match link(from, dest) {
        Ok(()) => Ok(Publish::Linked),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(Error::DestinationExists(dest.to_path_buf()))
        }
        Err(e) if matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::Unsupported) => {
            tracing::debug!(error = %e, "hard link unavailable, falling back to rename");
            if fs::symlink_metadata(dest).is_ok() {
                return Err(Error::DestinationExists(dest.to_path_buf()));
            }
            fs::rename(from, dest).map_err(|e| Error::io(dest, e))?;
            Ok(Publish::Renamed)
        }
        Err(e) => Err(Error::io(dest, e)),
    }
}

/// Rename over `dest`.
#[cfg(not(windows))]
fn replace(from: &Path, dest: &Path) -> std::io::Result<()> {
    fs::rename(from, dest)
}

/// Rename over `dest`. Windows may refuse to rename onto an existing file,
/// so on failure the destination is removed and the rename retried once.
#[cfg(windows)]
fn replace(from: &Path, dest: &Path) -> std::io::Result<()> {
    if let Err(first) = fs::rename(from, dest) {
        let _ = fs::remove_file(dest);
        fs::rename(from, dest).map_err(|retry| {
            std::io::Error::new(
                retry.kind(),
                format!("rename failed (initial: {first}, retry: {retry})"),
            )
        })?;
    }
    Ok(())
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.published {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove temp file");
                }
            }
        }
    }
}

/// Stage and publish in one step.
pub fn write_atomic(dest: &Path, data: &[u8], sensitive: bool, force_overwrite: bool) -> Result<()> {
    StagedFile::stage(dest, data, sensitive)?.publish(dest, force_overwrite)
}

/// Remove a processed source file, optionally overwriting it first.
///
/// `passes` deterministic pattern passes (capped at 5) are followed by one
/// random pass. `0` unlinks without overwriting.
pub fn remove_source(path: &Path, passes: usize) -> Result<()> {
    if passes == 0 {
        return fs::remove_file(path).map_err(|e| Error::io(path, e));
    }

    let size = fs::metadata(path).map_err(|e| Error::io(path, e))?.len() as usize;
    if size > 0 {
        let patterns: &[u8] = &[0x00, 0xFF, 0xAA, 0x55, 0x00];
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        for &pattern in &patterns[..passes.min(patterns.len())] {
            overwrite_pass(&mut file, &vec![pattern; size]).map_err(|e| Error::io(path, e))?;
        }

        let mut random = vec![0u8; size];
        getrandom::getrandom(&mut random).map_err(|e| Error::Rng(e.to_string()))?;
        overwrite_pass(&mut file, &random).map_err(|e| Error::io(path, e))?;

        file.set_len(0).map_err(|e| Error::io(path, e))?;
        file.sync_all().map_err(|e| Error::io(path, e))?;
    }

    fs::remove_file(path).map_err(|e| Error::io(path, e))
}

fn overwrite_pass(file: &mut fs::File, buf: &[u8]) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::Start(0))?;
    file.write_all(buf)?;
    file.sync_all()
}
