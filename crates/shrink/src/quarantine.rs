//! Quarantine lifecycle for originals.
//!
//! Before scheduling, [`prepare`] sizes the run and creates
//! `<prefix>-<YYYYMMDD>-<plannedBytes>` when originals are to be kept. During
//! the run successful jobs move their originals into it. Deleting a quarantine
//! directory is a separate, explicitly confirmed operation ([`purge_quarantine`]).

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;
use crate::candidate::CandidateSet;
use crate::config::{is_filesystem_safe, ShrinkConfig};
use crate::error::ShrinkError;

/// Directory holding originals whose compressed replacement succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineDirectory {
    pub path: PathBuf,
    /// False when a same-named directory from an earlier run was reused
    pub created: bool,
}

/// File count and total size of a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Occupancy {
    pub files: u64,
    pub bytes: u64,
}

/// A quarantine directory found under the quarantine root
#[derive(Debug, Clone, Serialize)]
pub struct QuarantineListing {
    pub name: String,
    pub occupancy: Occupancy,
}

/// `<prefix>-<YYYYMMDD>-<bytes>`
pub fn quarantine_name(prefix: &str, date: NaiveDate, planned_bytes: u64) -> String {
    format!("{}-{}-{}", prefix, date.format("%Y%m%d"), planned_bytes)
}

/// Whether `name` has the exact shape of a quarantine directory for `prefix`
pub fn is_quarantine_name(prefix: &str, name: &str) -> bool {
    let pattern = format!(r"^{}-\d{{8}}-\d+$", regex::escape(prefix));
    Regex::new(&pattern)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Sum of original sizes of the candidates this run will actually compress.
///
/// Files already bearing the compressed suffix and files that vanished are
/// excluded; candidates whose output exists count only when `force` is set.
pub fn planned_process_bytes(candidates: &CandidateSet, force: bool) -> u64 {
    candidates
        .iter()
        .filter(|c| !c.is_already_compressed())
        .filter(|c| force || !c.output_path().exists())
        .filter_map(|c| fs::metadata(&c.path).ok())
        .map(|m| m.len())
        .sum()
}

/// Decide whether this run needs a quarantine directory and create it.
///
/// Returns `None` for dry runs, when originals are deleted, when nothing will
/// be processed, or when the directory cannot be created (originals are then
/// retained in place).
pub fn prepare(cfg: &ShrinkConfig, candidates: &CandidateSet, today: NaiveDate) -> Option<QuarantineDirectory> {
    if cfg.dry_run || cfg.delete_originals {
        return None;
    }

    let planned = planned_process_bytes(candidates, cfg.force);
    if planned == 0 {
        debug!("Nothing to process, no quarantine directory needed");
        return None;
    }

    let name = quarantine_name(&cfg.quarantine_prefix, today, planned);
    let path = cfg.quarantine_root.join(&name);
    let existed = path.is_dir();

    match fs::create_dir_all(&path) {
        Ok(()) => {
            if existed {
                info!("Reusing quarantine directory {}", path.display());
            } else {
                info!("Created quarantine directory {}", path.display());
            }
            Some(QuarantineDirectory {
                path,
                created: !existed,
            })
        }
        Err(e) => {
            warn!(
                "Failed to create quarantine directory {}: {}. Originals will be kept in place.",
                path.display(),
                e
            );
            None
        }
    }
}

impl QuarantineDirectory {
    /// Where `source` lands inside the quarantine, keeping its relative layout
    pub fn destination_for(&self, source: &Path) -> PathBuf {
        let relative: PathBuf = source
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        self.path.join(relative)
    }

    /// Move an original into the quarantine and return its new location.
    ///
    /// Files already in the quarantine are never replaced: when the natural
    /// destination is taken, the original gets a numbered name instead
    /// (`a.png` becomes `a.1.png`, then `a.2.png`, ...).
    pub fn admit(&self, source: &Path) -> Result<PathBuf> {
        let dest = self.destination_for(source);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let dest = reserve_destination(&dest)?;
        if let Err(e) = move_file(source, &dest) {
            if let Err(cleanup) = fs::remove_file(&dest) {
                if !is_not_found(&cleanup) {
                    warn!("Failed to remove placeholder {}: {}", dest.display(), cleanup);
                }
            }
            return Err(e);
        }
        Ok(dest)
    }

    pub fn occupancy(&self) -> Occupancy {
        occupancy(&self.path)
    }
}

const MAX_NUMBERED_NAMES: u32 = 10_000;

/// `dir/a.png` -> `dir/a.<n>.png`
fn numbered_name(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}.{}", stem, n),
    };
    path.with_file_name(name)
}

/// Claim a free path at or next to `wanted` by creating an empty placeholder.
///
/// Creation uses `create_new`, so two jobs can never claim the same name and
/// an existing file is never opened for writing.
fn reserve_destination(wanted: &Path) -> Result<PathBuf> {
    let try_claim = |path: &Path| -> io::Result<bool> {
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    };

    if try_claim(wanted).with_context(|| format!("Failed to reserve {}", wanted.display()))? {
        return Ok(wanted.to_path_buf());
    }
    for n in 1..=MAX_NUMBERED_NAMES {
        let candidate = numbered_name(wanted, n);
        if try_claim(&candidate).with_context(|| format!("Failed to reserve {}", candidate.display()))? {
            debug!("{} is taken, using {}", wanted.display(), candidate.display());
            return Ok(candidate);
        }
    }
    Err(anyhow!("No free name for {} in quarantine", wanted.display()))
}

/// Rename, falling back to copy-then-remove across filesystems.
///
/// `to` is replaced if it exists; callers reserve it first.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                "rename {} -> {} failed ({}), copying instead",
                from.display(),
                to.display(),
                rename_err
            );
            copy_then_remove(from, to)
        }
    }
}

/// Copy `from` to `to` keeping its modification time, then remove `from`
fn copy_then_remove(from: &Path, to: &Path) -> Result<()> {
    let mtime = fs::metadata(from).and_then(|m| m.modified()).ok();
    fs::copy(from, to)
        .with_context(|| format!("Failed to move {} -> {}", from.display(), to.display()))?;
    if let Some(mtime) = mtime {
        let restored = fs::File::options().write(true).open(to).and_then(|f| f.set_modified(mtime));
        if let Err(e) = restored {
            warn!("Could not copy modification time to {}: {}", to.display(), e);
        }
    }
    fs::remove_file(from)
        .with_context(|| format!("Copied but failed to remove {}", from.display()))?;
    Ok(())
}

/// Count regular files and their total size below `dir`
pub fn occupancy(dir: &Path) -> Occupancy {
    let mut occ = Occupancy::default();
    for entry in WalkDir::new(dir).follow_links(false).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            occ.files += 1;
            occ.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    occ
}

/// Quarantine directories directly inside `base`, sorted by name
pub fn list_quarantines(base: &Path, prefix: &str) -> Result<Vec<QuarantineListing>> {
    let mut listings = Vec::new();
    let entries = fs::read_dir(base)
        .with_context(|| format!("Failed to read directory {}", base.display()))?;

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && is_quarantine_name(prefix, &name) {
            listings.push(QuarantineListing {
                occupancy: occupancy(&entry.path()),
                name,
            });
        }
    }

    listings.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listings)
}

/// Permanently delete the quarantine directory `base/name`.
///
/// This is not a general-purpose recursive delete. The caller must echo the
/// directory name back as `confirm`, the name must match the allow-list
/// pattern for `prefix`, and the directory must be a real directory whose
/// canonical parent is `base` itself.
pub fn purge_quarantine(base: &Path, prefix: &str, name: &str, confirm: &str) -> Result<Occupancy, ShrinkError> {
    let refuse = |reason: &str| ShrinkError::UnsafePurge {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if confirm != name {
        return Err(refuse("confirmation does not match the directory name"));
    }
    if !is_filesystem_safe(name) {
        return Err(refuse("name contains characters outside [A-Za-z0-9._-]"));
    }
    if !is_quarantine_name(prefix, name) {
        return Err(refuse(&format!("name does not match {}-YYYYMMDD-BYTES", prefix)));
    }

    let target = base.join(name);
    let meta = fs::symlink_metadata(&target).map_err(|_| refuse("no such directory"))?;
    if meta.file_type().is_symlink() {
        return Err(refuse("target is a symlink"));
    }
    if !meta.is_dir() {
        return Err(refuse("target is not a directory"));
    }

    let canonical_base = base.canonicalize().map_err(|_| refuse("base directory cannot be resolved"))?;
    let canonical_target = target.canonicalize().map_err(|_| refuse("target cannot be resolved"))?;
    if canonical_target.parent() != Some(canonical_base.as_path()) {
        return Err(refuse("target is not directly inside the base directory"));
    }

    let occ = occupancy(&canonical_target);
    fs::remove_dir_all(&canonical_target).map_err(|source| ShrinkError::PurgeFailed {
        path: canonical_target.clone(),
        source,
    })?;
    info!(
        "Purged {} ({} files, {} bytes)",
        canonical_target.display(),
        occ.files,
        occ.bytes
    );
    Ok(occ)
}

/// True when the error means the path is simply gone
pub fn is_not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}
