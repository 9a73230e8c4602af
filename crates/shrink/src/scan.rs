use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};
use log::{debug, info, warn};
use crate::candidate::{Candidate, CandidateSet, MediaKind};
use crate::config::ShrinkConfig;
use crate::quarantine;

/// Classify a path by its (case-insensitive) extension
pub fn classify(path: &Path, cfg: &ShrinkConfig) -> Option<MediaKind> {
    let ext = path.extension().and_then(|s| s.to_str())?.to_lowercase();
    if cfg.image_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
        Some(MediaKind::Image)
    } else if cfg.video_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Collect candidate media files from files and directories given on the command line.
///
/// Directories are walked one level deep unless `cfg.recursive` is set. Symlinks
/// are not followed and quarantine directories are never entered. Unreadable
/// entries are logged and skipped.
pub fn discover(inputs: &[PathBuf], cfg: &ShrinkConfig) -> CandidateSet {
    let mut set = CandidateSet::new();
    let mut entry_count = 0usize;
    let mut duplicates = 0usize;

    for input in inputs {
        if input.is_file() {
            match classify(input, cfg) {
                Some(kind) => {
                    if !set.insert(Candidate::new(input.clone(), kind)) {
                        duplicates += 1;
                    }
                }
                None => warn!("Ignoring {}: not a recognised image or video", input.display()),
            }
            continue;
        }

        if !input.is_dir() {
            warn!("Input does not exist or is not readable: {}", input.display());
            continue;
        }

        info!("Scanning directory: {}", input.display());
        let max_depth = if cfg.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(input)
            .follow_links(false)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_quarantine_dir(e, &cfg.quarantine_prefix));

        for entry in walker {
            entry_count += 1;
            if entry_count % 1000 == 0 {
                info!("Scanned {} entries so far...", entry_count);
            }

            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if let Some(kind) = classify(path, cfg) {
                debug!("Found {} candidate: {}", kind, path.display());
                if !set.insert(Candidate::new(path.to_path_buf(), kind)) {
                    duplicates += 1;
                }
            }
        }
    }

    info!(
        "Discovery complete: {} images, {} videos ({} duplicate paths dropped)",
        set.images().len(),
        set.videos().len(),
        duplicates
    );
    set
}

fn is_quarantine_dir(entry: &DirEntry, prefix: &str) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| quarantine::is_quarantine_name(prefix, name))
            .unwrap_or(false)
}
