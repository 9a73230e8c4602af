use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use serde::Serialize;

/// Suffix appended to the file stem of every compressed output
pub const COMPRESSED_SUFFIX: &str = "_compressed";

/// Media kind of a candidate file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Image, MediaKind::Video];

    /// Extension of the compressed output for this kind
    pub fn target_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A discovered file eligible for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub kind: MediaKind,
}

impl Candidate {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self { path: path.into(), kind }
    }

    /// Where the compressed version of this file is written
    pub fn output_path(&self) -> PathBuf {
        compressed_output_path(&self.path, self.kind)
    }

    /// Whether the file itself is already a compressed output
    pub fn is_already_compressed(&self) -> bool {
        is_compressed_name(&self.path, self.kind)
    }
}

/// Source path with its extension replaced by `_compressed.<jpg|mp4>`
pub fn compressed_output_path(source: &Path, kind: MediaKind) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = format!("{}{}.{}", stem, COMPRESSED_SUFFIX, kind.target_extension());
    source.with_file_name(name)
}

/// True when the file name ends with the compressed suffix for `kind`
pub fn is_compressed_name(path: &Path, kind: MediaKind) -> bool {
    let ext_matches = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| e.eq_ignore_ascii_case(kind.target_extension()))
        .unwrap_or(false);
    let stem_matches = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.ends_with(COMPRESSED_SUFFIX))
        .unwrap_or(false);
    ext_matches && stem_matches
}

/// Deduplicated image and video candidates, in first-seen order
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    images: Vec<Candidate>,
    videos: Vec<Candidate>,
    seen: HashSet<PathBuf>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate; returns false if its path was already present
    pub fn insert(&mut self, candidate: Candidate) -> bool {
        if !self.seen.insert(candidate.path.clone()) {
            return false;
        }
        match candidate.kind {
            MediaKind::Image => self.images.push(candidate),
            MediaKind::Video => self.videos.push(candidate),
        }
        true
    }

    pub fn images(&self) -> &[Candidate] {
        &self.images
    }

    pub fn videos(&self) -> &[Candidate] {
        &self.videos
    }

    pub fn of_kind(&self, kind: MediaKind) -> &[Candidate] {
        match kind {
            MediaKind::Image => &self.images,
            MediaKind::Video => &self.videos,
        }
    }

    /// Images first, then videos
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.images.iter().chain(self.videos.iter())
    }

    pub fn len(&self) -> usize {
        self.images.len() + self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Candidate> for CandidateSet {
    fn from_iter<T: IntoIterator<Item = Candidate>>(iter: T) -> Self {
        let mut set = CandidateSet::new();
        for candidate in iter {
            set.insert(candidate);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_output_path_replaces_extension() {
        assert_eq!(
            compressed_output_path(Path::new("photos/IMG_001.png"), MediaKind::Image),
            PathBuf::from("photos/IMG_001_compressed.jpg")
        );
        assert_eq!(
            compressed_output_path(Path::new("clip.MOV"), MediaKind::Video),
            PathBuf::from("clip_compressed.mp4")
        );
        assert_eq!(
            compressed_output_path(Path::new("dir/noext"), MediaKind::Image),
            PathBuf::from("dir/noext_compressed.jpg")
        );
    }

    #[test]
    fn test_compressed_name_detection() {
        assert!(is_compressed_name(Path::new("a/x_compressed.jpg"), MediaKind::Image));
        assert!(is_compressed_name(Path::new("a/x_compressed.JPG"), MediaKind::Image));
        assert!(!is_compressed_name(Path::new("a/x_compressed.mp4"), MediaKind::Image));
        assert!(!is_compressed_name(Path::new("a/x.jpg"), MediaKind::Image));
        assert!(is_compressed_name(Path::new("v_compressed.mp4"), MediaKind::Video));
    }

    #[test]
    fn test_candidate_set_deduplicates_by_path() {
        let mut set = CandidateSet::new();
        assert!(set.insert(Candidate::new("a.png", MediaKind::Image)));
        assert!(set.insert(Candidate::new("b.mov", MediaKind::Video)));
        assert!(!set.insert(Candidate::new("a.png", MediaKind::Image)));
        // Case-sensitive, as seen
        assert!(set.insert(Candidate::new("A.png", MediaKind::Image)));

        assert_eq!(set.len(), 3);
        assert_eq!(set.images().len(), 2);
        assert_eq!(set.videos().len(), 1);
        let order: Vec<_> = set.iter().map(|c| c.path.clone()).collect();
        assert_eq!(order, vec![PathBuf::from("a.png"), PathBuf::from("A.png"), PathBuf::from("b.mov")]);
    }

    proptest! {
        /// The output of any source is itself recognised as compressed, so a
        /// second run never reprocesses it.
        #[test]
        fn test_output_name_is_skip_marker(
            stem in "[a-zA-Z0-9 _-]{1,24}",
            ext in "(png|jpeg|heic|mov|mkv|avi)",
            video in prop::bool::ANY,
        ) {
            let kind = if video { MediaKind::Video } else { MediaKind::Image };
            let source = PathBuf::from(format!("dir/{}.{}", stem, ext));
            let output = compressed_output_path(&source, kind);

            prop_assert!(is_compressed_name(&output, kind));
            prop_assert_eq!(output.parent(), source.parent());
            let expected = format!("{}_compressed.{}", stem, kind.target_extension());
            prop_assert_eq!(output.file_name().and_then(|n| n.to_str()), Some(expected.as_str()));
        }
    }
}
