use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use log::warn;
use crate::candidate::MediaKind;
use crate::error::ShrinkError;

/// External command used to compress one media kind.
///
/// `args` may reference `{input}` and `{output}`, which are substituted with
/// the source path and the compressed output path for each job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub bin: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Expand the argument template for one job
    pub fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }

    fn validate(&self, label: &str) -> std::result::Result<(), ShrinkError> {
        if self.bin.as_os_str().is_empty() {
            return Err(ShrinkError::InvalidConfig(format!("{} binary is empty", label)));
        }
        for placeholder in ["{input}", "{output}"] {
            if !self.args.iter().any(|a| a.contains(placeholder)) {
                return Err(ShrinkError::InvalidConfig(format!(
                    "{} arguments must reference {}",
                    label, placeholder
                )));
            }
        }
        Ok(())
    }
}

/// Resolved configuration for a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrinkConfig {
    /// Maximum number of jobs running at once (0 is treated as 1)
    pub concurrency: usize,
    /// Report what would happen without touching the filesystem
    pub dry_run: bool,
    /// Descend into subdirectories during discovery
    pub recursive: bool,
    /// Regenerate compressed outputs that already exist
    pub force: bool,
    /// Delete originals after success instead of quarantining them
    pub delete_originals: bool,
    /// Name prefix for quarantine directories
    pub quarantine_prefix: String,
    /// Directory in which quarantine directories are created
    pub quarantine_root: PathBuf,
    /// Admit image and video jobs together instead of in two phases
    pub interleaved: bool,
    /// Print a line for every skipped file
    pub show_skips: bool,
    /// Always attach ETA fields, even for fast jobs or young phases
    pub always_show_eta: bool,
    /// Jobs faster than this (seconds) get no ETA fields on their line
    pub eta_job_threshold_secs: f64,
    /// ETA is unavailable until the phase has run this long (seconds)
    pub eta_min_elapsed_secs: f64,
    /// Lower-case extensions recognised as images
    pub image_extensions: Vec<String>,
    /// Lower-case extensions recognised as videos
    pub video_extensions: Vec<String>,
    pub image_tool: ToolCommand,
    pub video_tool: ToolCommand,
}

impl Default for ShrinkConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ShrinkConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            concurrency: 4,
            dry_run: false,
            recursive: false,
            force: false,
            delete_originals: false,
            quarantine_prefix: "trash".to_string(),
            quarantine_root: PathBuf::from("."),
            interleaved: false,
            show_skips: false,
            always_show_eta: false,
            eta_job_threshold_secs: 3.0,
            eta_min_elapsed_secs: 1.0,
            image_extensions: ["jpg", "jpeg", "png", "webp", "heic", "heif", "tif", "tiff", "bmp", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_extensions: ["mp4", "mov", "m4v", "mkv", "avi", "webm", "wmv", "mts", "3gp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            image_tool: ToolCommand {
                bin: PathBuf::from("magick"),
                args: vec![
                    "{input}".to_string(),
                    "-auto-orient".to_string(),
                    "-strip".to_string(),
                    "-quality".to_string(),
                    "82".to_string(),
                    "{output}".to_string(),
                ],
            },
            video_tool: ToolCommand {
                bin: PathBuf::from("ffmpeg"),
                args: [
                    "-nostdin", "-hide_banner", "-loglevel", "error", "-y",
                    "-i", "{input}",
                    "-c:v", "libx264", "-crf", "28", "-preset", "medium",
                    "-c:a", "aac", "-b:a", "128k",
                    "-movflags", "+faststart",
                    "{output}",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            },
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            } else {
                warn!("Config file {} not found, using defaults", config_path.display());
            }
        }

        Ok(config)
    }

    /// Worker pool capacity, never below one
    pub fn capacity(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn tool_for(&self, kind: MediaKind) -> &ToolCommand {
        match kind {
            MediaKind::Image => &self.image_tool,
            MediaKind::Video => &self.video_tool,
        }
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> std::result::Result<(), ShrinkError> {
        if self.concurrency == 0 {
            warn!("Concurrency 0 requested, running with 1 worker");
        }

        if !is_filesystem_safe(&self.quarantine_prefix) {
            return Err(ShrinkError::InvalidConfig(format!(
                "quarantine prefix {:?} must be non-empty and use only letters, digits, '.', '_' or '-'",
                self.quarantine_prefix
            )));
        }

        for (label, value) in [
            ("eta_job_threshold_secs", self.eta_job_threshold_secs),
            ("eta_min_elapsed_secs", self.eta_min_elapsed_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ShrinkError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    label, value
                )));
            }
        }

        if self.image_extensions.is_empty() || self.video_extensions.is_empty() {
            return Err(ShrinkError::InvalidConfig(
                "image and video extension lists must not be empty".to_string(),
            ));
        }

        self.image_tool.validate("image tool")?;
        self.video_tool.validate("video tool")?;
        Ok(())
    }
}

/// Letters, digits, `.`, `_` and `-` only; never `.` or `..` on its own
pub fn is_filesystem_safe(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = ShrinkConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.quarantine_prefix, "trash");
        assert!(!cfg.interleaved, "phased scheduling is the default");
    }

    #[test]
    fn test_zero_concurrency_clamps_to_one() {
        let cfg = ShrinkConfig { concurrency: 0, ..Default::default() };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.capacity(), 1);
    }

    #[test]
    fn test_rejects_unsafe_prefix() {
        for prefix in ["", "..", "a/b", "tr ash", "x\\y"] {
            let cfg = ShrinkConfig { quarantine_prefix: prefix.to_string(), ..Default::default() };
            assert!(
                matches!(cfg.validate(), Err(ShrinkError::InvalidConfig(_))),
                "prefix {:?} should be rejected",
                prefix
            );
        }
    }

    #[test]
    fn test_rejects_template_without_output() {
        let mut cfg = ShrinkConfig::default();
        cfg.video_tool.args = vec!["-i".to_string(), "{input}".to_string()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("{output}"));
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let cfg = ShrinkConfig { eta_job_threshold_secs: -1.0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_render_args_substitutes_paths() {
        let tool = ToolCommand {
            bin: PathBuf::from("magick"),
            args: vec!["{input}".to_string(), "-quality".to_string(), "80".to_string(), "{output}".to_string()],
        };
        let args = tool.render_args(Path::new("a/b.png"), Path::new("a/b_compressed.jpg"));
        assert_eq!(args, vec!["a/b.png", "-quality", "80", "a/b_compressed.jpg"]);
    }

    #[test]
    fn test_load_toml_config_merges_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrink.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "concurrency = 8\nquarantine_prefix = \"old\"\ninterleaved = true").unwrap();

        let cfg = ShrinkConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.concurrency, 8);
        assert_eq!(cfg.quarantine_prefix, "old");
        assert!(cfg.interleaved);
        assert_eq!(cfg.image_tool, ShrinkConfig::default().image_tool);
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrink.json");
        std::fs::write(&path, r#"{"force": true, "delete_originals": true}"#).unwrap();

        let cfg = ShrinkConfig::load_config(Some(&path)).unwrap();
        assert!(cfg.force);
        assert!(cfg.delete_originals);
        assert_eq!(cfg.concurrency, 4);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let cfg = ShrinkConfig::load_config(Some(Path::new("/nonexistent/shrink.toml"))).unwrap();
        assert_eq!(cfg.concurrency, ShrinkConfig::default().concurrency);
    }
}
