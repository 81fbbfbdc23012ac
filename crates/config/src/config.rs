//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Filesystem locations used by backup and restore runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root of the live media library (backup source, restore target)
    #[serde(default = "default_library_root")]
    pub library_root: PathBuf,
    /// Root of the backup medium (backup target, restore source)
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,
    /// Scratch space for merge intermediates (defaults to `<backup_root>/tmp`)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Backup ledger (defaults to `<library_root>/backup.log`)
    #[serde(default)]
    pub backup_ledger: Option<PathBuf>,
    /// Restore ledger (defaults to `<library_root>/restore.log`)
    #[serde(default)]
    pub restore_ledger: Option<PathBuf>,
}

fn default_library_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("backup")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            library_root: default_library_root(),
            backup_root: default_backup_root(),
            temp_dir: None,
            backup_ledger: None,
            restore_ledger: None,
        }
    }
}

impl PathsConfig {
    /// Resolved temp directory
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.backup_root.join("tmp"))
    }

    /// Resolved backup ledger path
    pub fn backup_ledger(&self) -> PathBuf {
        self.backup_ledger
            .clone()
            .unwrap_or_else(|| self.library_root.join("backup.log"))
    }

    /// Resolved restore ledger path
    pub fn restore_ledger(&self) -> PathBuf {
        self.restore_ledger
            .clone()
            .unwrap_or_else(|| self.library_root.join("restore.log"))
    }
}

/// Partitioning thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionConfig {
    /// Largest file the backup medium accepts; bigger videos are split (default 2 GB)
    #[serde(default = "default_max_segment_bytes")]
    pub max_segment_bytes: u64,
}

fn default_max_segment_bytes() -> u64 {
    2 * 1000 * 1000 * 1000
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: default_max_segment_bytes(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Maximum number of partition/reassembly jobs running at once (0 is treated as 1)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
}

fn default_max_concurrent_jobs() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl QueueConfig {
    /// Concurrency bound actually applied by the limiter
    pub fn effective_max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs.max(1) as usize
    }
}

/// Duration probe budget
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    /// Number of probe attempts before giving up (default 120)
    #[serde(default = "default_probe_attempts")]
    pub attempts: u32,
    /// Spacing between attempts in milliseconds (default 500)
    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,
}

fn default_probe_attempts() -> u32 {
    120
}

fn default_probe_interval_ms() -> u64 {
    500
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: default_probe_attempts(),
            interval_ms: default_probe_interval_ms(),
        }
    }
}

/// Which parts of the library are scanned and what counts as video
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Top-level directories under the root to scan (empty scans the whole root)
    #[serde(default = "default_directories")]
    pub directories: Vec<String>,
    /// Extensions (without dot, case-insensitive) eligible for partitioning
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

fn default_directories() -> Vec<String> {
    [
        "Audiobooks",
        "Courses",
        "Church Movies",
        "Home Videos",
        "Movies",
        "TV Shows",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_video_extensions() -> Vec<String> {
    [
        "avi", "mpg", "mp2", "mpeg", "mpe", "mpv", "mp4", "m4p", "m4v", "ogg", "wmv", "mov",
        "qt", "webm", "flv", "swf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            directories: default_directories(),
            video_extensions: default_video_extensions(),
        }
    }
}

/// External transcoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Copy streams instead of re-encoding when cutting and joining (default true)
    #[serde(default = "default_stream_copy")]
    pub stream_copy: bool,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_stream_copy() -> bool {
    true
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            stream_copy: default_stream_copy(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub partition: PartitionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VAULT_LIBRARY_ROOT -> paths.library_root
    /// - VAULT_BACKUP_ROOT -> paths.backup_root
    /// - VAULT_TEMP_DIR -> paths.temp_dir
    /// - VAULT_MAX_SEGMENT_BYTES -> partition.max_segment_bytes
    /// - VAULT_MAX_CONCURRENT_JOBS -> queue.max_concurrent_jobs
    /// - VAULT_PROBE_ATTEMPTS -> probe.attempts
    /// - VAULT_PROBE_INTERVAL_MS -> probe.interval_ms
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VAULT_LIBRARY_ROOT") {
            if !val.is_empty() {
                self.paths.library_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VAULT_BACKUP_ROOT") {
            if !val.is_empty() {
                self.paths.backup_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VAULT_TEMP_DIR") {
            if !val.is_empty() {
                self.paths.temp_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("VAULT_MAX_SEGMENT_BYTES") {
            if let Ok(bytes) = val.parse::<u64>() {
                self.partition.max_segment_bytes = bytes;
            }
        }

        if let Ok(val) = env::var("VAULT_MAX_CONCURRENT_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.queue.max_concurrent_jobs = jobs;
            }
        }

        if let Ok(val) = env::var("VAULT_PROBE_ATTEMPTS") {
            if let Ok(attempts) = val.parse::<u32>() {
                self.probe.attempts = attempts;
            }
        }

        if let Ok(val) = env::var("VAULT_PROBE_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.probe.interval_ms = ms;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests share process state
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("VAULT_LIBRARY_ROOT");
        env::remove_var("VAULT_BACKUP_ROOT");
        env::remove_var("VAULT_TEMP_DIR");
        env::remove_var("VAULT_MAX_SEGMENT_BYTES");
        env::remove_var("VAULT_MAX_CONCURRENT_JOBS");
        env::remove_var("VAULT_PROBE_ATTEMPTS");
        env::remove_var("VAULT_PROBE_INTERVAL_MS");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            max_segment_bytes in 1u64..10_000_000_000,
            max_jobs in 0u32..16,
            attempts in 1u32..500,
            interval_ms in 1u64..5_000,
            stream_copy in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[paths]
library_root = "/srv/media"
backup_root = "/mnt/backup"

[partition]
max_segment_bytes = {}

[queue]
max_concurrent_jobs = {}

[probe]
attempts = {}
interval_ms = {}

[transcode]
stream_copy = {}
"#,
                max_segment_bytes, max_jobs, attempts, interval_ms, stream_copy
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.paths.library_root, PathBuf::from("/srv/media"));
            prop_assert_eq!(config.paths.backup_root, PathBuf::from("/mnt/backup"));
            prop_assert_eq!(config.partition.max_segment_bytes, max_segment_bytes);
            prop_assert_eq!(config.queue.max_concurrent_jobs, max_jobs);
            prop_assert_eq!(config.probe.attempts, attempts);
            prop_assert_eq!(config.probe.interval_ms, interval_ms);
            prop_assert_eq!(config.transcode.stream_copy, stream_copy);
        }

        #[test]
        fn prop_env_overrides_max_segment_bytes(
            initial in 1u64..10_000_000_000,
            override_bytes in 1u64..10_000_000_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[partition]\nmax_segment_bytes = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("VAULT_MAX_SEGMENT_BYTES", override_bytes.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.partition.max_segment_bytes, override_bytes);
        }

        #[test]
        fn prop_env_overrides_max_concurrent_jobs(
            initial_jobs in 0u32..8,
            override_jobs in 0u32..16,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[queue]\nmax_concurrent_jobs = {}\n", initial_jobs);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("VAULT_MAX_CONCURRENT_JOBS", override_jobs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.queue.max_concurrent_jobs, override_jobs);
            prop_assert!(config.queue.effective_max_concurrent_jobs() >= 1);
        }

        #[test]
        fn prop_env_overrides_probe_budget(
            attempts in 1u32..1000,
            interval_ms in 1u64..10_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::default();
            env::set_var("VAULT_PROBE_ATTEMPTS", attempts.to_string());
            env::set_var("VAULT_PROBE_INTERVAL_MS", interval_ms.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.probe.attempts, attempts);
            prop_assert_eq!(config.probe.interval_ms, interval_ms);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.partition.max_segment_bytes, 2_000_000_000);
        assert_eq!(config.queue.max_concurrent_jobs, 3);
        assert_eq!(config.probe.attempts, 120);
        assert_eq!(config.probe.interval_ms, 500);
        assert_eq!(config.library.directories.len(), 6);
        assert!(config.library.directories.contains(&"TV Shows".to_string()));
        assert_eq!(config.library.video_extensions.len(), 16);
        assert!(config.transcode.stream_copy);
    }

    #[test]
    fn test_derived_paths() {
        let toml_str = r#"
[paths]
library_root = "/srv/media"
backup_root = "/mnt/backup"
"#;
        let config = Config::parse_toml(toml_str).expect("Valid TOML");

        assert_eq!(config.paths.temp_dir(), PathBuf::from("/mnt/backup/tmp"));
        assert_eq!(
            config.paths.backup_ledger(),
            PathBuf::from("/srv/media/backup.log")
        );
        assert_eq!(
            config.paths.restore_ledger(),
            PathBuf::from("/srv/media/restore.log")
        );
    }

    #[test]
    fn test_explicit_paths_win_over_derived() {
        let toml_str = r#"
[paths]
temp_dir = "/scratch"
backup_ledger = "/var/lib/vault/backup.log"
"#;
        let config = Config::parse_toml(toml_str).expect("Valid TOML");

        assert_eq!(config.paths.temp_dir(), PathBuf::from("/scratch"));
        assert_eq!(
            config.paths.backup_ledger(),
            PathBuf::from("/var/lib/vault/backup.log")
        );
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = Config::parse_toml("[queue]\nmax_concurrent_jobs = 0\n").unwrap();
        assert_eq!(config.queue.effective_max_concurrent_jobs(), 1);
    }

    #[test]
    fn test_env_overrides_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("VAULT_LIBRARY_ROOT", "/srv/plex");
        env::set_var("VAULT_BACKUP_ROOT", "/mnt/usb");
        env::set_var("VAULT_TEMP_DIR", "/scratch");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.paths.library_root, PathBuf::from("/srv/plex"));
        assert_eq!(config.paths.backup_root, PathBuf::from("/mnt/usb"));
        assert_eq!(config.paths.temp_dir(), PathBuf::from("/scratch"));
    }

    #[test]
    fn test_invalid_env_value_keeps_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("VAULT_MAX_CONCURRENT_JOBS", "lots");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.queue.max_concurrent_jobs, 3);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/definitely/not/here/config.toml")
            .expect("Missing file should fall back to defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let result = Config::parse_toml("[queue\nmax_concurrent_jobs = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
