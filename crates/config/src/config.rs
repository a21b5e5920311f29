//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the configuration file inside the user config directory
pub const CONFIG_FILE_NAME: &str = "hardsub.toml";

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML serialization error while writing the default file
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to access config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
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

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// Directory layout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Folder scanned (or watched) for input files
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Folder receiving converted files (relative to `source_dir` unless absolute)
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,
    /// Folder the originals are moved to after conversion
    #[serde(default = "default_originals_dir")]
    pub originals_dir: PathBuf,
    /// Extension of the files to convert, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Font directory the subtitle renderer reads (defaults to `~/.fonts`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fonts_dir: Option<PathBuf>,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("converted")
}

fn default_originals_dir() -> PathBuf {
    PathBuf::from("originals")
}

fn default_extension() -> String {
    "mkv".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            target_dir: default_target_dir(),
            originals_dir: default_originals_dir(),
            extension: default_extension(),
            fonts_dir: None,
        }
    }
}

/// Language preferences used during track selection (IETF tags)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanguagesConfig {
    #[serde(default = "default_audio_lang")]
    pub audio: String,
    #[serde(default = "default_subs_lang")]
    pub subtitles: String,
}

fn default_audio_lang() -> String {
    "ja".to_string()
}

fn default_subs_lang() -> String {
    "en".to_string()
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            audio: default_audio_lang(),
            subtitles: default_subs_lang(),
        }
    }
}

/// Encoder settings for the main encode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodingConfig {
    /// Constant rate factor passed to x264/x265
    #[serde(default = "default_crf")]
    pub crf: u32,
    /// Use libx265 instead of libx264
    #[serde(default)]
    pub h265: bool,
    /// Encoder tune ("none" disables the flag)
    #[serde(default = "default_tune")]
    pub tune: String,
    /// Encoder preset
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Produce matroska with audio passthrough instead of mp4 with AAC
    #[serde(default)]
    pub mkv: bool,
    /// Baseline profile, stereo audio and faststart for old players
    #[serde(default)]
    pub for_old_devices: bool,
}

fn default_crf() -> u32 {
    18
}

fn default_tune() -> String {
    "animation".to_string()
}

fn default_preset() -> String {
    "fast".to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            crf: default_crf(),
            h265: false,
            tune: default_tune(),
            preset: default_preset(),
            mkv: false,
            for_old_devices: false,
        }
    }
}

/// Subtitle handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtitlesConfig {
    /// Keep the extracted sidecar file after conversion
    #[serde(default)]
    pub keep: bool,
    /// Install fonts attached to the container before encoding
    #[serde(default = "default_true")]
    pub extract_fonts: bool,
    /// Rescale `size="N"` attributes in SRT subtitles
    #[serde(default = "default_true")]
    pub normalize_srt: bool,
    /// Target font size for SRT normalization
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    /// Command run after extraction; `%s` is replaced by the sidecar path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_extract_cmd: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_font_size() -> u32 {
    22
}

impl Default for SubtitlesConfig {
    fn default() -> Self {
        Self {
            keep: false,
            extract_fonts: true,
            normalize_srt: true,
            font_size: default_font_size(),
            post_extract_cmd: None,
        }
    }
}

/// Faster-playback variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FastConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Keep the normal-speed output next to the fast one
    #[serde(default)]
    pub keep_slow: bool,
    /// Playback speed factor
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.5
}

impl Default for FastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keep_slow: false,
            speed: default_speed(),
        }
    }
}

/// External hooks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HooksConfig {
    /// Command run on completion; `%o` is replaced by the output path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_cmd: Option<String>,
}

/// Filename cleanup before a batch scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetoxConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_remove_words")]
    pub remove_words: Vec<String>,
}

fn default_remove_words() -> Vec<String> {
    vec!["SubsPlease".to_string(), "EMBER".to_string()]
}

impl Default for DetoxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remove_words: default_remove_words(),
        }
    }
}

/// Watch mode tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Delay between two size observations of an arriving file
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive unchanged observations before a file counts as complete
    #[serde(default = "default_stable_observations")]
    pub stable_observations: u32,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stable_observations() -> u32 {
    3
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stable_observations: default_stable_observations(),
        }
    }
}

/// Remote copy of finished files with the `scp` binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default = "default_scp_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<String>,
}

fn default_scp_port() -> u16 {
    22
}

impl Default for ScpConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            port: default_scp_port(),
            key_path: None,
            target_dir: None,
        }
    }
}

impl ScpConfig {
    /// Remote copy runs only when a host and a remote folder are configured
    pub fn is_enabled(&self) -> bool {
        self.host.as_deref().is_some_and(|h| !h.is_empty())
            && self.target_dir.as_deref().is_some_and(|d| !d.is_empty())
    }
}

/// Push notifications through Pushover
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PushoverConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,
}

impl PushoverConfig {
    pub fn is_enabled(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
            && self.user_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Reference frames bounding the intro of one title
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntroEntry {
    /// Filename prefix selecting the files this entry applies to
    pub prefix: String,
    /// Still image of the first intro frame
    pub begin: PathBuf,
    /// Still image of the last intro frame
    pub end: PathBuf,
    /// Keep the uncut file after a successful cut
    #[serde(default)]
    pub keep_uncut: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub languages: LanguagesConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub subtitles: SubtitlesConfig,
    #[serde(default)]
    pub fast: FastConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub detox: DetoxConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub scp: ScpConfig,
    #[serde(default)]
    pub pushover: PushoverConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intro: Vec<IntroEntry>,
}

/// Default location of the configuration file (`~/.config/hardsub/hardsub.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "hardsub")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Write the default configuration to `path`, creating parent folders
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&Config::default())?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - HARDSUB_AUDIO_LANG -> languages.audio
    /// - HARDSUB_SUBS_LANG -> languages.subtitles
    /// - HARDSUB_CRF -> encoding.crf
    /// - HARDSUB_TARGET_DIR -> paths.target_dir
    /// - HARDSUB_POLL_INTERVAL_MS -> watch.poll_interval_ms
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("HARDSUB_AUDIO_LANG") {
            if !val.is_empty() {
                self.languages.audio = val;
            }
        }

        if let Ok(val) = env::var("HARDSUB_SUBS_LANG") {
            if !val.is_empty() {
                self.languages.subtitles = val;
            }
        }

        if let Ok(val) = env::var("HARDSUB_CRF") {
            if let Ok(crf) = val.parse::<u32>() {
                self.encoding.crf = crf;
            }
        }

        if let Ok(val) = env::var("HARDSUB_TARGET_DIR") {
            if !val.is_empty() {
                self.paths.target_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("HARDSUB_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.watch.poll_interval_ms = ms;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Resolve a configured folder against the source folder
    pub fn resolve_dir(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.paths.source_dir.join(dir)
        }
    }

    pub fn target_dir(&self) -> PathBuf {
        self.resolve_dir(&self.paths.target_dir)
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.resolve_dir(&self.paths.originals_dir)
    }

    /// Font directory, falling back to `~/.fonts`
    pub fn fonts_dir(&self) -> Option<PathBuf> {
        self.paths.fonts_dir.clone().or_else(|| {
            directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".fonts"))
        })
    }

    /// Find the intro definition whose prefix matches the given file name
    pub fn intro_for_filename(&self, file_name: &str) -> Option<&IntroEntry> {
        self.intro
            .iter()
            .find(|entry| !entry.prefix.is_empty() && file_name.starts_with(&entry.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        env::remove_var("HARDSUB_AUDIO_LANG");
        env::remove_var("HARDSUB_SUBS_LANG");
        env::remove_var("HARDSUB_CRF");
        env::remove_var("HARDSUB_TARGET_DIR");
        env::remove_var("HARDSUB_POLL_INTERVAL_MS");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            audio in "[a-z]{2}",
            subs in "[a-z]{2}(-[A-Z]{2})?",
            crf in 0u32..52,
            h265 in proptest::bool::ANY,
            mkv in proptest::bool::ANY,
            poll in 1u64..10_000,
            keep_slow in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[languages]
audio = "{}"
subtitles = "{}"

[encoding]
crf = {}
h265 = {}
mkv = {}

[watch]
poll_interval_ms = {}

[fast]
enabled = true
keep_slow = {}
"#,
                audio, subs, crf, h265, mkv, poll, keep_slow
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(&config.languages.audio, &audio);
            prop_assert_eq!(&config.languages.subtitles, &subs);
            prop_assert_eq!(config.encoding.crf, crf);
            prop_assert_eq!(config.encoding.h265, h265);
            prop_assert_eq!(config.encoding.mkv, mkv);
            prop_assert_eq!(config.watch.poll_interval_ms, poll);
            prop_assert!(config.fast.enabled);
            prop_assert_eq!(config.fast.keep_slow, keep_slow);
            // untouched sections keep their defaults
            prop_assert_eq!(config.detox, DetoxConfig::default());
        }

        #[test]
        fn prop_env_overrides_crf(initial in 0u32..52, override_crf in 0u32..52) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml(&format!("[encoding]\ncrf = {}\n", initial))
                .expect("Valid TOML");

            env::set_var("HARDSUB_CRF", override_crf.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.encoding.crf, override_crf);
        }

        #[test]
        fn prop_env_overrides_poll_interval(initial in 1u64..5000, override_ms in 1u64..5000) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config =
                Config::parse_toml(&format!("[watch]\npoll_interval_ms = {}\n", initial))
                    .expect("Valid TOML");

            env::set_var("HARDSUB_POLL_INTERVAL_MS", override_ms.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.watch.poll_interval_ms, override_ms);
        }
    }

    #[test]
    fn test_env_overrides_languages_and_invalid_crf() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("HARDSUB_AUDIO_LANG", "en");
        env::set_var("HARDSUB_SUBS_LANG", "nl");
        env::set_var("HARDSUB_CRF", "not-a-number");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.languages.audio, "en");
        assert_eq!(config.languages.subtitles, "nl");
        assert_eq!(config.encoding.crf, 18);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.paths.extension, "mkv");
        assert_eq!(config.paths.target_dir, PathBuf::from("converted"));
        assert_eq!(config.paths.originals_dir, PathBuf::from("originals"));
        assert_eq!(config.languages.audio, "ja");
        assert_eq!(config.languages.subtitles, "en");
        assert_eq!(config.encoding.crf, 18);
        assert_eq!(config.encoding.tune, "animation");
        assert_eq!(config.encoding.preset, "fast");
        assert!(config.subtitles.extract_fonts);
        assert_eq!(config.subtitles.font_size, 22);
        assert!((config.fast.speed - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.watch.poll_interval_ms, 1000);
        assert_eq!(config.watch.stable_observations, 3);
        assert_eq!(config.scp.port, 22);
        assert!(!config.scp.is_enabled());
        assert!(!config.pushover.is_enabled());
        assert!(config.intro.is_empty());
    }

    #[test]
    fn test_intro_entries_and_prefix_lookup() {
        let toml_str = r#"
[[intro]]
prefix = "Undead_Unluck"
begin = "/frames/Undead_Unluck_begin.png"
end = "/frames/Undead_Unluck_end.png"

[[intro]]
prefix = "Frieren"
begin = "/frames/frieren_begin.png"
end = "/frames/frieren_end.png"
keep_uncut = true
"#;
        let config = Config::parse_toml(toml_str).expect("Valid TOML");

        let entry = config
            .intro_for_filename("Undead_Unluck_-_05.mkv")
            .expect("prefix should match");
        assert_eq!(entry.begin, PathBuf::from("/frames/Undead_Unluck_begin.png"));
        assert!(!entry.keep_uncut);

        assert!(config.intro_for_filename("Frieren_-_01.mkv").unwrap().keep_uncut);
        assert!(config.intro_for_filename("Other_Show_-_01.mkv").is_none());
    }

    #[test]
    fn test_relative_dirs_resolve_against_source() {
        let mut config = Config::default();
        config.paths.source_dir = PathBuf::from("/media/incoming");
        config.paths.originals_dir = PathBuf::from("/archive");

        assert_eq!(config.target_dir(), PathBuf::from("/media/incoming/converted"));
        assert_eq!(config.originals_dir(), PathBuf::from("/archive"));
    }

    #[test]
    fn test_write_default_creates_loadable_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        Config::write_default(&path).expect("default config should be written");
        let loaded = Config::load_from_file(&path).expect("written config should load");

        assert_eq!(loaded, Config::default());
    }
}
