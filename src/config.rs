//! Settings file loading and validation.
//!
//! Settings live in a JSON object (`settings.json` by default). Every key is
//! optional. A value of the wrong type or out of range is replaced by its
//! default and a warning is logged, so a bad settings file never stops a run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::download::filename::sanitize_filename_component;
use crate::ledger::RecordFormat;

/// Default settings file name, resolved against the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default transfer chunk size (1 MiB).
pub const DEFAULT_CHUNK: usize = 1024 * 1024;

/// Chunk sizes must be strictly larger than this.
const MIN_CHUNK_EXCLUSIVE: usize = 1024;

/// Default worker pool size for the download engine.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default folder name under the work path.
pub const DEFAULT_FOLDER_NAME: &str = "Download";

/// Errors reading or writing the settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read or written.
    #[error("settings file {path}: {source}")]
    Io {
        /// Settings file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        /// Settings file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The settings file is JSON but not an object.
    #[error("settings file {path} must contain a JSON object")]
    NotAnObject {
        /// Settings file path.
        path: PathBuf,
    },
}

/// Proxy configuration for the shared HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProxySetting {
    /// Connect directly.
    #[default]
    None,
    /// One proxy for every scheme.
    All(String),
    /// Separate proxies per scheme; a missing entry connects directly.
    PerScheme {
        /// Proxy for `http://` requests.
        http: Option<String>,
        /// Proxy for `https://` requests.
        https: Option<String>,
    },
}

/// Image format the item cover is saved in, or no cover at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoverFormat {
    /// Covers are not downloaded.
    #[default]
    Off,
    /// Saved with a `.jpeg` extension.
    Jpeg,
    /// Saved with a `.webp` extension.
    Webp,
}

impl CoverFormat {
    /// Parses `""`, `"JPEG"` or `"WEBP"`, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "" => Some(Self::Off),
            "JPEG" => Some(Self::Jpeg),
            "WEBP" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Settings-file spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "",
            Self::Jpeg => "JPEG",
            Self::Webp => "WEBP",
        }
    }

    /// Extension of saved covers, `None` when covers are off.
    #[must_use]
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Off => None,
            Self::Jpeg => Some(".jpeg"),
            Self::Webp => Some(".webp"),
        }
    }
}

/// Validated runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root directory for downloads and the record ledger.
    pub work_path: PathBuf,
    /// Download folder name under `work_path`.
    pub folder_name: String,
    /// Pre-installed session cookie; empty means learn it from redirects.
    pub cookie: String,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Retries after the first attempt for every network call.
    pub max_retry: u32,
    /// Proxy for all outbound requests.
    pub proxy: ProxySetting,
    /// Streaming chunk size in bytes.
    pub chunk: usize,
    /// Download worker pool size.
    pub max_workers: usize,
    /// Whether completed items are written to the record ledger.
    pub download_record: bool,
    /// Whether extracted item metadata is written to the detail data ledger.
    pub data_record: bool,
    /// Cover image download.
    pub cover: CoverFormat,
    /// Ledger storage backend.
    pub record_format: RecordFormat,
    /// Give every item its own sub-folder.
    pub folder_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_path: current_dir(),
            folder_name: DEFAULT_FOLDER_NAME.to_string(),
            cookie: String::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            max_retry: crate::retry::DEFAULT_MAX_RETRY,
            proxy: ProxySetting::None,
            chunk: DEFAULT_CHUNK,
            max_workers: DEFAULT_MAX_WORKERS,
            download_record: true,
            data_record: false,
            cover: CoverFormat::Off,
            record_format: RecordFormat::Sqlite,
            folder_mode: false,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, creating the file with defaults if missing.
    ///
    /// Never fails: unreadable or malformed files fall back to defaults with a
    /// warning.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "settings file not found, writing defaults");
            let defaults = Self::default();
            if let Err(e) = defaults.write(path) {
                warn!(error = %e, "could not write default settings file");
            }
            return defaults;
        }

        match read_object(path) {
            Ok(map) => Self::from_map(&map),
            Err(e) => {
                warn!(error = %e, "using default settings");
                Self::default()
            }
        }
    }

    /// Validates a raw JSON object into settings.
    #[must_use]
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        let settings = Self {
            work_path: check_work_path(map.get("work_path")),
            folder_name: check_folder_name(map.get("folder_name")),
            cookie: check_string("cookie", map.get("cookie")),
            timeout: check_positive("timeout", map.get("timeout"), defaults.timeout),
            max_retry: check_max_retry(map.get("max_retry"), defaults.max_retry),
            proxy: check_proxy(map.get("proxy")),
            chunk: check_chunk(map.get("chunk")),
            max_workers: check_positive("max_workers", map.get("max_workers"), defaults.max_workers),
            download_record: check_bool("download_record", map.get("download_record"), true),
            data_record: check_bool("data_record", map.get("data_record"), false),
            cover: check_cover(map.get("cover")),
            record_format: check_record_format(map.get("record_format")),
            folder_mode: check_bool("folder_mode", map.get("folder_mode"), false),
        };
        debug!(?settings, "settings validated");
        settings
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Directory media files are written into.
    #[must_use]
    pub fn download_root(&self) -> PathBuf {
        self.work_path.join(&self.folder_name)
    }

    /// Writes these settings as pretty JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let proxy = match &self.proxy {
            ProxySetting::None => Value::Null,
            ProxySetting::All(p) => Value::String(p.clone()),
            ProxySetting::PerScheme { http, https } => json!({ "http": http, "https": https }),
        };
        let value = json!({
            "work_path": "",
            "folder_name": self.folder_name,
            "cookie": self.cookie,
            "timeout": self.timeout,
            "max_retry": self.max_retry,
            "proxy": proxy,
            "chunk": self.chunk,
            "max_workers": self.max_workers,
            "download_record": self.download_record,
            "data_record": self.data_record,
            "cover": self.cover.as_str(),
            "record_format": self.record_format.as_str(),
            "folder_mode": self.folder_mode,
        });
        let mut text = serde_json::to_string_pretty(&value).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;
        text.push('\n');
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn read_object(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::NotAnObject {
            path: path.to_path_buf(),
        }),
    }
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn check_work_path(value: Option<&Value>) -> PathBuf {
    let raw = match value {
        None | Some(Value::Null) => return current_dir(),
        Some(Value::String(s)) if s.trim().is_empty() => return current_dir(),
        Some(Value::String(s)) => PathBuf::from(s.trim()),
        Some(other) => {
            warn!(value = %other, "work_path must be a string, using current directory");
            return current_dir();
        }
    };

    if raw.is_dir() {
        return raw;
    }
    let parent_exists = raw
        .parent()
        .is_some_and(|p| p.as_os_str().is_empty() || p.is_dir());
    if parent_exists && std::fs::create_dir(&raw).is_ok() {
        info!(path = %raw.display(), "created work_path");
        return raw;
    }
    warn!(path = %raw.display(), "work_path is not a usable directory, using current directory");
    current_dir()
}

fn check_folder_name(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => DEFAULT_FOLDER_NAME.to_string(),
        Some(Value::String(s)) => {
            let cleaned = sanitize_filename_component(s);
            if cleaned.is_empty() {
                warn!(value = %s, "folder_name is not a valid folder name, using {DEFAULT_FOLDER_NAME}");
                DEFAULT_FOLDER_NAME.to_string()
            } else {
                cleaned
            }
        }
        Some(other) => {
            warn!(value = %other, "folder_name must be a string, using {DEFAULT_FOLDER_NAME}");
            DEFAULT_FOLDER_NAME.to_string()
        }
    }
}

fn check_string(key: &str, value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => {
            warn!(key, value = %other, "expected a string, ignoring");
            String::new()
        }
    }
}

fn check_positive<T>(key: &str, value: Option<&Value>, default: T) -> T
where
    T: TryFrom<u64> + Copy + std::fmt::Display,
{
    let Some(value) = value else {
        return default;
    };
    match value.as_u64().filter(|n| *n > 0).and_then(|n| T::try_from(n).ok()) {
        Some(n) => n,
        None => {
            warn!(key, value = %value, default = %default, "expected a positive integer, using default");
            default
        }
    }
}

fn check_max_retry(value: Option<&Value>, default: u32) -> u32 {
    let Some(value) = value else {
        return default;
    };
    match value.as_u64().and_then(|n| u32::try_from(n).ok()) {
        Some(n) => n,
        None => {
            warn!(value = %value, default, "max_retry must be a non-negative integer, using default");
            default
        }
    }
}

fn check_chunk(value: Option<&Value>) -> usize {
    let Some(value) = value else {
        return DEFAULT_CHUNK;
    };
    match value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > MIN_CHUNK_EXCLUSIVE)
    {
        Some(n) => n,
        None => {
            warn!(value = %value, default = DEFAULT_CHUNK, "chunk must be an integer above 1024, using default");
            DEFAULT_CHUNK
        }
    }
}

fn check_bool(key: &str, value: Option<&Value>, default: bool) -> bool {
    match value {
        None => default,
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            warn!(key, value = %other, default, "expected a boolean, using default");
            default
        }
    }
}

fn check_cover(value: Option<&Value>) -> CoverFormat {
    match value {
        None | Some(Value::Null) => CoverFormat::Off,
        Some(Value::String(s)) => CoverFormat::parse(s).unwrap_or_else(|| {
            warn!(value = %s, "cover must be empty, JPEG or WEBP, not downloading covers");
            CoverFormat::Off
        }),
        Some(other) => {
            warn!(value = %other, "cover must be a string, not downloading covers");
            CoverFormat::Off
        }
    }
}

fn check_record_format(value: Option<&Value>) -> RecordFormat {
    match value {
        None | Some(Value::Null) => RecordFormat::Sqlite,
        Some(Value::String(s)) => RecordFormat::parse(s).unwrap_or_else(|| {
            warn!(value = %s, "record_format must be SQLite or JSON, using SQLite");
            RecordFormat::Sqlite
        }),
        Some(other) => {
            warn!(value = %other, "record_format must be a string, using SQLite");
            RecordFormat::Sqlite
        }
    }
}

fn check_proxy(value: Option<&Value>) -> ProxySetting {
    match value {
        None | Some(Value::Null) => ProxySetting::None,
        Some(Value::String(s)) if s.trim().is_empty() => ProxySetting::None,
        Some(Value::String(s)) => match valid_proxy_url(s) {
            Some(p) => ProxySetting::All(p),
            None => {
                warn!(proxy = %s, "proxy is not a valid URL, connecting directly");
                ProxySetting::None
            }
        },
        Some(Value::Object(map)) => check_proxy_map(map),
        Some(other) => {
            warn!(proxy = %other, "proxy must be a string or an object, connecting directly");
            ProxySetting::None
        }
    }
}

fn check_proxy_map(map: &Map<String, Value>) -> ProxySetting {
    let mut http = None;
    let mut https = None;
    for (key, value) in map {
        let scheme = key.trim_end_matches("://").to_ascii_lowercase();
        let proxy = match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => {
                let Some(p) = valid_proxy_url(s) else {
                    warn!(proxy = %s, "proxy is not a valid URL, connecting directly");
                    return ProxySetting::None;
                };
                Some(p)
            }
            other => {
                warn!(proxy = %other, "proxy entries must be strings, connecting directly");
                return ProxySetting::None;
            }
        };
        match scheme.as_str() {
            "http" => http = proxy,
            "https" => https = proxy,
            "all" => {
                http.clone_from(&proxy);
                https = proxy;
            }
            _ => {
                warn!(key = %key, "unknown proxy scheme, connecting directly");
                return ProxySetting::None;
            }
        }
    }
    if http.is_none() && https.is_none() {
        ProxySetting::None
    } else {
        ProxySetting::PerScheme { http, https }
    }
}

fn valid_proxy_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    matches!(parsed.scheme(), "http" | "https" | "socks5" | "socks5h")
        .then(|| raw.trim().to_string())
}
