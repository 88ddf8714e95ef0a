//! Persisted gateway settings
//!
//! A small JSON file next to the binary. Missing fields fall back to their
//! defaults; a missing stream key is an error since the ingest port would
//! otherwise accept nobody.

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";

const ADMIN_PASSWORD_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing stream key in {0}")]
    MissingStreamKey(PathBuf),

    #[error("invalid address {addr:?}: {source}")]
    Address {
        addr: String,
        #[source]
        source: AddrParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub stream_key: String,
    pub admin_password: String,
    /// HTTP and chat listener, `host:port` or `:port`
    pub listen_address: String,
    /// RTMP listener
    pub ingest_address: String,
    pub log_level: String,
    /// Print stream stats on shutdown
    pub stream_stats: bool,
    pub page_title: String,
    pub static_dir: PathBuf,
    pub emotes_dir: PathBuf,

    #[serde(skip)]
    path: PathBuf,
    /// Session-only key from the command line, never written back
    #[serde(skip)]
    temp_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stream_key: String::new(),
            admin_password: String::new(),
            listen_address: ":8089".into(),
            ingest_address: "0.0.0.0:1935".into(),
            log_level: "info".into(),
            stream_stats: false,
            page_title: "Live".into(),
            static_dir: PathBuf::from("static"),
            emotes_dir: PathBuf::from("static/emotes"),
            path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            temp_key: None,
        }
    }
}

impl Settings {
    /// Defaults with `stream_key` set
    pub fn with_stream_key(key: impl Into<String>) -> Self {
        Self {
            stream_key: key.into(),
            ..Default::default()
        }
    }

    /// File that [`Settings::save`] writes to
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings: Settings =
            serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.path = path.to_path_buf();

        if settings.stream_key.trim().is_empty() {
            return Err(SettingsError::MissingStreamKey(settings.path));
        }
        Ok(settings)
    }

    /// Write the settings back to the file they came from
    pub fn save(&self) -> Result<(), SettingsError> {
        let io_err = |source: io::Error| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        let text = serde_json::to_string_pretty(self).map_err(|e| io_err(e.into()))?;
        std::fs::write(&self.path, text + "\n").map_err(io_err)
    }

    /// Generate an admin password if none is set; true when one was made
    pub fn ensure_admin_password(&mut self) -> bool {
        if !self.admin_password.is_empty() {
            return false;
        }
        self.admin_password = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ADMIN_PASSWORD_LEN)
            .map(char::from)
            .collect();
        true
    }

    pub fn set_temp_key(&mut self, key: impl Into<String>) {
        self.temp_key = Some(key.into());
    }

    /// The key publishers must present: the temporary one if set
    pub fn effective_stream_key(&self) -> &str {
        self.temp_key.as_deref().unwrap_or(&self.stream_key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, SettingsError> {
        parse_addr(&self.listen_address)
    }

    pub fn ingest_addr(&self) -> Result<SocketAddr, SettingsError> {
        parse_addr(&self.ingest_address)
    }
}

/// Parse `host:port`, treating a bare `:port` as all interfaces
pub fn parse_addr(addr: &str) -> Result<SocketAddr, SettingsError> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    full.parse().map_err(|source| SettingsError::Address {
        addr: addr.to_string(),
        source,
    })
}
