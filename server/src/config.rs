//! Server configuration module.
//!
//! Parses configuration from environment variables for the Studio server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `STUDIO_USERS` | Yes* | - | Format: `slug:Display Name:passcode,slug2:Name:passcode2` |
//! | `PASSCODE_SECRET` | Yes* | - | Secret mixed into session hashes |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `STUDIO_BASE_DIR` | No | current dir | Base directory; the workspace root is `<base>/workspace` |
//! | `STUDIO_DATA_FILE` | No | `<base>/data/studio.json` | Record store snapshot |
//! | `DB_MAX_BYTES` | No | 52428800 | Snapshot size the health check measures against |
//! | `STUDIO_UNSAFE_NO_AUTH` | No | false | Disable the session gate (dev only) |
//!
//! *Not required if `STUDIO_UNSAFE_NO_AUTH=true`

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::auth::StaffUser;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default snapshot size limit for the health check (50 MiB).
pub const DEFAULT_DB_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Directory under the base that file operations are confined to.
const WORKSPACE_DIR: &str = "workspace";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// The current directory could not be determined.
    #[error("cannot determine base directory: {0}")]
    BaseDir(#[from] std::io::Error),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Base directory holding `workspace/` and, by default, `data/`.
    pub base_dir: PathBuf,

    /// Record store snapshot; `None` keeps records in memory only.
    pub data_file: Option<PathBuf>,

    /// Snapshot size at which the health check reports `full`.
    pub db_max_bytes: u64,

    /// Staff users allowed to log in.
    pub users: Vec<StaffUser>,

    /// Secret mixed into session hashes.
    pub passcode_secret: Option<String>,

    /// When true, disables the session gate (development only).
    pub unsafe_no_auth: bool,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing (when `STUDIO_UNSAFE_NO_AUTH` is not true)
    /// - `STUDIO_USERS` is malformed
    /// - Port number is not a valid u16
    ///
    /// # Example
    ///
    /// ```no_run
    /// use studio_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Workspace root: {}", config.workspace_root().display());
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let unsafe_no_auth = parse_bool_env("STUDIO_UNSAFE_NO_AUTH");
        let port = parse_port()?;
        let base_dir = match non_empty_var("STUDIO_BASE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => env::current_dir()?,
        };
        let data_file = Some(
            non_empty_var("STUDIO_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| base_dir.join("data").join("studio.json")),
        );
        let db_max_bytes = parse_db_max_bytes();
        let users = parse_users()?;
        let passcode_secret = non_empty_var("PASSCODE_SECRET");

        let config = Self {
            port,
            base_dir,
            data_file,
            db_max_bytes,
            users,
            passcode_secret,
            unsafe_no_auth,
        };

        config.validate()?;

        if config.unsafe_no_auth {
            warn!(
                "STUDIO_UNSAFE_NO_AUTH is enabled - the session gate is disabled. \
                 Do not use in production!"
            );
        }

        Ok(config)
    }

    /// The directory all file operations are confined to.
    pub fn workspace_root(&self) -> PathBuf {
        self.base_dir.join(WORKSPACE_DIR)
    }

    /// Location of the append-only application log.
    pub fn app_log_path(&self) -> PathBuf {
        self.workspace_root().join("logs").join("app.log")
    }

    /// The passcode secret, or an empty string when unset.
    pub fn secret(&self) -> &str {
        self.passcode_secret.as_deref().unwrap_or_default()
    }

    /// Ensures that either `unsafe_no_auth` is true, or both `users` and
    /// `passcode_secret` are configured.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.unsafe_no_auth {
            return Ok(());
        }

        if self.users.is_empty() {
            return Err(ConfigError::MissingEnvVar("STUDIO_USERS".to_string()));
        }

        if self.passcode_secret.is_none() {
            return Err(ConfigError::MissingEnvVar("PASSCODE_SECRET".to_string()));
        }

        Ok(())
    }
}

/// Reads a variable, treating blank values as unset.
fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a boolean environment variable.
///
/// Returns `true` if the variable is set to "true" (case-insensitive),
/// `false` otherwise.
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.trim().parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the DB_MAX_BYTES environment variable.
///
/// Anything other than a positive integer falls back to
/// [`DEFAULT_DB_MAX_BYTES`].
fn parse_db_max_bytes() -> u64 {
    match non_empty_var("DB_MAX_BYTES").map(|v| v.parse::<u64>()) {
        Some(Ok(bytes)) if bytes > 0 => bytes,
        Some(_) => {
            warn!("DB_MAX_BYTES is not a positive integer, using default");
            DEFAULT_DB_MAX_BYTES
        }
        None => DEFAULT_DB_MAX_BYTES,
    }
}

/// Parse the STUDIO_USERS environment variable.
///
/// Expected format: `slug:Display Name:passcode,slug2:Name:passcode2`.
/// The passcode is everything after the second colon, so it may itself
/// contain colons.
fn parse_users() -> Result<Vec<StaffUser>, ConfigError> {
    let users_str = match env::var("STUDIO_USERS") {
        Ok(s) if !s.trim().is_empty() => s,
        _ => return Ok(Vec::new()),
    };

    let invalid = |message: String| ConfigError::InvalidFormat {
        var: "STUDIO_USERS".to_string(),
        message,
    };

    let mut users: Vec<StaffUser> = Vec::new();

    for entry in users_str.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let parts: Vec<&str> = entry.splitn(3, ':').map(str::trim).collect();
        let [slug, name, passcode] = parts[..] else {
            return Err(invalid(format!(
                "expected 'slug:name:passcode' format, got '{entry}'"
            )));
        };

        if slug.is_empty() {
            return Err(invalid("slug cannot be empty".to_string()));
        }
        if passcode.is_empty() {
            return Err(invalid(format!("passcode for '{slug}' cannot be empty")));
        }
        if users.iter().any(|u| u.slug == slug) {
            return Err(invalid(format!("duplicate slug '{slug}'")));
        }

        users.push(StaffUser {
            slug: slug.to_string(),
            name: if name.is_empty() { slug } else { name }.to_string(),
            passcode: passcode.to_string(),
        });
    }

    Ok(users)
}
