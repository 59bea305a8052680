//! Worker configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! bridge_module = "react_py"
//! preload = ["pyodide-http"]
//! installer = "micropip"
//! always_install = []
//!
//! [input]
//! origin = "http://localhost:3000"
//! path = "/react-py-get-input/"
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;

/// Environment variable that overrides [`InputConfig::origin`].
pub const ENV_INPUT_ORIGIN: &str = "PYWORKER_INPUT_ORIGIN";

/// Failure to read or parse a worker config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error(
        "invalid worker config{}: {source}",
        .path.as_deref().map_or_else(String::new, |path| format!(" {}", path.display()))
    )]
    Parse {
        /// `None` when the document did not come from a file.
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
}

impl ConfigError {
    /// The file that failed, if the config came from one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } => Some(path),
            Self::Parse { path, .. } => path.as_deref(),
        }
    }
}

/// Settings for the worker bootstrap and the input bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub input: InputConfig,
    /// Module name under which the input bridge is importable.
    pub bridge_module: String,
    /// Packages loaded before anything else, in order.
    pub preload: Vec<String>,
    /// Package that provides the installer step.
    pub installer: String,
    /// Packages installed through the installer on every init.
    pub always_install: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            bridge_module: "react_py".to_owned(),
            preload: vec!["pyodide-http".to_owned()],
            installer: "micropip".to_owned(),
            always_install: Vec::new(),
        }
    }
}

/// Where blocking input requests are sent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// Scheme, host and port of the intercepting endpoint.
    pub origin: String,
    /// Request path, including leading and trailing slashes.
    pub path: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_owned(),
            path: "/react-py-get-input/".to_owned(),
        }
    }
}

impl WorkerConfig {
    /// Parses a TOML document, then applies environment overrides.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Self::parse(source, None)
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source, Some(path))
    }

    fn parse(source: &str, path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: path.map(Path::to_path_buf),
            source,
        })?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(origin) = std::env::var(ENV_INPUT_ORIGIN)
            && !origin.is_empty()
        {
            tracing::debug!(%origin, "input origin overridden from environment");
            self.input.origin = origin;
        }
    }
}
