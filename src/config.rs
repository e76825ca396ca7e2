//! Analysis configuration, loaded from a JSON file or built in code.

use std::path::Path;

use derive_more::Display;
use serde::Deserialize;

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum ConfigError {
    #[display(fmt = "cannot read config file `{}`: {}", _0, _1)]
    Io(String, String),
    #[display(fmt = "malformed config file: {}", _0)]
    Json(String),
    #[display(fmt = "pointer analysis was requested but no alias oracle was supplied")]
    MissingAliasOracle,
}

impl std::error::Error for ConfigError {}

/// Knobs for the divide-by-zero analysis.  Every field has a default, so a
/// config file only lists what it changes.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// External functions whose result is unconstrained user input.
    pub input_functions: Vec<String>,
    /// External functions that sanitize their argument.  A sanitized value
    /// carries no zero information, so calls to these are modelled like any
    /// other call.
    pub sanitizers: Vec<String>,
    /// Track values through memory with the help of an alias oracle.
    pub pointer_analysis: bool,
    /// Give up on a function after this many work set pops.
    pub max_iterations: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            input_functions: vec!["getchar".to_string(), "fgetc".to_string()],
            sanitizers: vec![],
            pointer_analysis: false,
            max_iterations: None,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.display().to_string(), err.to_string()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Config, ConfigError> {
        serde_json::from_str(text).map_err(|err| ConfigError::Json(err.to_string()))
    }

    pub fn is_input(&self, callee: &str) -> bool {
        self.input_functions.iter().any(|f| f == callee)
    }

    pub fn is_sanitizer(&self, callee: &str) -> bool {
        self.sanitizers.iter().any(|f| f == callee)
    }
}
