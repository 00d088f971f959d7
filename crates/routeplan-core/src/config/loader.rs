//! Reading and writing configuration files.
//!
//! Files ending in `.yaml`/`.yml` are YAML, everything else is JSON.
//! `${ENV_VAR}` placeholders are substituted before parsing.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::env::substitute_env;
use super::parser::{parse_config, ParseError};
use crate::types::ConfigData;

/// Errors that can occur when loading or saving configuration files.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

/// Document format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }

    /// Parse text in this format into an untyped document.
    pub fn parse(self, text: &str) -> Result<Value, ParseError> {
        match self {
            DocumentFormat::Json => Ok(serde_json::from_str(text)?),
            DocumentFormat::Yaml => Ok(serde_yaml::from_str(text)?),
        }
    }
}

/// Read a configuration file into an untyped document, substituting env vars.
pub fn load_document(path: impl AsRef<Path>) -> Result<Value, LoadError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| LoadError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let text = substitute_env(&raw);
    DocumentFormat::from_path(path)
        .parse(&text)
        .map_err(|e| LoadError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Write a configuration as pretty JSON or YAML.
///
/// Keys are written as held in memory, i.e. after env substitution.
pub fn save_document(path: impl AsRef<Path>, config: &ConfigData) -> Result<(), LoadError> {
    let path = path.as_ref();
    let text = match DocumentFormat::from_path(path) {
        DocumentFormat::Json => serde_json::to_string_pretty(config).map_err(ParseError::from),
        DocumentFormat::Yaml => serde_yaml::to_string(config).map_err(ParseError::from),
    }
    .map_err(|e| LoadError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    fs::write(path, text).map_err(|e| LoadError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

impl ConfigData {
    /// Load and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let document = load_document(path)?;
        parse_config(&document).map_err(|e| LoadError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("routeplan-loader-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.yaml")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("a.YML")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("a.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("config")), DocumentFormat::Json);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = ConfigData::from_file(temp_path("does-not-exist.json"));
        assert!(matches!(result, Err(LoadError::ReadError { .. })));
    }

    #[test]
    fn test_load_substitutes_env() {
        let path = temp_path("env.json");
        std::env::set_var("ROUTEPLAN_LOADER_TEST_KEY", "sk-from-env");
        fs::write(
            &path,
            r#"{"providers": {"openai": {"auth": {"keys": ["${ROUTEPLAN_LOADER_TEST_KEY}", "${ROUTEPLAN_UNSET_VAR}"]}}}}"#,
        )
        .unwrap();

        let config = ConfigData::from_file(&path).unwrap();
        let keys = &config.provider("openai").unwrap().auth.keys;
        assert_eq!(keys[0].expose(), "sk-from-env");
        assert_eq!(keys[1].expose(), "${ROUTEPLAN_UNSET_VAR}");

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_save_then_load_yaml() {
        let path = temp_path("saved.yaml");
        let original = ConfigData::from_json(
            r#"{
                "version": "1.2.0",
                "providers": {"anthropic": {"name": "Anthropic", "type": "anthropic",
                    "auth": {"type": "apikey", "keys": ["k"]},
                    "models": {"claude-2": {"name": "Claude 2"}}}},
                "virtualModels": {"thinking": {"targets": [{"providerId": "anthropic", "modelId": "claude-2"}], "priority": 3}}
            }"#,
        )
        .unwrap();

        save_document(&path, &original).unwrap();
        let reloaded = ConfigData::from_file(&path).unwrap();
        assert_eq!(reloaded, original);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let path = temp_path("broken.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ConfigData::from_file(&path),
            Err(LoadError::ParseError { .. })
        ));
        fs::remove_file(&path).ok();
    }
}
