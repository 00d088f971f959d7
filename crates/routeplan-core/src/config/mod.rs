//! Configuration parsing and structural validation.
//!
//! Configuration documents are JSON or YAML, optionally containing
//! `${ENV_VAR}` placeholders. This module turns them into a typed
//! `ConfigData`, filling defaults and normalizing legacy shapes.

mod env;
mod loader;
mod parser;
mod schema;

pub use env::{substitute_env, substitute_env_with};
pub use loader::{load_document, save_document, DocumentFormat, LoadError};
pub use parser::{parse_config, parse_config_at, ParseError, DEFAULT_AUTH_TYPE, DEFAULT_PROVIDER_TYPE};
pub use schema::{is_valid_structure, validate_structure, SchemaError};
