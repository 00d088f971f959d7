//! `${ENV_VAR}` substitution for configuration text.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::borrow::Cow;

lazy_static! {
    static ref ENV_PLACEHOLDER: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Substitute `${NAME}` placeholders from the process environment.
///
/// Unset variables pass through unchanged.
pub fn substitute_env(text: &str) -> Cow<'_, str> {
    substitute_env_with(text, |name| std::env::var(name).ok())
}

/// Substitute `${NAME}` placeholders using a custom lookup.
pub fn substitute_env_with<F>(text: &str, lookup: F) -> Cow<'_, str>
where
    F: Fn(&str) -> Option<String>,
{
    ENV_PLACEHOLDER.replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                tracing::debug!(variable = name, "Environment variable not set, leaving placeholder");
                caps[0].to_string()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "OPENAI_KEY" => Some("sk-live".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn test_substitutes_known_variables() {
        let out = substitute_env_with(r#"{"keys": ["${OPENAI_KEY}"]}"#, lookup);
        assert_eq!(out, r#"{"keys": ["sk-live"]}"#);
    }

    #[test]
    fn test_unset_variable_passes_through() {
        let out = substitute_env_with("key=${MISSING_VAR}", lookup);
        assert_eq!(out, "key=${MISSING_VAR}");
    }

    #[test]
    fn test_empty_value_is_substituted() {
        assert_eq!(substitute_env_with("a${EMPTY}b", lookup), "ab");
    }

    #[test]
    fn test_text_without_placeholders_is_borrowed() {
        let out = substitute_env_with("plain $HOME text", lookup);
        assert!(matches!(out, Cow::Borrowed(_)));
    }
}
