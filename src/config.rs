use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

/// Engine-wide settings shared by every template of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub delimiter_start: char,
    pub delimiter_stop: char,
    /// Line separator written for every `\n` in the output.
    pub newline: String,
    /// Wrap column for `wrap=` expressions; `None` disables wrapping.
    pub line_width: Option<usize>,
    /// Maximum template nesting during a render.
    pub max_depth: usize,
    pub culture: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiter_start: '<',
            delimiter_stop: '>',
            newline: "\n".to_string(),
            line_width: None,
            max_depth: 256,
            culture: "en-US".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, TemplateError> {
        let config: EngineConfig = toml::from_str(s).map_err(|e| TemplateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, TemplateError> {
        toml::to_string(self).map_err(|e| TemplateError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<(), TemplateError> {
        for c in [self.delimiter_start, self.delimiter_stop] {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '"' | '\\' | '{' | '}') {
                return Err(TemplateError::Config(format!("invalid template delimiter: '{}'", c)));
            }
        }
        if self.max_depth == 0 {
            return Err(TemplateError::Config("max_depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("delimiter_start = '$'\ndelimiter_stop = '$'\nline_width = 40\n").unwrap();
        assert_eq!(config.delimiter_start, '$');
        assert_eq!(config.line_width, Some(40));
        assert_eq!(config.max_depth, 256);
        assert_eq!(config.newline, "\n");
    }

    #[test]
    fn test_invalid_delimiter() {
        let err = EngineConfig::from_toml_str("delimiter_start = 'a'").unwrap_err();
        assert!(matches!(err, TemplateError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "newline = \"\\r\\n\"\nmax_depth = 10\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.newline, "\r\n");
        assert_eq!(config.max_depth, 10);

        let missing = EngineConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, TemplateError::Io { .. }));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig { line_width: Some(72), ..EngineConfig::default() };
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }
}
