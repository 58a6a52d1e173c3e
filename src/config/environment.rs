//! Deployment environment

use serde::Deserialize;
use std::fmt;

/// Application environment
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Check if running in production
    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_development() {
        assert_eq!(Environment::default(), Environment::Development);
        assert!(!Environment::default().is_production());
    }

    #[test]
    fn test_deserializes_lowercase() {
        let env: Environment = serde_json::from_str(r#""production""#).unwrap();
        assert!(env.is_production());
        assert_eq!(env.to_string(), "production");
    }
}
