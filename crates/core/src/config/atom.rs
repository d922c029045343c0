//! Archival description system (AtoM) connection settings.
//!
//! The config is an immutable value snapshot: it is assembled once at
//! request entry (request body over CLI flags over file) and passed by
//! value down the pipeline. Delivery is skipped when required fields are
//! missing rather than failing the preservation run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Connection and deposit settings for the archival description system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomConfig {
    /// Base URL, e.g. `https://atom.example.org`.
    pub host: String,
    pub api_key: String,
    pub login_email: String,
    pub login_password: String,
    /// rsync destination for DIP migration, e.g. `atom@host:/dips/`.
    pub rsync_target: String,
    /// Extra rsync arguments, space separated. Optional.
    pub rsync_command: String,
    /// Default target slug; a slug stored on the package node wins.
    pub slug: String,
}

impl AtomConfig {
    /// Whether every field required for DIP delivery is present. The slug is
    /// not required here since it may come from the package node.
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty()
            && !self.api_key.is_empty()
            && !self.login_email.is_empty()
            && !self.login_password.is_empty()
            && !self.rsync_target.is_empty()
    }

    /// Fills empty fields from `fallback`, leaving populated ones alone.
    pub fn overlay(mut self, fallback: &AtomConfig) -> AtomConfig {
        let fill = |target: &mut String, source: &str| {
            if target.is_empty() {
                *target = source.to_string();
            }
        };
        fill(&mut self.host, &fallback.host);
        fill(&mut self.api_key, &fallback.api_key);
        fill(&mut self.login_email, &fallback.login_email);
        fill(&mut self.login_password, &fallback.login_password);
        fill(&mut self.rsync_target, &fallback.rsync_target);
        fill(&mut self.rsync_command, &fallback.rsync_command);
        fill(&mut self.slug, &fallback.slug);
        self
    }

    /// Loads settings from a JSON file; a missing file yields the default
    /// (empty) config.
    pub fn load_file(path: &Path) -> Result<AtomConfig, ConfigError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AtomConfig::default())
            }
            Err(err) => {
                return Err(ConfigError::Invalid(format!(
                    "reading atom config {}: {err}",
                    path.display()
                )))
            }
        };
        serde_json::from_slice(&data).map_err(|e| {
            ConfigError::Invalid(format!("parsing atom config {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> AtomConfig {
        AtomConfig {
            host: "https://atom.example.org".to_string(),
            api_key: "key".to_string(),
            login_email: "a@example.org".to_string(),
            login_password: "secret".to_string(),
            rsync_target: "atom@host:/dips/".to_string(),
            rsync_command: String::new(),
            slug: String::new(),
        }
    }

    #[test]
    fn completeness_does_not_require_slug_or_rsync_command() {
        assert!(complete().is_complete());

        let mut missing = complete();
        missing.rsync_target.clear();
        assert!(!missing.is_complete());
        assert!(!AtomConfig::default().is_complete());
    }

    #[test]
    fn overlay_fills_only_empty_fields() {
        let request = AtomConfig {
            host: "https://other.example.org".to_string(),
            ..AtomConfig::default()
        };
        let merged = request.overlay(&complete());
        assert_eq!(merged.host, "https://other.example.org");
        assert_eq!(merged.api_key, "key");
        assert_eq!(merged.rsync_target, "atom@host:/dips/");
    }

    #[test]
    fn load_file_tolerates_missing_file() {
        let config = AtomConfig::load_file(Path::new("/nonexistent/atom.json")).unwrap();
        assert_eq!(config, AtomConfig::default());
    }

    #[test]
    fn load_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atom.json");
        std::fs::write(
            &path,
            r#"{"host": "https://atom.example.org", "api_key": "key", "slug": "fonds"}"#,
        )
        .unwrap();
        let config = AtomConfig::load_file(&path).unwrap();
        assert_eq!(config.host, "https://atom.example.org");
        assert_eq!(config.slug, "fonds");
        assert!(config.login_email.is_empty());
    }
}
