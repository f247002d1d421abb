// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Client configuration.
//
// There is no global fallback state anywhere in the crate: everything
// a stream session needs is carried by an explicit `ClientConfig`
// handed to it at construction. Base-URL resolution is a pure
// function of the three candidate sources.

use std::path::PathBuf;

use serde::Deserialize;

use crate::request::GenerationOverrides;

/// Environment variable consulted when no explicit base URL is given.
pub const API_URL_ENV: &str = "SKEIN_API_URL";

/// Default reasoning-ratio alert threshold.
pub const DEFAULT_RATIO_THRESHOLD: f64 = 0.35;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config source: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// ---------------------------------------------------------------------------
// ConfigSource trait (interface-first, dependency injection)
// ---------------------------------------------------------------------------

/// Abstraction over where config YAML comes from.
///
/// `FileSource` reads from disk; `StringSource` provides content
/// directly (used in tests to avoid file I/O).
pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;
}

/// Loads config from a file on disk.
pub struct FileSource {
    pub path: PathBuf,
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// Provides config content directly as a string. Used for testing.
pub struct StringSource {
    pub content: String,
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }
}

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

/// Everything a stream session needs, resolved up front.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, no trailing slash.
    pub base_url: String,
    /// Conversation identifier sent with every request.
    pub session_id: String,
    /// Reasoning-ratio alert threshold, clamped to `0.05..=0.95`.
    pub ratio_threshold: f64,
    /// Default generation overrides applied when the caller sets none.
    pub defaults: GenerationOverrides,
}

impl ClientConfig {
    /// Build a config from resolved parts, generating a fresh session
    /// id when none is supplied.
    pub fn new(base_url: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            base_url: trim_trailing_slash(&base_url.into()),
            session_id: session_id.unwrap_or_else(new_session_id),
            ratio_threshold: DEFAULT_RATIO_THRESHOLD,
            defaults: GenerationOverrides::default(),
        }
    }

    /// Load a config from a YAML source. Absent fields fall back to
    /// defaults; the base URL falls back through the standard
    /// resolution order with no explicit override.
    pub fn load(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(&source.load()?)?;
        let base_url = resolve_base_url(
            raw.base_url.as_deref(),
            std::env::var(API_URL_ENV).ok().as_deref(),
            None,
        );
        Ok(Self {
            base_url,
            session_id: raw.session_id.unwrap_or_else(new_session_id),
            ratio_threshold: clamp_ratio_threshold(
                raw.ratio_threshold.unwrap_or(DEFAULT_RATIO_THRESHOLD),
            ),
            defaults: raw.defaults.unwrap_or_default(),
        })
    }
}

/// Raw YAML shape, separate from the public struct so defaults and
/// clamping happen in one place.
#[derive(Debug, Deserialize)]
struct RawConfig {
    base_url: Option<String>,
    session_id: Option<String>,
    ratio_threshold: Option<f64>,
    defaults: Option<GenerationOverrides>,
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Base-URL resolution
// ---------------------------------------------------------------------------

/// Resolve the backend base URL.
///
/// Resolution order: explicit override, environment default, then an
/// origin-derived guess (a dev origin on port 3000 maps to the backend
/// on port 8000 of the same host), finally `http://127.0.0.1:8000`.
/// Trailing slashes are trimmed so joins stay predictable.
pub fn resolve_base_url(
    explicit: Option<&str>,
    env_default: Option<&str>,
    origin: Option<&str>,
) -> String {
    if let Some(url) = explicit.filter(|u| !u.trim().is_empty()) {
        return trim_trailing_slash(url);
    }
    if let Some(url) = env_default.filter(|u| !u.trim().is_empty()) {
        return trim_trailing_slash(url);
    }
    if let Some(origin) = origin.filter(|o| !o.trim().is_empty()) {
        let origin = trim_trailing_slash(origin);
        if let Some(host) = origin.strip_suffix(":3000") {
            return format!("{host}:8000");
        }
        return origin;
    }
    "http://127.0.0.1:8000".to_string()
}

/// Clamp a reasoning-ratio threshold into its sane range.
pub fn clamp_ratio_threshold(value: f64) -> f64 {
    value.clamp(0.05, 0.95)
}

fn trim_trailing_slash(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_override_wins() {
        let url = resolve_base_url(
            Some("http://10.0.0.5:9000/"),
            Some("http://env:8000"),
            Some("http://origin:3000"),
        );
        assert_eq!(url, "http://10.0.0.5:9000");
    }

    #[test]
    fn env_default_used_when_no_override() {
        let url = resolve_base_url(None, Some("http://env:8000/"), Some("http://origin:3000"));
        assert_eq!(url, "http://env:8000");
    }

    #[test]
    fn dev_origin_port_maps_to_backend_port() {
        let url = resolve_base_url(None, None, Some("http://localhost:3000"));
        assert_eq!(url, "http://localhost:8000");
    }

    #[test]
    fn non_dev_origin_used_as_is() {
        let url = resolve_base_url(None, None, Some("https://chat.example.com"));
        assert_eq!(url, "https://chat.example.com");
    }

    #[test]
    fn falls_back_to_loopback() {
        assert_eq!(resolve_base_url(None, None, None), "http://127.0.0.1:8000");
    }

    #[test]
    fn empty_candidates_are_skipped() {
        let url = resolve_base_url(Some("  "), Some(""), None);
        assert_eq!(url, "http://127.0.0.1:8000");
    }

    #[test]
    fn ratio_threshold_clamped_to_range() {
        assert_eq!(clamp_ratio_threshold(0.01), 0.05);
        assert_eq!(clamp_ratio_threshold(0.4), 0.4);
        assert_eq!(clamp_ratio_threshold(2.0), 0.95);
    }

    #[test]
    fn new_generates_session_id_when_absent() {
        let a = ClientConfig::new("http://x:8000", None);
        let b = ClientConfig::new("http://x:8000", None);
        assert!(!a.session_id.is_empty());
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn new_keeps_supplied_session_id() {
        let cfg = ClientConfig::new("http://x:8000/", Some("sess-42".into()));
        assert_eq!(cfg.session_id, "sess-42");
        assert_eq!(cfg.base_url, "http://x:8000");
    }

    #[test]
    fn load_parses_yaml_fields() {
        let source = StringSource {
            content: r#"
base_url: "http://box:8000/"
session_id: "sess-yaml"
ratio_threshold: 0.5
defaults:
  temperature: 0.7
  max_output_tokens: 512
"#
            .to_string(),
        };
        let cfg = ClientConfig::load(&source).unwrap();
        assert_eq!(cfg.base_url, "http://box:8000");
        assert_eq!(cfg.session_id, "sess-yaml");
        assert_eq!(cfg.ratio_threshold, 0.5);
        assert_eq!(cfg.defaults.temperature, Some(0.7));
        assert_eq!(cfg.defaults.max_output_tokens, Some(512));
    }

    #[test]
    fn load_clamps_out_of_range_threshold() {
        let source = StringSource {
            content: "ratio_threshold: 3.0\n".to_string(),
        };
        let cfg = ClientConfig::load(&source).unwrap();
        assert_eq!(cfg.ratio_threshold, 0.95);
    }

    #[test]
    fn load_defaults_everything_from_empty_mapping() {
        let source = StringSource {
            content: "{}\n".to_string(),
        };
        let cfg = ClientConfig::load(&source).unwrap();
        assert_eq!(cfg.ratio_threshold, DEFAULT_RATIO_THRESHOLD);
        assert!(!cfg.session_id.is_empty());
        assert!(cfg.defaults.is_empty());
    }

    #[test]
    fn file_source_reads_from_disk() {
        use std::io::Write as _;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session_id: from-disk").unwrap();
        let cfg = ClientConfig::load(&FileSource {
            path: file.path().to_path_buf(),
        })
        .unwrap();
        assert_eq!(cfg.session_id, "from-disk");
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let source = StringSource {
            content: "base_url: [unclosed\n".to_string(),
        };
        assert!(ClientConfig::load(&source).is_err());
    }
}
