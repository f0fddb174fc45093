//! Editor configuration, loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which form a commit hands to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum CommitFormat {
    /// The markup form as serialized.
    Html,
    /// The markup form run through the filtered Markdown renderer.
    FilteredMarkdown {
        /// Strip a single outer paragraph.
        #[serde(default = "default_unwrap")]
        unwrap: bool,
    },
}

impl Default for CommitFormat {
    fn default() -> Self {
        Self::FilteredMarkdown { unwrap: true }
    }
}

fn default_unwrap() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Passed back to the commit callback so a host can tell editors apart.
    pub editor_id: Option<String>,
    /// Idle time after the last keystroke before a commit fires.
    pub commit_debounce_ms: u64,
    pub commit_format: CommitFormat,
    /// Use Cmd rather than Ctrl as the hotkey modifier.
    pub mac: bool,
    /// File extensions (lowercase, no dot) that mark a pasted URL as an image.
    pub image_extensions: Vec<String>,
}

pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    "apng", "avif", "bmp", "gif", "heic", "heif", "ico", "jfif", "jpeg", "jpg", "png", "svg", "tif",
    "tiff", "webp",
];

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            editor_id: None,
            commit_debounce_ms: 500,
            commit_format: CommitFormat::default(),
            mac: cfg!(target_os = "macos"),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl EditorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        tracing::debug!(target: "loom::editor", path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn with_editor_id(mut self, id: impl Into<String>) -> Self {
        self.editor_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = EditorConfig::from_json_str(r#"{ "editor_id": "post-body", "mac": true }"#)
            .unwrap();
        assert_eq!(config.editor_id.as_deref(), Some("post-body"));
        assert!(config.mac);
        assert_eq!(config.commit_debounce_ms, 500);
        assert_eq!(config.commit_format, CommitFormat::FilteredMarkdown { unwrap: true });
        assert!(config.image_extensions.iter().any(|e| e == "png"));
    }

    #[test]
    fn commit_format_variants() {
        let config =
            EditorConfig::from_json_str(r#"{ "commit_format": { "kind": "html" } }"#).unwrap();
        assert_eq!(config.commit_format, CommitFormat::Html);
        let config = EditorConfig::from_json_str(
            r#"{ "commit_format": { "kind": "filtered-markdown", "unwrap": false } }"#,
        )
        .unwrap();
        assert_eq!(config.commit_format, CommitFormat::FilteredMarkdown { unwrap: false });
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        let err = EditorConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = EditorConfig::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
