//! Generated artifacts and their content-addressed identity.
//!
//! An [`Artifact`] is immutable from the point of view of verification: a
//! repair never mutates one in place, it produces a new version through
//! [`Artifact::with_content`] carrying a fresh hash.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata key recording the hash of the version an artifact was derived from.
pub const PREVIOUS_HASH_KEY: &str = "previous_hash";

/// Declared type of a generated artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Source,
    Test,
    Config,
    Schema,
    Documentation,
    Deployment,
    Binary,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Source => "source",
            ArtifactType::Test => "test",
            ArtifactType::Config => "config",
            ArtifactType::Schema => "schema",
            ArtifactType::Documentation => "documentation",
            ArtifactType::Deployment => "deployment",
            ArtifactType::Binary => "binary",
        }
    }

    /// Whether the artifact carries text that analysis tools can read.
    pub fn is_textual(&self) -> bool {
        !matches!(self, ArtifactType::Binary)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one artifact version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactId {
    pub path: String,
    pub hash: String,
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.hash.chars().take(12).collect();
        write!(f, "{}@{short}", self.path)
    }
}

/// A named, typed, content-addressed unit of generated output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// Path relative to the generated project root.
    pub path: String,

    /// Declared artifact type.
    pub artifact_type: ArtifactType,

    /// Lower-case language name (e.g. "go", "python").
    pub language: Option<String>,

    /// Framework name if known (e.g. "gin", "fastapi", "openapi").
    pub framework: Option<String>,

    /// Full textual content.
    pub content: String,

    /// Content size in bytes.
    pub size: u64,

    /// SHA-256 hex digest of `content`.
    pub hash: String,

    /// Free-form metadata from upstream generation.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Artifact {
    /// Create an artifact, computing size and hash and inferring the language
    /// from the file extension.
    pub fn new(
        path: impl Into<String>,
        artifact_type: ArtifactType,
        content: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let content = content.into();
        let language = infer_language(&path).map(str::to_string);
        Self {
            size: content.len() as u64,
            hash: content_hash(&content),
            path,
            artifact_type,
            language,
            framework: None,
            content,
            metadata: BTreeMap::new(),
        }
    }

    /// Override the inferred language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into().to_ascii_lowercase());
        self
    }

    /// Set the framework.
    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into().to_ascii_lowercase());
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Produce the next version of this artifact with new content.
    ///
    /// The returned artifact has a new hash and size; the original is left
    /// untouched. `metadata["previous_hash"]` points at the version it was
    /// derived from.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        let content = content.into();
        let mut next = self.clone();
        next.size = content.len() as u64;
        next.hash = content_hash(&content);
        next.content = content;
        next.metadata.insert(
            PREVIOUS_HASH_KEY.to_string(),
            serde_json::Value::String(self.hash.clone()),
        );
        next
    }

    pub fn id(&self) -> ArtifactId {
        ArtifactId {
            path: self.path.clone(),
            hash: self.hash.clone(),
        }
    }

    /// Number of lines in the content.
    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }

    /// Lower-case file name without directories.
    pub fn file_name(&self) -> String {
        self.path
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.path)
            .to_ascii_lowercase()
    }

    /// Lower-case extension, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            None
        } else {
            Some(ext.to_string())
        }
    }

    /// Whether the stored hash matches the content.
    pub fn verify_hash(&self) -> bool {
        content_hash(&self.content) == self.hash
    }
}

/// SHA-256 hex digest of textual content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Infer a lower-case language name from a file path.
pub fn infer_language(path: &str) -> Option<&'static str> {
    let lower = path.to_ascii_lowercase();
    let ext = lower.rsplit_once('.').map(|(_, e)| e)?;
    let lang = match ext {
        "go" => "go",
        "py" => "python",
        "rs" => "rust",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "kt" => "kotlin",
        "rb" => "ruby",
        "cs" => "csharp",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "toml" => "toml",
        "sql" => "sql",
        "md" => "markdown",
        "sh" => "shell",
        _ => return None,
    };
    Some(lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_shortens_hash() {
        let a = Artifact::new("main.go", ArtifactType::Source, "package main\n");
        assert_eq!(a.id().to_string(), format!("main.go@{}", &a.hash[..12]));

        let odd = ArtifactId {
            path: "x".to_string(),
            hash: "ééééééééééééé".to_string(),
        };
        assert_eq!(odd.to_string(), "x@éééééééééééé");
        let short = ArtifactId {
            path: "x".to_string(),
            hash: "ab".to_string(),
        };
        assert_eq!(short.to_string(), "x@ab");
    }

    #[test]
    fn test_new_computes_hash_and_size() {
        let a = Artifact::new("src/main.go", ArtifactType::Source, "package main\n");
        assert_eq!(a.size, 13);
        assert_eq!(a.hash.len(), 64);
        assert!(a.verify_hash());
        assert_eq!(a.language.as_deref(), Some("go"));
    }

    #[test]
    fn test_with_content_is_a_new_version() {
        let original = Artifact::new("app.py", ArtifactType::Source, "print('a')");
        let repaired = original.with_content("print('b')");

        assert_eq!(original.content, "print('a')");
        assert_ne!(original.hash, repaired.hash);
        assert_ne!(original.id(), repaired.id());
        assert_eq!(original.path, repaired.path);
        assert_eq!(
            repaired.metadata.get(PREVIOUS_HASH_KEY),
            Some(&serde_json::Value::String(original.hash.clone()))
        );
        assert!(repaired.verify_hash());
    }

    #[test]
    fn test_identity_is_path_and_hash() {
        let a = Artifact::new("a.go", ArtifactType::Source, "x");
        let b = Artifact::new("b.go", ArtifactType::Source, "x");
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_infer_language() {
        assert_eq!(infer_language("pkg/handler_test.go"), Some("go"));
        assert_eq!(infer_language("web/App.TSX"), Some("typescript"));
        assert_eq!(infer_language("api/openapi.yaml"), Some("yaml"));
        assert_eq!(infer_language("Makefile"), None);
    }

    #[test]
    fn test_file_name_and_extension() {
        let a = Artifact::new("tests/Test_Utils.PY", ArtifactType::Test, "");
        assert_eq!(a.file_name(), "test_utils.py");
        assert_eq!(a.extension().as_deref(), Some("py"));

        let dotfile = Artifact::new(".env", ArtifactType::Config, "");
        assert_eq!(dotfile.extension(), None);
    }

    #[test]
    fn test_builder_lowercases_language_and_framework() {
        let a = Artifact::new("x", ArtifactType::Source, "")
            .with_language("Go")
            .with_framework("Gin");
        assert_eq!(a.language.as_deref(), Some("go"));
        assert_eq!(a.framework.as_deref(), Some("gin"));
    }
}
