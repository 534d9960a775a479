//! Metadata embedded in extension archives.
//!
//! An archive carries up to three JSON entries:
//! - `plugin.json`: [`ExtensionMeta`], required for the archive to count as an extension
//! - `dependency.json`: list of [`Dependency`]
//! - `components.json`: list of [`ComponentEntry`]

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

pub const PLUGIN_DESCRIPTOR: &str = "plugin.json";
pub const DEPENDENCY_DESCRIPTOR: &str = "dependency.json";
pub const COMPONENT_DESCRIPTOR: &str = "components.json";

/// Marker a component must carry to be instantiated.
pub const COMPONENT_MARKER: &str = "component";

/// Descriptor of an extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtensionMeta {
    pub name: String,
    pub version: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
}

impl std::fmt::Display for ExtensionMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{} --{}", self.name, self.version, self.author)
    }
}

/// A third-party artifact an extension needs at runtime.
///
/// Identity is `(group_id, artifact_id)`; the version is informational.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    /// File extension of the artifact, `jar` when absent.
    #[serde(default)]
    pub extension: Option<String>,
}

impl Dependency {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            extension: None,
        }
    }

    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or("jar")
    }

    /// `<artifact>-<version>.<ext>`
    pub fn file_name(&self) -> String {
        format!("{}-{}.{}", self.artifact_id, self.version, self.extension())
    }

    /// Repository path: `group/with/slashes/artifact/version/artifact-version.ext`.
    pub fn repository_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.group_id.replace('.', "/"),
            self.artifact_id,
            self.version,
            self.file_name()
        )
    }

    /// Download URL of this dependency on `mirror`.
    pub fn url_on(&self, mirror: &str) -> String {
        format!("{}/{}", mirror.trim_end_matches('/'), self.repository_path())
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.group_id == other.group_id && self.artifact_id == other.artifact_id
    }
}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group_id.hash(state);
        self.artifact_id.hash(state);
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.artifact_id, self.version)
    }
}

/// An exported component declared by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    /// Qualified identifier, also the key of its factory in the catalog.
    pub id: String,
    #[serde(default)]
    pub markers: Vec<String>,
    /// Event type this component is the default handler for.
    #[serde(default)]
    pub default_for: Option<String>,
}

impl ComponentEntry {
    pub fn is_component(&self) -> bool {
        self.markers.iter().any(|m| m == COMPONENT_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_dependency_identity_ignores_version() {
        let a = Dependency::new("com.example", "lib", "1.0");
        let b = Dependency::new("com.example", "lib", "2.0");
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b, Dependency::new("com.other", "lib", "1.0")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_dependency_url() {
        let dep = Dependency::new("com.alibaba.fastjson2", "fastjson2", "2.0.53");
        assert_eq!(
            dep.url_on("https://repo1.maven.org/maven2/"),
            "https://repo1.maven.org/maven2/com/alibaba/fastjson2/fastjson2/2.0.53/fastjson2-2.0.53.jar"
        );

        let zipped = Dependency {
            extension: Some("zip".into()),
            ..Dependency::new("org.x", "y", "1")
        };
        assert_eq!(zipped.file_name(), "y-1.zip");
    }

    #[test]
    fn test_component_entry_markers() {
        let entry: ComponentEntry = serde_json::from_str(
            r#"{"id": "a.B", "markers": ["component"], "default_for": "live_on"}"#,
        )
        .unwrap();
        assert!(entry.is_component());
        assert_eq!(entry.default_for.as_deref(), Some("live_on"));

        let plain: ComponentEntry = serde_json::from_str(r#"{"id": "a.C"}"#).unwrap();
        assert!(!plain.is_component());
    }
}
