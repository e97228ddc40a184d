//! Workspace configuration: folders, discovery globs, and the settings
//! block recognized under `openapi-lsp.*`.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use url::Url;

/// Filename patterns that mark a document as an OpenAPI root.
const ROOT_PATTERNS: &[&str] = &["**/*.openapi.{yml,yaml}", "**/openapi.{yml,yaml}"];

/// Filename patterns a component document may use.
const COMPONENT_PATTERNS: &[&str] = &["**/*.{json,yml,yaml}"];

/// The settings block recognized at initialization.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub discover_roots: DiscoverRootsSettings,
    pub debug: DebugSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoverRootsSettings {
    /// Glob that narrows where root documents are discovered.
    pub pattern: String,
    /// Glob of paths excluded from discovery.
    pub ignore: String,
}

impl Default for DiscoverRootsSettings {
    fn default() -> Self {
        Self {
            pattern: "**/*".to_owned(),
            ignore: "{**/node_modules/**,**/.git/**,**/.hg/**}".to_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DebugSettings {
    /// Raises cache logging to debug level.
    pub cache: bool,
}

/// The compiled glob sets used for discovery and classification.
#[derive(Clone, Debug)]
pub struct WorkspaceGlobs {
    pub roots: GlobSet,
    pub discover: GlobSet,
    pub ignore: GlobSet,
    pub components: GlobSet,
}

/// The role a filename implies for a readable document.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocumentRole {
    OpenApi,
    Component,
}

/// Workspace folders plus the settings that shape discovery.
#[derive(Clone, Debug)]
pub struct Workspace {
    folders: Vec<Url>,
    settings: Settings,
    globs: WorkspaceGlobs,
}

impl Workspace {
    pub fn new(folders: Vec<Url>, settings: Settings) -> Result<Self, BadSettings> {
        let roots = build_glob_set(ROOT_PATTERNS.iter().copied())?;
        let components = build_glob_set(COMPONENT_PATTERNS.iter().copied())?;
        let discover = build_glob_set([settings.discover_roots.pattern.as_str()])?;
        let ignore = build_glob_set([settings.discover_roots.ignore.as_str()])?;
        Ok(Self {
            folders,
            settings,
            globs: WorkspaceGlobs {
                roots,
                discover,
                ignore,
                components,
            },
        })
    }

    pub fn folders(&self) -> &[Url] {
        &self.folders
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn globs(&self) -> &WorkspaceGlobs {
        &self.globs
    }

    /// The path used for glob matching: relative to the containing
    /// workspace folder when there is one.
    pub fn match_path(&self, uri: &Url) -> PathBuf {
        let path = uri
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(uri.path()));
        for folder in &self.folders {
            if let Ok(root) = folder.to_file_path()
                && let Ok(relative) = path.strip_prefix(&root)
            {
                return relative.to_path_buf();
            }
        }
        path
    }

    /// Classifies a readable document by its filename.
    pub fn classify(&self, uri: &Url) -> DocumentRole {
        let path = self.match_path(uri);
        if self.matches_root(&path) {
            DocumentRole::OpenApi
        } else {
            DocumentRole::Component
        }
    }

    /// Returns `true` if `path` names a discoverable root document.
    pub fn matches_root(&self, path: &Path) -> bool {
        self.globs.roots.is_match(path)
            && self.globs.discover.is_match(path)
            && !self.globs.ignore.is_match(path)
    }
}

fn build_glob_set<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet, BadSettings> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| BadSettings(e.to_string()))?);
    }
    builder.build().map_err(|e| BadSettings(e.to_string()))
}

/// A settings value that doesn't compile to a glob set.
#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid workspace settings: {0}")]
pub struct BadSettings(String);

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        let folders = vec![Url::parse("file:///ws").unwrap()];
        Workspace::new(folders, Settings::default()).unwrap()
    }

    #[test]
    fn test_classify_roots() {
        let ws = workspace();
        let openapi = Url::parse("file:///ws/api/openapi.yml").unwrap();
        let suffixed = Url::parse("file:///ws/pets.openapi.yaml").unwrap();
        let component = Url::parse("file:///ws/schemas/Pet.yaml").unwrap();
        assert_eq!(ws.classify(&openapi), DocumentRole::OpenApi);
        assert_eq!(ws.classify(&suffixed), DocumentRole::OpenApi);
        assert_eq!(ws.classify(&component), DocumentRole::Component);
    }

    #[test]
    fn test_ignore_excludes_discovery() {
        let ws = workspace();
        assert!(ws.matches_root(Path::new("api/openapi.yml")));
        assert!(!ws.matches_root(Path::new("node_modules/dep/openapi.yml")));
    }

    #[test]
    fn test_narrowed_pattern() {
        let settings = Settings {
            discover_roots: DiscoverRootsSettings {
                pattern: "api/**".to_owned(),
                ..Default::default()
            },
            ..Default::default()
        };
        let ws = Workspace::new(vec![Url::parse("file:///ws").unwrap()], settings).unwrap();
        assert!(ws.matches_root(Path::new("api/openapi.yml")));
        assert!(!ws.matches_root(Path::new("other/openapi.yml")));
    }

    #[test]
    fn test_settings_decode() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "discoverRoots": { "pattern": "specs/**" },
            "debug": { "cache": true },
        }))
        .unwrap();
        assert_eq!(settings.discover_roots.pattern, "specs/**");
        assert_eq!(
            settings.discover_roots.ignore,
            "{**/node_modules/**,**/.git/**,**/.hg/**}"
        );
        assert!(settings.debug.cache);
    }
}
