//! The document manager: reads workspace files (open-editor overlays
//! first), parses them, and classifies them by filename.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::analyzer::AnalyzerInner;
use crate::cache::{CacheError, Produced};
use crate::workspace::DocumentRole;
use crate::yaml::YamlDocument;

/// A workspace document in one of its three lives: an OpenAPI root, a
/// referenced component file, or a tomb for anything unreadable.
#[derive(Debug)]
pub enum ServerDocument {
    OpenApi { uri: Url, yaml: Arc<YamlDocument> },
    Component { uri: Url, yaml: Arc<YamlDocument> },
    Tomb { uri: Url },
}

impl ServerDocument {
    pub fn uri(&self) -> &Url {
        match self {
            ServerDocument::OpenApi { uri, .. }
            | ServerDocument::Component { uri, .. }
            | ServerDocument::Tomb { uri } => uri,
        }
    }

    /// The parsed document, unless this is a tomb.
    pub fn yaml(&self) -> Option<&Arc<YamlDocument>> {
        match self {
            ServerDocument::OpenApi { yaml, .. } | ServerDocument::Component { yaml, .. } => {
                Some(yaml)
            }
            ServerDocument::Tomb { .. } => None,
        }
    }

    pub fn is_tomb(&self) -> bool {
        matches!(self, ServerDocument::Tomb { .. })
    }

    pub fn is_openapi_root(&self) -> bool {
        matches!(self, ServerDocument::OpenApi { .. })
    }
}

/// Computes the `("serverDocument", uri)` entry. Unreadable or unparsable
/// files become tombs with an empty content hash; everything downstream
/// handles tombs explicitly.
pub(crate) async fn compute(
    inner: &AnalyzerInner,
    uri: Url,
) -> Result<Produced<ServerDocument>, CacheError> {
    let overlay = inner.overlays.lock().unwrap().get(&uri).cloned();
    let text = match overlay {
        Some(text) => text,
        None => match inner.vfs.read_file(&uri).await {
            Ok(text) => text,
            Err(error) => {
                debug!(target: "refract::document", %uri, %error, "read failed");
                return Ok(Produced::new(ServerDocument::Tomb { uri }, ""));
            }
        },
    };

    let yaml = match YamlDocument::parse(uri.clone(), &text) {
        Ok(yaml) => Arc::new(yaml),
        Err(error) => {
            debug!(target: "refract::document", %uri, %error, "parse failed");
            return Ok(Produced::new(ServerDocument::Tomb { uri }, ""));
        }
    };

    let content_hash = yaml.content_hash();
    let document = match inner.workspace.classify(&uri) {
        DocumentRole::OpenApi => ServerDocument::OpenApi { uri, yaml },
        DocumentRole::Component => ServerDocument::Component { uri, yaml },
    };
    Ok(Produced::new(document, content_hash))
}
