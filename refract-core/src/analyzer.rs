//! The analyzer: owns the query cache, the VFS, overlay buffers, and the
//! registered loaders, and exposes the language-feature entry points the
//! server calls.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use rustc_hash::FxHashMap;
use tracing::debug;
use url::Url;

use crate::cache::{CacheError, Loader, QueryCache};
use crate::connectivity::{self, DiscoveredRoots, DocumentConnectivity, GroupId};
use crate::document::{self, ServerDocument};
use crate::extract::{self, DocumentShapes, NominalWalk, WalkSeed};
use crate::group::{self, GroupAnalysis};
use crate::query::{self, DefinitionLink, HoverPayload};
use crate::refs::{self, DocumentReferences};
use crate::vfs::Vfs;
use crate::workspace::Workspace;
use crate::yaml::Pos;

pub(crate) struct Loaders {
    pub(crate) document: Loader<Url, ServerDocument>,
    pub(crate) references: Loader<Url, DocumentReferences>,
    pub(crate) shapes: Loader<Url, DocumentShapes>,
    pub(crate) nominal_walk: Loader<WalkSeed, NominalWalk>,
    pub(crate) roots: Loader<(), DiscoveredRoots>,
    pub(crate) connectivity: Loader<(), DocumentConnectivity>,
    pub(crate) groups: Loader<GroupId, GroupAnalysis>,
}

pub(crate) struct AnalyzerInner {
    pub(crate) cache: QueryCache,
    pub(crate) vfs: Arc<dyn Vfs>,
    pub(crate) workspace: Workspace,
    /// Open-editor buffers, consulted before the VFS.
    pub(crate) overlays: Mutex<FxHashMap<Url, String>>,
    loaders: OnceLock<Loaders>,
}

impl AnalyzerInner {
    pub(crate) fn loaders(&self) -> &Loaders {
        self.loaders.get().expect("loaders registered at construction")
    }
}

/// Resolves a weak analyzer handle inside a producer; the cache has been
/// shut down if the analyzer is gone.
macro_rules! producer {
    ($weak:ident, |$inner:ident, $ctx:pat_param, $key:ident| $body:expr) => {{
        let $weak = $weak.clone();
        move |$ctx, $key| {
            let $weak = $weak.clone();
            async move {
                let $inner = $weak.upgrade().ok_or(CacheError::ShutDown)?;
                $body
            }
        }
    }};
}

/// The analysis engine for one workspace.
pub struct Analyzer {
    inner: Arc<AnalyzerInner>,
}

impl Analyzer {
    pub fn new(vfs: Arc<dyn Vfs>, workspace: Workspace) -> Self {
        let cache = QueryCache::new();
        let inner = Arc::new(AnalyzerInner {
            cache: cache.clone(),
            vfs,
            workspace,
            overlays: Mutex::default(),
            loaders: OnceLock::new(),
        });

        let weak: Weak<AnalyzerInner> = Arc::downgrade(&inner);
        let loaders = Loaders {
            document: cache.loader(
                "serverDocument",
                producer!(weak, |inner, _ctx, uri| document::compute(&inner, uri).await),
            ),
            references: cache.loader(
                "documentReferences",
                producer!(weak, |inner, ctx, uri| refs::compute(&inner, ctx, uri).await),
            ),
            shapes: cache.loader(
                "documentShapes",
                producer!(weak, |inner, ctx, uri| {
                    extract::compute_shapes(&inner, ctx, uri).await
                }),
            ),
            nominal_walk: cache.loader(
                "nominalWalk",
                producer!(weak, |inner, ctx, seed| {
                    extract::compute_walk(&inner, ctx, seed).await
                }),
            ),
            roots: cache.loader(
                "discoverRoots",
                producer!(weak, |inner, _ctx, key| {
                    let () = key;
                    connectivity::compute_roots(&inner).await
                }),
            ),
            connectivity: cache.loader(
                "documentConnectivity",
                producer!(weak, |inner, ctx, key| {
                    connectivity::compute(&inner, ctx, key).await
                }),
            ),
            groups: cache.loader(
                "groupAnalysis",
                producer!(weak, |inner, ctx, group| {
                    group::compute(&inner, ctx, group).await
                }),
            ),
        };
        let _ = inner.loaders.set(loaders);

        Self { inner }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.inner.workspace
    }

    /// Tears the cache down. Requests in flight fail with
    /// [`CacheError::ShutDown`]; nothing survives for the next process.
    pub fn shutdown(&self) {
        self.inner.cache.shutdown();
    }

    /// Records an opened buffer and invalidates the document it shadows.
    /// Newly-created files can change discovery, so roots reset too.
    pub fn open_document(&self, uri: &Url, text: impl Into<String>) {
        self.inner
            .overlays
            .lock()
            .unwrap()
            .insert(uri.clone(), text.into());
        self.invalidate_document(uri);
        self.inner.loaders().roots.invalidate(&());
    }

    /// Replaces an open buffer's contents after an edit.
    pub fn change_document(&self, uri: &Url, text: impl Into<String>) {
        self.inner
            .overlays
            .lock()
            .unwrap()
            .insert(uri.clone(), text.into());
        self.invalidate_document(uri);
    }

    /// Drops the overlay; subsequent reads come from the VFS again.
    pub fn close_document(&self, uri: &Url) {
        self.inner.overlays.lock().unwrap().remove(uri);
        self.invalidate_document(uri);
        self.inner.loaders().roots.invalidate(&());
    }

    /// Invalidates the cache entry for one document; everything downstream
    /// re-verifies lazily on the next query.
    pub fn invalidate_document(&self, uri: &Url) {
        debug!(target: "refract::analyzer", %uri, "document invalidated");
        self.inner.loaders().document.invalidate(uri);
    }

    /// The text of the open buffer for `uri`, if any.
    pub fn overlay(&self, uri: &Url) -> Option<String> {
        self.inner.overlays.lock().unwrap().get(uri).cloned()
    }

    pub async fn document(&self, uri: &Url) -> Result<Arc<ServerDocument>, CacheError> {
        self.inner.loaders().document.get(uri).await
    }

    pub async fn references(&self, uri: &Url) -> Result<Arc<DocumentReferences>, CacheError> {
        self.inner.loaders().references.get(uri).await
    }

    pub async fn connectivity(&self) -> Result<Arc<DocumentConnectivity>, CacheError> {
        self.inner.loaders().connectivity.get(&()).await
    }

    pub async fn group_analysis(&self, group: &GroupId) -> Result<Arc<GroupAnalysis>, CacheError> {
        self.inner.loaders().groups.get(group).await
    }

    pub async fn hover(&self, uri: &Url, pos: Pos) -> Result<Option<HoverPayload>, CacheError> {
        query::hover(&self.inner, uri, pos).await
    }

    pub async fn goto_definition(
        &self,
        uri: &Url,
        pos: Pos,
    ) -> Result<Option<DefinitionLink>, CacheError> {
        query::definition(&self.inner, uri, pos).await
    }
}
