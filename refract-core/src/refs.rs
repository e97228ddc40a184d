//! The reference manager: every `$ref` site in a document, with its
//! resolution outcome. The content hash covers the reference strings and
//! outcome tags only, so edits that leave the reference structure alone
//! keep downstream graph work fresh.

use refract_pointer::{JsonPointer, NodeId};
use url::Url;

use crate::analyzer::AnalyzerInner;
use crate::cache::{CacheError, LoadCtx, Produced};
use crate::key::KeyValue;
use crate::resolve::{ResolveError, resolve_ref};
use crate::yaml::Span;

/// One `$ref` site.
#[derive(Clone, Debug)]
pub struct Reference {
    /// The reference string as written.
    pub reference: String,
    /// Pointer to the mapping that holds the `$ref`.
    pub path: JsonPointer<'static>,
    pub key_span: Span,
    pub value_span: Span,
    pub resolved: Result<NodeId, ResolveError>,
}

/// All `$ref` sites of one document, in document order.
#[derive(Clone, Debug, Default)]
pub struct DocumentReferences {
    pub references: Vec<Reference>,
}

impl DocumentReferences {
    /// Finds the site whose key or value region contains `pos`.
    pub fn site_at(&self, pos: crate::yaml::Pos) -> Option<&Reference> {
        self.references
            .iter()
            .find(|site| site.key_span.contains(pos) || site.value_span.contains(pos))
    }
}

pub(crate) async fn compute(
    inner: &AnalyzerInner,
    ctx: LoadCtx,
    uri: Url,
) -> Result<Produced<DocumentReferences>, CacheError> {
    let document = inner.loaders().document.load(&ctx, &uri).await?;
    let Some(yaml) = document.yaml() else {
        return Ok(Produced::new(DocumentReferences::default(), ""));
    };

    let references: Vec<Reference> = yaml
        .collect_refs()
        .into_iter()
        .map(|site| {
            let resolved = resolve_ref(&uri, &site.reference);
            Reference {
                reference: site.reference,
                path: site.path,
                key_span: site.key_span,
                value_span: site.value_span,
                resolved,
            }
        })
        .collect();

    let content_hash = hash_references(&references);
    Ok(Produced::new(DocumentReferences { references }, content_hash))
}

fn hash_references(references: &[Reference]) -> String {
    let entries = references
        .iter()
        .map(|site| {
            let outcome = match &site.resolved {
                Ok(_) => "ok",
                Err(error) => error.kind(),
            };
            KeyValue::Seq(vec![
                KeyValue::Str(site.reference.clone()),
                KeyValue::Str(outcome.to_owned()),
            ])
        })
        .collect();
    KeyValue::Seq(entries).fingerprint().to_hex()
}
