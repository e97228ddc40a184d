//! Language-feature queries: resolve the node under a cursor and assemble
//! hover and go-to-definition replies from the solved state.

use refract_pointer::NodeId;
use tracing::debug;
use url::Url;

use crate::analyzer::AnalyzerInner;
use crate::cache::CacheError;
use crate::nominal::Nominal;
use crate::resolve::resolve_ref;
use crate::yaml::{Pos, Span, YamlDocument, YamlValue};

/// A hover reply before serialization: the role, a derived display name,
/// the value at the target, and (for parameter lists) the elements with
/// their `$ref`s resolved.
#[derive(Clone, Debug)]
pub struct HoverPayload {
    pub nominal: Nominal,
    pub name: String,
    pub value: serde_json::Value,
    pub parameters: Option<Vec<serde_json::Value>>,
}

/// A go-to-definition reply.
#[derive(Clone, Debug)]
pub struct DefinitionLink {
    pub target_uri: Url,
    pub origin_span: Option<Span>,
    pub target_span: Span,
    pub target_selection_span: Span,
}

pub(crate) async fn hover(
    inner: &AnalyzerInner,
    uri: &Url,
    pos: Pos,
) -> Result<Option<HoverPayload>, CacheError> {
    let loaders = inner.loaders();
    let document = loaders.document.get(uri).await?;
    let Some(yaml) = document.yaml() else {
        return Ok(None);
    };

    let Some(target) = target_at(yaml, uri, pos) else {
        return Ok(None);
    };

    let connectivity = loaders.connectivity.get(&()).await?;
    let group = connectivity.group_id(target.uri());
    let analysis = loaders.groups.get(&group).await?;
    // Nodes without a role have nothing to say; this is also what keeps
    // never-referenced component files silent.
    let Some(nominal) = analysis.solve.get_canonical_nominal(&target) else {
        return Ok(None);
    };

    let target_document = loaders.document.get(target.uri()).await?;
    let Some(target_yaml) = target_document.yaml() else {
        return Ok(None);
    };
    let Some(value) = target_yaml.value_at(target.pointer()) else {
        debug!(target: "refract::query", node = %target, "hover target has no value");
        return Ok(None);
    };

    let parameters = if nominal == Nominal::Parameters {
        resolve_parameters(inner, target_yaml, &target).await?
    } else {
        None
    };

    Ok(Some(HoverPayload {
        nominal,
        name: derived_name(&target),
        value,
        parameters,
    }))
}

/// The node the cursor addresses: a `$ref` under the cursor resolves to
/// its target; otherwise the map key (or sequence index) under the cursor
/// names the node, following a `$ref` value one step if the key holds one.
fn target_at(yaml: &YamlDocument, uri: &Url, pos: Pos) -> Option<NodeId> {
    if let Some(site) = yaml.ref_at_position(pos) {
        return match resolve_ref(uri, &site.reference) {
            Ok(target) => Some(target),
            Err(error) => {
                debug!(target: "refract::query", %uri, %error, "unresolvable ref under cursor");
                None
            }
        };
    }
    let found = yaml.key_at_position(pos)?;
    if let Some((_, reference)) = yaml.node_at(&found.path).and_then(|node| node.ref_entry())
        && let Ok(target) = resolve_ref(uri, reference)
    {
        return Some(target);
    }
    Some(NodeId::new(uri.clone(), found.path))
}

/// For a `Parameters` array, each element is presented with its `$ref`
/// replaced by the referent's value.
async fn resolve_parameters(
    inner: &AnalyzerInner,
    target_yaml: &YamlDocument,
    target: &NodeId,
) -> Result<Option<Vec<serde_json::Value>>, CacheError> {
    let Some(node) = target_yaml.node_at(target.pointer()) else {
        return Ok(None);
    };
    let YamlValue::Sequence(items) = &node.value else {
        return Ok(None);
    };
    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
        if let Some((_, reference)) = item.ref_entry()
            && let Ok(referent) = resolve_ref(target.uri(), reference)
        {
            let document = inner.loaders().document.get(referent.uri()).await?;
            let value = document
                .yaml()
                .and_then(|yaml| yaml.value_at(referent.pointer()))
                .unwrap_or(serde_json::Value::Null);
            resolved.push(value);
        } else {
            resolved.push(item.to_json());
        }
    }
    Ok(Some(resolved))
}

/// The display name of a node: its last pointer segment (for path items
/// that segment is the path string itself), or the file stem at the
/// document root.
fn derived_name(target: &NodeId) -> String {
    if let Some(segment) = target.pointer().last() {
        return segment.as_str().to_owned();
    }
    let path = target.uri().path();
    std::path::Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

pub(crate) async fn definition(
    inner: &AnalyzerInner,
    uri: &Url,
    pos: Pos,
) -> Result<Option<DefinitionLink>, CacheError> {
    let loaders = inner.loaders();
    let references = loaders.references.get(uri).await?;
    let Some(site) = references.site_at(pos) else {
        return Ok(None);
    };
    let Ok(target) = &site.resolved else {
        debug!(target: "refract::query", %uri, reference = %site.reference, "definition on unresolvable ref");
        return Ok(None);
    };

    let document = loaders.document.get(target.uri()).await?;
    let Some(yaml) = document.yaml() else {
        return Ok(None);
    };
    let Some(target_span) = yaml.span_at(target.pointer()) else {
        return Ok(None);
    };
    let target_selection_span = yaml.key_span_at(target.pointer()).unwrap_or(target_span);
    Ok(Some(DefinitionLink {
        target_uri: target.uri().clone(),
        origin_span: Some(site.value_span),
        target_span,
        target_selection_span,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_name_from_pointer() {
        let id = NodeId::parse("file:///ws/a.yml#/components/schemas/Pet").unwrap();
        assert_eq!(derived_name(&id), "Pet");
    }

    #[test]
    fn test_derived_name_keeps_path_strings() {
        let id = NodeId::parse("file:///ws/a.yml#/paths/~1pets~1%7BpetId%7D").unwrap();
        assert_eq!(derived_name(&id), "/pets/{petId}");
    }

    #[test]
    fn test_derived_name_for_document_root() {
        let id = NodeId::parse("file:///ws/schemas/Pet.yaml").unwrap();
        assert_eq!(derived_name(&id), "Pet");
    }
}
