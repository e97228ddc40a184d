//! Extraction of solver inputs from parsed documents: a structural shape
//! for every node, and nominal labels produced by walking the YAML tree
//! under the role table. Shape hashes cover structure only, so edits that
//! keep the structure (description tweaks and the like) gate downstream
//! solves out of recomputing.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use refract_pointer::{JsonPointer, NodeId};
use url::Url;

use crate::analyzer::AnalyzerInner;
use crate::cache::{CacheError, LoadCtx, Produced};
use crate::key::{KeyArg, KeyValue};
use crate::nominal::{FieldRole, Nominal};
use crate::resolve::resolve_ref;
use crate::solve::{LocalShape, PrimKind};
use crate::workspace::DocumentRole;
use crate::yaml::{YamlNode, YamlValue};

/// Every node of one document, shaped for the solver, along with the
/// document's role. Group analysis reads this instead of the raw document,
/// so value-only edits never reach the solver.
#[derive(Clone, Debug, Default)]
pub struct DocumentShapes {
    pub shapes: IndexMap<NodeId, LocalShape>,
    /// `None` for tombs.
    pub role: Option<DocumentRole>,
}

impl DocumentShapes {
    pub fn is_tomb(&self) -> bool {
        self.role.is_none()
    }

    pub fn is_openapi_root(&self) -> bool {
        self.role == Some(DocumentRole::OpenApi)
    }
}

pub(crate) async fn compute_shapes(
    inner: &AnalyzerInner,
    ctx: LoadCtx,
    uri: Url,
) -> Result<Produced<DocumentShapes>, CacheError> {
    let document = inner.loaders().document.load(&ctx, &uri).await?;
    let Some(yaml) = document.yaml() else {
        return Ok(Produced::new(DocumentShapes::default(), ""));
    };
    let role = if document.is_openapi_root() {
        DocumentRole::OpenApi
    } else {
        DocumentRole::Component
    };
    let mut shapes = IndexMap::new();
    collect(&uri, yaml.root(), &JsonPointer::empty(), &mut shapes);
    let content_hash = KeyValue::Seq(vec![
        KeyValue::Str(format!("{role:?}")),
        shapes_key(&shapes),
    ])
    .fingerprint()
    .to_hex();
    Ok(Produced::new(
        DocumentShapes {
            shapes,
            role: Some(role),
        },
        content_hash,
    ))
}

fn collect(
    uri: &Url,
    node: &YamlNode,
    pointer: &JsonPointer<'static>,
    out: &mut IndexMap<NodeId, LocalShape>,
) {
    let id = NodeId::new(uri.clone(), pointer.clone());
    match &node.value {
        YamlValue::Scalar(scalar) => {
            out.insert(id, LocalShape::Prim(PrimKind::of_scalar(scalar)));
        }
        YamlValue::Mapping(entries) => {
            if let Some((_, reference)) = node.ref_entry()
                && let Ok(target) = resolve_ref(uri, reference)
            {
                // The `$ref` mapping is the referenced value; nothing
                // under it contributes shapes of its own. A reference
                // that doesn't resolve falls through to a plain object.
                out.insert(id, LocalShape::Ref(target));
                return;
            }
            let fields = entries
                .iter()
                .map(|entry| {
                    let child = NodeId::new(uri.clone(), pointer.child(entry.key.clone()));
                    (entry.key.clone(), child)
                })
                .collect();
            out.insert(id, LocalShape::Object(fields));
            for entry in entries {
                collect(uri, &entry.value, &pointer.child(entry.key.clone()), out);
            }
        }
        YamlValue::Sequence(items) => {
            let fields = items
                .iter()
                .enumerate()
                .map(|(index, _)| {
                    let child = NodeId::new(uri.clone(), pointer.child(index));
                    (index.to_string(), child)
                })
                .collect();
            out.insert(id, LocalShape::Array(fields));
            for (index, item) in items.iter().enumerate() {
                collect(uri, item, &pointer.child(index), out);
            }
        }
    }
}

/// Canonicalizes a shape table for hashing. Primitive shapes contribute
/// their kind, not their literal, so value-only edits hash identically.
fn shapes_key(shapes: &IndexMap<NodeId, LocalShape>) -> KeyValue {
    let entries: BTreeMap<String, KeyValue> = shapes
        .iter()
        .map(|(node, shape)| {
            let value = match shape {
                LocalShape::Prim(kind) => KeyValue::Seq(vec![
                    KeyValue::Str("prim".to_owned()),
                    KeyValue::Str(kind.as_str().to_owned()),
                ]),
                LocalShape::Ref(target) => KeyValue::Seq(vec![
                    KeyValue::Str("ref".to_owned()),
                    KeyValue::Str(target.to_string()),
                ]),
                LocalShape::Array(fields) => KeyValue::Seq(vec![
                    KeyValue::Str("array".to_owned()),
                    KeyValue::Seq(
                        fields
                            .values()
                            .map(|child| KeyValue::Str(child.to_string()))
                            .collect(),
                    ),
                ]),
                LocalShape::Object(fields) => KeyValue::Seq(vec![
                    KeyValue::Str("object".to_owned()),
                    KeyValue::Map(
                        fields
                            .iter()
                            .map(|(key, child)| (key.clone(), KeyValue::Str(child.to_string())))
                            .collect(),
                    ),
                ]),
            };
            (node.to_string(), value)
        })
        .collect();
    KeyValue::Map(entries)
}

/// A starting point for one nominal walk: walk the fragment at `pointer`
/// in `uri` as if it plays `nominal`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct WalkSeed {
    pub uri: Url,
    pub pointer: JsonPointer<'static>,
    pub nominal: Nominal,
}

impl WalkSeed {
    pub fn new(target: &NodeId, nominal: Nominal) -> Self {
        Self {
            uri: target.uri().clone(),
            pointer: target.pointer().clone(),
            nominal,
        }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.uri.clone(), self.pointer.clone())
    }
}

impl KeyArg for WalkSeed {
    fn to_key(&self) -> KeyValue {
        KeyValue::Map(BTreeMap::from([
            ("nominal".to_owned(), KeyValue::Str(self.nominal.as_str().to_owned())),
            ("pointer".to_owned(), KeyValue::Str(self.pointer.to_string())),
            ("uri".to_owned(), KeyValue::Str(self.uri.as_str().to_owned())),
        ]))
    }

    fn from_key(value: &KeyValue) -> Option<Self> {
        let KeyValue::Map(entries) = value else {
            return None;
        };
        let field = |name: &str| match entries.get(name) {
            Some(KeyValue::Str(s)) => Some(s.as_str()),
            _ => None,
        };
        Some(Self {
            uri: Url::parse(field("uri")?).ok()?,
            pointer: JsonPointer::parse_owned(field("pointer")?).ok()?,
            nominal: Nominal::parse(field("nominal")?)?,
        })
    }
}

/// The outcome of one nominal walk: role labels for nodes of this
/// document, and seeds for the fragments its `$ref`s point at.
#[derive(Clone, Debug, Default)]
pub struct NominalWalk {
    pub labels: Vec<(NodeId, Nominal)>,
    pub seeds: Vec<(NodeId, Nominal)>,
}

pub(crate) async fn compute_walk(
    inner: &AnalyzerInner,
    ctx: LoadCtx,
    seed: WalkSeed,
) -> Result<Produced<NominalWalk>, CacheError> {
    let document = inner.loaders().document.load(&ctx, &seed.uri).await?;
    let mut walk = NominalWalk::default();
    if let Some(yaml) = document.yaml()
        && let Some(node) = yaml.node_at(&seed.pointer)
    {
        visit(&seed.uri, node, &seed.pointer, seed.nominal, &mut walk);
    }
    let content_hash = walk_key(&walk).fingerprint().to_hex();
    Ok(Produced::new(walk, content_hash))
}

/// The lenient decode: descend wherever the role table has a rule, label
/// every node visited with the role its slot requests, and stop at
/// `$ref`s, which seed follow-up walks at their targets.
fn visit(
    uri: &Url,
    node: &YamlNode,
    pointer: &JsonPointer<'static>,
    nominal: Nominal,
    out: &mut NominalWalk,
) {
    out.labels.push((NodeId::new(uri.clone(), pointer.clone()), nominal));
    match &node.value {
        YamlValue::Mapping(entries) => {
            if let Some((_, reference)) = node.ref_entry() {
                if let Ok(target) = resolve_ref(uri, reference) {
                    out.seeds.push((target, nominal));
                }
                return;
            }
            if let Some(role) = nominal.entry_role() {
                for entry in entries {
                    visit(uri, &entry.value, &pointer.child(entry.key.clone()), role, out);
                }
                return;
            }
            for entry in entries {
                let child = pointer.child(entry.key.clone());
                match nominal.field_role(&entry.key) {
                    Some(FieldRole::One(role)) => visit(uri, &entry.value, &child, role, out),
                    Some(FieldRole::Each(role)) => {
                        if let YamlValue::Sequence(items) = &entry.value.value {
                            for (index, item) in items.iter().enumerate() {
                                visit(uri, item, &child.child(index), role, out);
                            }
                        }
                    }
                    Some(FieldRole::Map(role)) => {
                        if let YamlValue::Mapping(inner) = &entry.value.value {
                            for inner_entry in inner {
                                visit(
                                    uri,
                                    &inner_entry.value,
                                    &child.child(inner_entry.key.clone()),
                                    role,
                                    out,
                                );
                            }
                        }
                    }
                    None => {}
                }
            }
        }
        YamlValue::Sequence(items) => {
            if let Some(role) = nominal.item_role() {
                for (index, item) in items.iter().enumerate() {
                    visit(uri, item, &pointer.child(index), role, out);
                }
            }
        }
        YamlValue::Scalar(_) => {}
    }
}

fn walk_key(walk: &NominalWalk) -> KeyValue {
    let label_entries = |pairs: &[(NodeId, Nominal)]| {
        KeyValue::Seq(
            pairs
                .iter()
                .map(|(node, nominal)| {
                    KeyValue::Seq(vec![
                        KeyValue::Str(node.to_string()),
                        KeyValue::Str(nominal.as_str().to_owned()),
                    ])
                })
                .collect(),
        )
    };
    KeyValue::Seq(vec![label_entries(&walk.labels), label_entries(&walk.seeds)])
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::yaml::YamlDocument;

    fn doc(text: &str) -> YamlDocument {
        YamlDocument::parse(Url::parse("file:///ws/openapi.yml").unwrap(), text).unwrap()
    }

    fn shapes_of(text: &str) -> IndexMap<NodeId, LocalShape> {
        let doc = doc(text);
        let mut shapes = IndexMap::new();
        collect(doc.uri(), doc.root(), &JsonPointer::empty(), &mut shapes);
        shapes
    }

    fn walk_of(text: &str, nominal: Nominal) -> NominalWalk {
        let doc = doc(text);
        let mut walk = NominalWalk::default();
        visit(doc.uri(), doc.root(), &JsonPointer::empty(), nominal, &mut walk);
        walk
    }

    fn id(pointer: &str) -> NodeId {
        NodeId::parse(&format!("file:///ws/openapi.yml{pointer}")).unwrap()
    }

    #[test]
    fn test_shapes_cover_every_node() {
        let shapes = shapes_of(indoc! {"
            components:
              schemas:
                Pet:
                  type: object
        "});
        assert_eq!(shapes.len(), 5);
        assert!(matches!(
            shapes.get(&id("#/components/schemas/Pet/type")),
            Some(LocalShape::Prim(PrimKind::String))
        ));
        let Some(LocalShape::Object(fields)) = shapes.get(&id("#/components/schemas")) else {
            panic!("expected an object shape");
        };
        assert_eq!(
            fields.get("Pet"),
            Some(&id("#/components/schemas/Pet"))
        );
    }

    #[test]
    fn test_ref_mapping_becomes_ref_shape() {
        let shapes = shapes_of(indoc! {"
            a:
              $ref: './other.yml#/defs/X'
        "});
        assert_eq!(
            shapes.get(&id("#/a")),
            Some(&LocalShape::Ref(
                NodeId::parse("file:///ws/other.yml#/defs/X").unwrap()
            ))
        );
        // Nothing under the `$ref` mapping is shaped.
        assert_eq!(shapes.len(), 2);
    }

    #[test]
    fn test_unresolvable_ref_falls_back_to_object() {
        let shapes = shapes_of(indoc! {"
            a:
              $ref: 'https://example.com/x.yml'
        "});
        assert!(matches!(shapes.get(&id("#/a")), Some(LocalShape::Object(_))));
    }

    #[test]
    fn test_shape_hash_ignores_literal_edits() {
        let before = shapes_key(&shapes_of("info:\n  description: old\n")).fingerprint();
        let after = shapes_key(&shapes_of("info:\n  description: new\n")).fingerprint();
        let reshaped = shapes_key(&shapes_of("info:\n  description: 3\n")).fingerprint();
        assert_eq!(before, after);
        assert_ne!(before, reshaped);
    }

    #[test]
    fn test_walk_labels_roles_through_the_tree() {
        let walk = walk_of(
            indoc! {"
                openapi: 3.0.3
                paths:
                  /pets:
                    get:
                      responses:
                        '200':
                          description: ok
                components:
                  schemas:
                    Pet:
                      type: object
            "},
            Nominal::Document,
        );
        let labels: IndexMap<NodeId, Nominal> = walk.labels.into_iter().collect();
        assert_eq!(labels.get(&id("")), Some(&Nominal::Document));
        assert_eq!(labels.get(&id("#/paths")), Some(&Nominal::Paths));
        assert_eq!(labels.get(&id("#/paths/~1pets")), Some(&Nominal::PathItem));
        assert_eq!(
            labels.get(&id("#/paths/~1pets/get")),
            Some(&Nominal::Operation)
        );
        assert_eq!(
            labels.get(&id("#/paths/~1pets/get/responses/200")),
            Some(&Nominal::Response)
        );
        assert_eq!(
            labels.get(&id("#/components/schemas/Pet")),
            Some(&Nominal::Schema)
        );
        // Plain fields have no role.
        assert_eq!(labels.get(&id("#/openapi")), None);
    }

    #[test]
    fn test_walk_stops_at_refs_and_seeds_targets() {
        let walk = walk_of(
            indoc! {"
                components:
                  schemas:
                    Pet:
                      $ref: './schemas/Pet.yaml'
            "},
            Nominal::Document,
        );
        // The ref site keeps the requested role.
        assert!(
            walk.labels
                .contains(&(id("#/components/schemas/Pet"), Nominal::Schema))
        );
        assert_eq!(
            walk.seeds,
            vec![(
                NodeId::parse("file:///ws/schemas/Pet.yaml").unwrap(),
                Nominal::Schema
            )]
        );
    }

    #[test]
    fn test_walk_descends_parameters_arrays() {
        let walk = walk_of(
            indoc! {"
                parameters:
                  - name: petId
                    schema:
                      type: integer
            "},
            Nominal::Operation,
        );
        let labels: IndexMap<NodeId, Nominal> = walk.labels.into_iter().collect();
        assert_eq!(labels.get(&id("#/parameters")), Some(&Nominal::Parameters));
        assert_eq!(
            labels.get(&id("#/parameters/0")),
            Some(&Nominal::Parameter)
        );
        assert_eq!(
            labels.get(&id("#/parameters/0/schema")),
            Some(&Nominal::Schema)
        );
    }

    #[test]
    fn test_walk_seed_key_roundtrip() {
        let seed = WalkSeed {
            uri: Url::parse("file:///ws/a.yml").unwrap(),
            pointer: JsonPointer::parse_owned("/components/schemas/Pet").unwrap(),
            nominal: Nominal::Schema,
        };
        assert_eq!(WalkSeed::from_key(&seed.to_key()), Some(seed));
    }
}
