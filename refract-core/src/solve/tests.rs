//! Solver tests: equivalence classes, fixed-point unification, nominal
//! bookkeeping, and external-node propagation.

use pretty_assertions::assert_eq;
use refract_pointer::NodeId;

use super::*;

fn node(pointer: &str) -> NodeId {
    NodeId::parse(&format!("file:///ws/spec.yml{pointer}")).unwrap()
}

fn external_node(pointer: &str) -> NodeId {
    NodeId::parse(&format!("file:///ws/other.yml{pointer}")).unwrap()
}

fn object(fields: &[(&str, &NodeId)]) -> LocalShape {
    LocalShape::Object(
        fields
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).clone()))
            .collect(),
    )
}

fn array(items: &[&NodeId]) -> LocalShape {
    LocalShape::Array(
        items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), (*v).clone()))
            .collect(),
    )
}

fn input(nodes: Vec<(NodeId, LocalShape)>) -> SolveInput {
    SolveInput {
        nodes: nodes.into_iter().collect(),
        ..SolveInput::default()
    }
}

#[test]
fn test_local_ref_shares_class_and_type() {
    let pet = node("#/components/schemas/Pet");
    let name = node("#/components/schemas/Pet/name");
    let site = node("#/paths/~1pets/get/schema");

    let mut input = input(vec![
        (pet.clone(), object(&[("name", &name)])),
        (name.clone(), LocalShape::Prim(PrimKind::String)),
        (site.clone(), LocalShape::Ref(pet.clone())),
    ]);
    input.nominals.insert(pet.clone(), Nominal::Schema);

    let result = solve(&input);
    assert!(result.ok());
    assert_eq!(
        result.get_class_id(&site).unwrap(),
        result.get_class_id(&pet).unwrap()
    );
    let expected = JsonType::object([("name".to_owned(), JsonType::Prim(PrimKind::String))]);
    assert_eq!(result.get_type(&pet).unwrap(), &expected);
    assert_eq!(result.get_type(&site).unwrap(), &expected);
    assert_eq!(result.get_canonical_nominal(&site), Some(Nominal::Schema));
}

#[test]
fn test_ref_ring_collapses_to_typevar() {
    let a = node("#/a");
    let b = node("#/b");
    let c = node("#/c");
    let input = input(vec![
        (a.clone(), LocalShape::Ref(b.clone())),
        (b.clone(), LocalShape::Ref(c.clone())),
        (c.clone(), LocalShape::Ref(a.clone())),
    ]);

    let result = solve(&input);
    assert!(result.ok());
    assert!(result.diagnostics().is_empty());
    let class = result.get_class_id(&a).unwrap();
    assert_eq!(result.get_class_id(&b).unwrap(), class);
    assert_eq!(result.get_class_id(&c).unwrap(), class);
    for n in [&a, &b, &c] {
        assert_eq!(result.get_type(n).unwrap(), &JsonType::TypeVar);
    }
}

#[test]
fn test_ref_ring_with_concrete_leaf() {
    let a = node("#/a");
    let b = node("#/b");
    let c = node("#/c");
    let input = input(vec![
        (a.clone(), LocalShape::Ref(b.clone())),
        (b.clone(), LocalShape::Prim(PrimKind::String)),
        (c.clone(), LocalShape::Ref(a.clone())),
    ]);

    let result = solve(&input);
    assert!(result.ok());
    for n in [&a, &b, &c] {
        assert_eq!(result.get_type(n).unwrap(), &JsonType::Prim(PrimKind::String));
    }
}

#[test]
fn test_nominal_conflict_in_one_class() {
    let a = node("#/a");
    let b = node("#/b");
    let mut input = input(vec![
        (a.clone(), LocalShape::Ref(b.clone())),
        (b.clone(), LocalShape::Prim(PrimKind::String)),
    ]);
    input.nominals.insert(a.clone(), Nominal::Schema);
    input.nominals.insert(b.clone(), Nominal::Response);

    let result = solve(&input);
    assert!(!result.ok());
    assert_eq!(result.diagnostics().len(), 1);
    match &result.diagnostics()[0] {
        SolveDiagnostic::NominalConflict {
            a: first,
            b: second,
            ..
        } => {
            assert_eq!(*first, Nominal::Schema);
            assert_eq!(*second, Nominal::Response);
        }
        other => panic!("unexpected diagnostic {other}"),
    }
    // The first observed nominal stays canonical.
    assert_eq!(result.get_canonical_nominal(&a), Some(Nominal::Schema));
}

#[test]
fn test_external_nodes_are_tracked_and_exported() {
    let site = node("#/paths/~1pets/get/schema");
    let target = external_node("");

    let mut input = input(vec![(site.clone(), LocalShape::Ref(target.clone()))]);
    input.nominals.insert(site.clone(), Nominal::Schema);

    let result = solve(&input);
    assert!(result.ok());
    assert_eq!(result.externals().collect::<Vec<_>>(), vec![&target]);
    assert_eq!(
        result.get_type(&target),
        Err(SolveLookupError::NotInInput(target.clone()))
    );
    assert_eq!(
        result.outgoing_nominals().get(&target),
        Some(&Nominal::Schema)
    );
    assert_eq!(result.outgoing_types().get(&target), Some(&JsonType::TypeVar));
}

#[test]
fn test_strict_mode_reports_missing_targets() {
    let site = node("#/a");
    let target = external_node("#/defs/X");
    let mut input = input(vec![(site.clone(), LocalShape::Ref(target.clone()))]);
    input.options.strict_external = true;

    let result = solve(&input);
    assert!(!result.ok());
    assert_eq!(
        result.diagnostics(),
        &[SolveDiagnostic::MissingTarget {
            from: site,
            to: target,
        }]
    );
}

#[test]
fn test_incoming_types_flow_into_classes() {
    let root = node("");
    let mut input = input(vec![(root.clone(), LocalShape::Ref(external_node("#/x")))]);
    input
        .incoming_types
        .insert(root.clone(), vec![JsonType::Prim(PrimKind::String)]);

    let result = solve(&input);
    assert!(result.ok());
    assert_eq!(
        result.get_type(&root).unwrap(),
        &JsonType::Prim(PrimKind::String)
    );
}

#[test]
fn test_incoming_type_conflict() {
    let root = node("");
    let mut input = input(vec![(root.clone(), LocalShape::Prim(PrimKind::Number))]);
    input
        .incoming_types
        .insert(root.clone(), vec![JsonType::Prim(PrimKind::String)]);

    let result = solve(&input);
    assert!(!result.ok());
    assert!(matches!(
        result.diagnostics(),
        [SolveDiagnostic::StructConflict { .. }]
    ));
    assert_eq!(result.get_type(&root).unwrap(), &JsonType::TypeVar);
}

#[test]
fn test_incoming_nominals_merge_and_conflict() {
    let root = node("");
    let mut base = input(vec![(root.clone(), LocalShape::Prim(PrimKind::String))]);
    base.incoming_nominals
        .insert(root.clone(), vec![Nominal::Schema]);

    let result = solve(&base);
    assert!(result.ok());
    assert_eq!(result.get_canonical_nominal(&root), Some(Nominal::Schema));

    base.incoming_nominals
        .insert(root.clone(), vec![Nominal::Schema, Nominal::Response]);
    let result = solve(&base);
    assert!(!result.ok());
    assert!(matches!(
        result.diagnostics(),
        [SolveDiagnostic::NominalConflict { .. }]
    ));
}

#[test]
fn test_array_elements_unify_across_indices() {
    let list = node("#/list");
    let first = node("#/list/0");
    let second = node("#/list/1");
    let ok_input = input(vec![
        (list.clone(), array(&[&first, &second])),
        (first.clone(), LocalShape::Prim(PrimKind::String)),
        (second.clone(), LocalShape::Prim(PrimKind::String)),
    ]);
    let result = solve(&ok_input);
    assert!(result.ok());
    assert_eq!(
        result.get_type(&list).unwrap(),
        &JsonType::array(JsonType::Prim(PrimKind::String))
    );

    let bad_input = input(vec![
        (list.clone(), array(&[&first, &second])),
        (first.clone(), LocalShape::Prim(PrimKind::String)),
        (second.clone(), LocalShape::Prim(PrimKind::Bool)),
    ]);
    let result = solve(&bad_input);
    assert!(!result.ok());
    assert_eq!(result.get_type(&list).unwrap(), &JsonType::TypeVar);
}

#[test]
fn test_self_referential_object_types_as_variable() {
    let this = node("#/recursive");
    let input = input(vec![(this.clone(), object(&[("next", &this)]))]);

    let result = solve(&input);
    assert!(result.ok());
    assert_eq!(result.get_type(&this).unwrap(), &JsonType::TypeVar);
}

#[test]
fn test_every_node_has_exactly_one_class() {
    let a = node("#/a");
    let b = node("#/b");
    let c = node("#/c");
    let input = input(vec![
        (a.clone(), LocalShape::Ref(b.clone())),
        (b.clone(), LocalShape::Prim(PrimKind::Null)),
        (c.clone(), LocalShape::Prim(PrimKind::Bool)),
    ]);

    let result = solve(&input);
    let class_a = result.get_class_id(&a).unwrap();
    let class_b = result.get_class_id(&b).unwrap();
    let class_c = result.get_class_id(&c).unwrap();
    assert_eq!(class_a, class_b);
    assert_ne!(class_a, class_c);
}

#[test]
fn test_solve_is_insensitive_to_map_order() {
    let pet = node("#/Pet");
    let name = node("#/Pet/name");
    let site = node("#/site");

    let forward = {
        let mut input = input(vec![
            (pet.clone(), object(&[("name", &name)])),
            (name.clone(), LocalShape::Prim(PrimKind::String)),
            (site.clone(), LocalShape::Ref(pet.clone())),
        ]);
        input.nominals.insert(pet.clone(), Nominal::Schema);
        input
    };
    let reversed = {
        let mut input = input(vec![
            (site.clone(), LocalShape::Ref(pet.clone())),
            (name.clone(), LocalShape::Prim(PrimKind::String)),
            (pet.clone(), object(&[("name", &name)])),
        ]);
        input.nominals.insert(pet.clone(), Nominal::Schema);
        input
    };

    let a = solve(&forward);
    let b = solve(&reversed);
    assert_eq!(a.get_type(&site).unwrap(), b.get_type(&site).unwrap());
    assert_eq!(
        a.get_canonical_nominal(&site),
        b.get_canonical_nominal(&site)
    );
    assert_eq!(
        a.content_key().fingerprint(),
        b.content_key().fingerprint()
    );
}

#[test]
fn test_solve_twice_is_identical() {
    let a = node("#/a");
    let input = input(vec![(a.clone(), LocalShape::Prim(PrimKind::Number))]);
    let first = solve(&input);
    let second = solve(&input);
    assert_eq!(
        first.content_key().fingerprint(),
        second.content_key().fingerprint()
    );
}

#[test]
fn test_nested_object_types_resolve_bottom_up() {
    let pet = node("#/Pet");
    let props = node("#/Pet/properties");
    let name = node("#/Pet/properties/name");
    let name_type = node("#/Pet/properties/name/type");
    let input = input(vec![
        (pet.clone(), object(&[("properties", &props)])),
        (props.clone(), object(&[("name", &name)])),
        (name.clone(), object(&[("type", &name_type)])),
        (name_type.clone(), LocalShape::Prim(PrimKind::String)),
    ]);

    let result = solve(&input);
    assert!(result.ok());
    let expected = JsonType::object([(
        "properties".to_owned(),
        JsonType::object([(
            "name".to_owned(),
            JsonType::object([("type".to_owned(), JsonType::Prim(PrimKind::String))]),
        )]),
    )]);
    assert_eq!(result.get_type(&pet).unwrap(), &expected);
}
